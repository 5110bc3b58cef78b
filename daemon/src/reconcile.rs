//! Local game state snapshots and the diff that turns two snapshots into
//! host notifications.

use serde::{Serialize, Serializer};
use std::collections::HashMap;

use crate::registry::Game;

bitflags::bitflags! {
    /// Installed/running status of a game. The empty set means "not installed".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LocalGameState: u32 {
        const INSTALLED = 0b01;
        const RUNNING = 0b10;
    }
}

// Reported to the host as the raw bit value.
impl Serialize for LocalGameState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u32(self.bits())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalGame {
    pub game_id: String,
    pub local_game_state: LocalGameState,
}

impl LocalGame {
    pub fn new(game_id: impl Into<String>, local_game_state: LocalGameState) -> Self {
        Self {
            game_id: game_id.into(),
            local_game_state,
        }
    }
}

/// Every known game is installed; the one matching `running_game_id` is also running.
pub fn local_snapshot(games: &[Game], running_game_id: Option<&str>) -> Vec<LocalGame> {
    games
        .iter()
        .map(|game| {
            let mut state = LocalGameState::INSTALLED;
            if running_game_id == Some(game.id.as_str()) {
                state |= LocalGameState::RUNNING;
            }
            LocalGame::new(game.id.clone(), state)
        })
        .collect()
}

/// Computes the notifications that move a host from `old` to `new`.
///
/// Output is grouped as removed, then added, then changed. Each id appears at
/// most once; ids whose state did not change are not reported.
pub fn diff(old: &[LocalGame], new: &[LocalGame]) -> Vec<LocalGame> {
    let old_by_id: HashMap<&str, LocalGameState> = old
        .iter()
        .map(|g| (g.game_id.as_str(), g.local_game_state))
        .collect();
    let new_by_id: HashMap<&str, LocalGameState> = new
        .iter()
        .map(|g| (g.game_id.as_str(), g.local_game_state))
        .collect();

    let removed = old_by_id
        .keys()
        .filter(|id| !new_by_id.contains_key(*id))
        .map(|id| LocalGame::new(*id, LocalGameState::empty()));

    let added = new
        .iter()
        .filter(|g| !old_by_id.contains_key(g.game_id.as_str()))
        .cloned();

    let changed = new_by_id.iter().filter_map(|(id, state)| {
        let previous = old_by_id.get(id)?;
        (previous != state).then(|| LocalGame::new(*id, *state))
    });

    removed.chain(added).chain(changed).collect()
}
