use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::metadata::{MetadataLookup, MetadataResolver};
use crate::scanner::RomMap;

/// A game in the local catalog. `id` is the external metadata identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Game {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
}

/// Resolves metadata for every scanned ROM and builds the game list.
///
/// A ROM whose resolution fails is logged and left out; the rest of the batch
/// continues. When two ROMs resolve to the same id the first one wins.
pub fn rebuild_registry<L: MetadataLookup>(
    roms: &RomMap,
    resolver: &mut MetadataResolver<L>,
) -> Vec<Game> {
    let mut games = Vec::with_capacity(roms.len());
    let mut seen = HashSet::with_capacity(roms.len());

    for (rom_name, path) in roms {
        let meta = match resolver.resolve(rom_name) {
            Ok(m) => m,
            Err(e) => {
                warn!(rom = %rom_name, "Skipping ROM: {e}");
                continue;
            }
        };
        if !seen.insert(meta.id.clone()) {
            warn!(rom = %rom_name, id = %meta.id, "Skipping ROM: id already used by another ROM");
            continue;
        }
        games.push(Game {
            id: meta.id,
            name: meta.name,
            path: path.clone(),
        });
    }

    info!(roms = roms.len(), games = games.len(), "Registry rebuilt");
    games
}

/// On-disk size in bytes of each game's ROM. Files that cannot be stat'ed are omitted.
pub fn local_sizes(games: &[Game]) -> BTreeMap<String, u64> {
    games
        .iter()
        .filter_map(|game| match std::fs::metadata(&game.path) {
            Ok(meta) => Some((game.id.clone(), meta.len())),
            Err(e) => {
                warn!(id = %game.id, path = %game.path.display(), "Cannot read ROM size: {e}");
                None
            }
        })
        .collect()
}

/// Shared handle to the current game list.
///
/// The list is immutable once published; a rebuild replaces it wholesale, so
/// readers always hold a complete snapshot.
#[derive(Clone)]
pub struct GameRegistry {
    inner: Arc<RwLock<Arc<[Game]>>>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::from(Vec::new()))),
        }
    }

    pub fn snapshot(&self) -> Arc<[Game]> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn replace(&self, games: Vec<Game>) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = games.into();
    }

    pub fn find(&self, game_id: &str) -> Option<Game> {
        self.snapshot().iter().find(|g| g.id == game_id).cloned()
    }
}

impl Default for GameRegistry {
    fn default() -> Self {
        Self::new()
    }
}
