use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::persist::{move_aside, write_json_atomic};
use crate::registry::Game;

/// Persisted playtime for one game, keyed by game id in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaytimeRecord {
    pub name: String,
    /// Cumulative minutes.
    pub time_played: u64,
    /// Unix timestamp (seconds) of the last session end.
    pub last_time_played: Option<i64>,
}

impl PlaytimeRecord {
    fn first_seen(name: &str) -> Self {
        Self {
            name: name.to_string(),
            time_played: 0,
            last_time_played: None,
        }
    }
}

/// Playtime as reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameTime {
    pub game_id: String,
    pub time_played: u64,
    pub last_time_played: Option<i64>,
}

impl GameTime {
    fn from_record(game_id: &str, record: &PlaytimeRecord) -> Self {
        Self {
            game_id: game_id.to_string(),
            time_played: record.time_played,
            last_time_played: record.last_time_played,
        }
    }
}

type Records = BTreeMap<String, PlaytimeRecord>;

/// JSON-file playtime store.
///
/// Every read-modify-write holds `lock`, so a session-end update and a
/// periodic refresh cannot interleave and lose minutes.
pub struct PlaytimeStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PlaytimeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Adds `added_minutes` to `game_id` and stamps `last_played`.
    /// Unknown ids get a zeroed record named `name` first.
    pub fn update(
        &self,
        game_id: &str,
        name: &str,
        added_minutes: u64,
        last_played: i64,
    ) -> Result<GameTime> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = self.read_records()?;

        let record = records
            .entry(game_id.to_string())
            .or_insert_with(|| PlaytimeRecord::first_seen(name));
        record.time_played = record.time_played.saturating_add(added_minutes);
        record.last_time_played = Some(last_played);
        let game_time = GameTime::from_record(game_id, record);

        self.write_records(&records)?;
        info!(
            id = game_id,
            added = added_minutes,
            total = game_time.time_played,
            "Playtime updated"
        );
        Ok(game_time)
    }

    /// Returns playtime for every game in `games`, creating zeroed records
    /// for ids not yet on disk (written back in one batch).
    pub fn get_all(&self, games: &[Game]) -> Result<BTreeMap<String, GameTime>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = self.read_records()?;

        let mut added = 0usize;
        for game in games {
            if !records.contains_key(&game.id) {
                records.insert(game.id.clone(), PlaytimeRecord::first_seen(&game.name));
                added += 1;
            }
        }
        if added > 0 {
            self.write_records(&records)?;
            debug!(added, "Created playtime records for new games");
        }

        Ok(games
            .iter()
            .filter_map(|g| {
                records
                    .get(&g.id)
                    .map(|r| (g.id.clone(), GameTime::from_record(&g.id, r)))
            })
            .collect())
    }

    /// Reads the record file. A missing file is created empty. A file that is
    /// not a JSON object is moved aside and treated as empty. Records that do
    /// not decode are dropped individually: the original file is moved aside
    /// and the remaining records are written back at once.
    fn read_records(&self) -> Result<Records> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let empty = Records::new();
                self.write_records(&empty)?;
                return Ok(empty);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read playtime file: {}", self.path.display())
                })
            }
        };

        let raw: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&content) {
            Ok(raw) => raw,
            Err(e) => {
                let aside = self.set_aside()?;
                warn!(
                    path = %self.path.display(),
                    moved_to = %aside.display(),
                    "Playtime file is malformed, starting over: {e}"
                );
                return Ok(Records::new());
            }
        };

        let mut records = Records::new();
        let mut dropped = 0usize;
        for (game_id, value) in raw {
            match serde_json::from_value::<PlaytimeRecord>(value) {
                Ok(record) => {
                    records.insert(game_id, record);
                }
                Err(e) => {
                    warn!(id = %game_id, "Dropping malformed playtime record: {e}");
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            let aside = self.set_aside()?;
            self.write_records(&records)?;
            warn!(
                dropped,
                kept = records.len(),
                moved_to = %aside.display(),
                "Playtime file had malformed records"
            );
        }
        Ok(records)
    }

    fn set_aside(&self) -> Result<PathBuf> {
        move_aside(&self.path)
            .with_context(|| format!("Failed to move aside {}", self.path.display()))
    }

    fn write_records(&self, records: &Records) -> Result<()> {
        write_json_atomic(&self.path, records)
            .with_context(|| format!("Failed to write playtime file: {}", self.path.display()))
    }
}
