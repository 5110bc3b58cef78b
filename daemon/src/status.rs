use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::error;

/// Current operational state of the daemon.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    /// No emulator session is being tracked.
    Idle,
    /// An emulator launched by us is running.
    Playing,
}

/// Runtime status written by the daemon to `<app data>/status.toml`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: DaemonState,
    /// Number of games in the current catalog.
    pub game_count: usize,
    /// Id of the game being played, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_game: Option<String>,
    /// Rounded length of the most recent finished session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_session_minutes: Option<u64>,
    /// Human-readable message for the most recent non-fatal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonStatus {
    /// Constructs the initial idle status on daemon startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: DaemonState::Idle,
            game_count: 0,
            running_game: None,
            last_session_minutes: None,
            error: None,
        }
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Errors are logged; a failed status write never stops the daemon.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!(dir = %parent.display(), "Failed to create status directory: {e}");
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                error!("Failed to write status file: {e}");
            }
        }
        Err(e) => error!("Failed to serialize status: {e}"),
    }
}

/// The current status plus the file it is mirrored to.
/// Shared between the event loop and background tasks.
pub struct StatusFile {
    path: PathBuf,
    current: Mutex<DaemonStatus>,
}

impl StatusFile {
    /// Writes the initial idle status immediately.
    pub fn create(path: impl Into<PathBuf>) -> Self {
        let file = Self {
            path: path.into(),
            current: Mutex::new(DaemonStatus::new()),
        };
        file.update(|_| {});
        file
    }

    /// Applies `change` and rewrites the file.
    pub fn update(&self, change: impl FnOnce(&mut DaemonStatus)) {
        let mut status = self.current.lock().unwrap_or_else(|e| e.into_inner());
        change(&mut status);
        write_status(&self.path, &status);
    }

    pub fn snapshot(&self) -> DaemonStatus {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── DaemonStatus::new ─────────────────────────────────────────────────────

    #[test]
    fn new_starts_idle() {
        let s = DaemonStatus::new();
        assert_eq!(s.state, DaemonState::Idle);
        assert_eq!(s.game_count, 0);
    }

    #[test]
    fn new_has_no_optional_fields() {
        let s = DaemonStatus::new();
        assert!(s.running_game.is_none());
        assert!(s.last_session_minutes.is_none());
        assert!(s.error.is_none());
    }

    #[test]
    fn new_version_matches_cargo_pkg() {
        assert_eq!(DaemonStatus::new().version, env!("CARGO_PKG_VERSION"));
    }

    // ── DaemonState serialization ─────────────────────────────────────────────

    #[test]
    fn state_serializes_to_lowercase() {
        let mut s = DaemonStatus::new();
        assert!(toml::to_string_pretty(&s).unwrap().contains("state = \"idle\""));

        s.state = DaemonState::Playing;
        assert!(toml::to_string_pretty(&s).unwrap().contains("state = \"playing\""));
    }

    // ── write_status ──────────────────────────────────────────────────────────

    #[test]
    fn write_status_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dir").join("status.toml");
        write_status(&path, &DaemonStatus::new());
        assert!(path.exists());
    }

    #[test]
    fn write_status_content_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");

        let mut original = DaemonStatus::new();
        original.state = DaemonState::Playing;
        original.running_game = Some("3030-42".to_string());
        original.game_count = 12;

        write_status(&path, &original);

        let parsed: DaemonStatus =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.state, DaemonState::Playing);
        assert_eq!(parsed.running_game.as_deref(), Some("3030-42"));
        assert_eq!(parsed.game_count, 12);
    }

    #[test]
    fn write_status_omits_none_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");
        write_status(&path, &DaemonStatus::new());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("running_game"));
        assert!(!content.contains("last_session_minutes"));
        assert!(!content.contains("error"));
    }

    // ── StatusFile ────────────────────────────────────────────────────────────

    #[test]
    fn status_file_writes_on_create_and_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");
        let file = StatusFile::create(&path);
        assert!(path.exists());

        file.update(|s| s.last_session_minutes = Some(4));
        let parsed: DaemonStatus =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.last_session_minutes, Some(4));
        assert_eq!(file.snapshot().last_session_minutes, Some(4));
    }
}
