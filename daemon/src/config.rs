use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::event::DaemonEvent;

pub const DEFAULT_ROMS_PATH: &str = "C:/Games/NES";
pub const DEFAULT_ROM_EXTENSIONS: &[&str] = &["nes", "fds", "nsf", "nsfe", "unf"];
pub const DEFAULT_EMULATOR_PATH: &str = "C:/Program Files (x86)/Mesen/Mesen.exe";
pub const DEFAULT_FULLSCREEN_FLAG: &str = "/fullscreen";
pub const DEFAULT_METADATA_URL: &str = "https://www.giantbomb.com/api/search/";
pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const MIN_TICK_INTERVAL_MS: u64 = 100;
pub const MAX_TICK_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_GAME_TIME_EVERY_TICKS: u64 = 12;

/// Root configuration structure. Deserialized from `<app data>/config.toml`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub emulator: EmulatorConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub poll: PollConfig,
}

/// Where the ROM catalog lives and which files count as ROMs.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LibraryConfig {
    #[serde(default = "default_roms_path")]
    pub roms_path: String,
    /// File extensions without the leading dot, matched case-insensitively.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            roms_path: default_roms_path(),
            extensions: default_extensions(),
        }
    }
}

/// How the external emulator is launched.
#[derive(Debug, Deserialize, Clone)]
pub struct EmulatorConfig {
    #[serde(default = "default_emulator_path")]
    pub path: String,
    #[serde(default)]
    pub fullscreen: bool,
    /// Argument passed before the ROM path when `fullscreen` is set.
    #[serde(default = "default_fullscreen_flag")]
    pub fullscreen_flag: String,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            path: default_emulator_path(),
            fullscreen: false,
            fullscreen_flag: default_fullscreen_flag(),
        }
    }
}

impl EmulatorConfig {
    /// Arguments for launching `rom_path`, excluding the emulator binary itself.
    pub fn launch_args(&self, rom_path: &Path) -> Vec<String> {
        let mut args = Vec::with_capacity(2);
        if self.fullscreen {
            args.push(self.fullscreen_flag.clone());
        }
        args.push(rom_path.to_string_lossy().into_owned());
        args
    }
}

/// Remote metadata service settings.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MetadataConfig {
    /// Required only for cache misses.
    pub api_key: Option<String>,
    #[serde(default = "default_metadata_url")]
    pub base_url: String,
    /// Request timeout in seconds. Clamped to [1, 120].
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_metadata_url(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl MetadataConfig {
    pub fn effective_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS))
    }
}

/// Poll loop cadence.
#[derive(Debug, Deserialize, Clone)]
pub struct PollConfig {
    /// Milliseconds between ticks. Clamped to [100, 60000]. Read once at start-up.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Game times are re-published every this many ticks.
    #[serde(default = "default_game_time_every_ticks")]
    pub game_time_every_ticks: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            game_time_every_ticks: DEFAULT_GAME_TIME_EVERY_TICKS,
        }
    }
}

impl PollConfig {
    pub fn effective_tick_interval(&self) -> Duration {
        Duration::from_millis(
            self.tick_interval_ms
                .clamp(MIN_TICK_INTERVAL_MS, MAX_TICK_INTERVAL_MS),
        )
    }

    pub fn effective_game_time_period(&self) -> u64 {
        self.game_time_every_ticks.max(1)
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Spawns a file watcher on the parent directory of `path`.  Whenever the config
/// file is created or modified, reloads it and sends a `ConfigReloaded` event.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            error!("Failed to create config watcher: {e}");
            return;
        }
    };

    // Editors often save by writing a new file and renaming it over the old one.
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            error!("Config path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        error!(dir = %watch_dir.display(), "Failed to watch config directory: {e}");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            match load_or_default(&path) {
                Ok(config) => {
                    info!("Config file changed, reloading");
                    if tx.send(DaemonEvent::ConfigReloaded(config)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to reload config: {e:#}"),
            }
        }
    }
}

fn default_roms_path() -> String {
    DEFAULT_ROMS_PATH.to_string()
}

fn default_extensions() -> Vec<String> {
    DEFAULT_ROM_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

fn default_emulator_path() -> String {
    DEFAULT_EMULATOR_PATH.to_string()
}

fn default_fullscreen_flag() -> String {
    DEFAULT_FULLSCREEN_FLAG.to_string()
}

fn default_metadata_url() -> String {
    DEFAULT_METADATA_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_game_time_every_ticks() -> u64 {
    DEFAULT_GAME_TIME_EVERY_TICKS
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn library_config_default_values() {
        let lib = LibraryConfig::default();
        assert_eq!(lib.roms_path, DEFAULT_ROMS_PATH);
        assert_eq!(lib.extensions, vec!["nes", "fds", "nsf", "nsfe", "unf"]);
    }

    #[test]
    fn config_default_has_no_api_key() {
        let c = Config::default();
        assert!(c.metadata.api_key.is_none());
        assert_eq!(c.metadata.base_url, DEFAULT_METADATA_URL);
        assert!(!c.emulator.fullscreen);
    }

    // ── clamping ──────────────────────────────────────────────────────────────

    #[test]
    fn tick_interval_clamps_below_min() {
        let poll = PollConfig { tick_interval_ms: 1, ..PollConfig::default() };
        assert_eq!(
            poll.effective_tick_interval(),
            Duration::from_millis(MIN_TICK_INTERVAL_MS)
        );
    }

    #[test]
    fn tick_interval_clamps_above_max() {
        let poll = PollConfig { tick_interval_ms: u64::MAX, ..PollConfig::default() };
        assert_eq!(
            poll.effective_tick_interval(),
            Duration::from_millis(MAX_TICK_INTERVAL_MS)
        );
    }

    #[test]
    fn game_time_period_is_at_least_one() {
        let poll = PollConfig { game_time_every_ticks: 0, ..PollConfig::default() };
        assert_eq!(poll.effective_game_time_period(), 1);
    }

    #[test]
    fn metadata_timeout_clamps() {
        let low = MetadataConfig { timeout_secs: 0, ..MetadataConfig::default() };
        let high = MetadataConfig { timeout_secs: 9_999, ..MetadataConfig::default() };
        assert_eq!(low.effective_timeout(), Duration::from_secs(MIN_TIMEOUT_SECS));
        assert_eq!(high.effective_timeout(), Duration::from_secs(MAX_TIMEOUT_SECS));
    }

    // ── launch_args ───────────────────────────────────────────────────────────

    #[test]
    fn launch_args_windowed_is_rom_only() {
        let emu = EmulatorConfig::default();
        let args = emu.launch_args(Path::new("roms/Zelda.nes"));
        assert_eq!(args, vec!["roms/Zelda.nes".to_string()]);
    }

    #[test]
    fn launch_args_fullscreen_puts_flag_first() {
        let emu = EmulatorConfig { fullscreen: true, ..EmulatorConfig::default() };
        let args = emu.launch_args(Path::new("roms/Zelda.nes"));
        assert_eq!(args, vec!["/fullscreen".to_string(), "roms/Zelda.nes".to_string()]);
    }

    // ── load_or_default ───────────────────────────────────────────────────────

    #[test]
    fn load_or_default_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_or_default(&path).unwrap();
        assert_eq!(config.library.roms_path, DEFAULT_ROMS_PATH);
        assert_eq!(config.poll.tick_interval_ms, DEFAULT_TICK_INTERVAL_MS);
    }

    #[test]
    fn load_or_default_parses_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[library]
roms_path = "D:/Roms/NES"
extensions = ["nes"]

[emulator]
path = "/usr/bin/mesen"
fullscreen = true

[metadata]
api_key = "secret"

[poll]
tick_interval_ms = 500
game_time_every_ticks = 6
"#,
        )
        .unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.library.roms_path, "D:/Roms/NES");
        assert_eq!(config.library.extensions, vec!["nes"]);
        assert_eq!(config.emulator.path, "/usr/bin/mesen");
        assert!(config.emulator.fullscreen);
        assert_eq!(config.emulator.fullscreen_flag, DEFAULT_FULLSCREEN_FLAG);
        assert_eq!(config.metadata.api_key.as_deref(), Some("secret"));
        assert_eq!(config.poll.tick_interval_ms, 500);
        assert_eq!(config.poll.game_time_every_ticks, 6);
    }

    #[test]
    fn load_or_default_partial_toml_uses_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[emulator]\nfullscreen = true\n").unwrap();

        let config = load_or_default(&path).unwrap();
        assert!(config.emulator.fullscreen);
        assert_eq!(config.emulator.path, DEFAULT_EMULATOR_PATH);
        assert_eq!(config.library.roms_path, DEFAULT_ROMS_PATH);
        assert_eq!(config.metadata.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn load_or_default_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not valid toml ][[[").unwrap();
        assert!(load_or_default(&path).is_err());
    }
}
