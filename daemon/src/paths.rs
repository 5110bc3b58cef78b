/// Canonical file paths for romtrack data files.
///
/// Everything lives under one application data directory:
///   - config.toml          Edited by the user, read (and watched) by the daemon.
///   - status.toml          Written by the daemon for external readers.
///   - game_times.json      Cumulative playtime per game id.
///   - metadata_cache.json  ROM name to external id/name lookups.
use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Overrides the platform data directory when set.
pub const HOME_ENV_VAR: &str = "ROMTRACK_HOME";
const APP_DIR_NAME: &str = "romtrack";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";
pub const GAME_TIMES_FILE_NAME: &str = "game_times.json";
pub const METADATA_CACHE_FILE_NAME: &str = "metadata_cache.json";

/// Returns the application data directory: `$ROMTRACK_HOME`, or the platform
/// data directory for `romtrack`.
pub fn app_data_dir() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV_VAR).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    ProjectDirs::from("", "", APP_DIR_NAME)
        .map(|dirs| dirs.data_dir().to_path_buf())
        .context("Could not determine a home directory for application data")
}

pub fn config_file_path(app_dir: &Path) -> PathBuf {
    app_dir.join(CONFIG_FILE_NAME)
}

pub fn status_file_path(app_dir: &Path) -> PathBuf {
    app_dir.join(STATUS_FILE_NAME)
}

pub fn game_times_file_path(app_dir: &Path) -> PathBuf {
    app_dir.join(GAME_TIMES_FILE_NAME)
}

pub fn metadata_cache_file_path(app_dir: &Path) -> PathBuf {
    app_dir.join(METADATA_CACHE_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_paths_have_correct_names() {
        let dir = Path::new("data");
        assert_eq!(config_file_path(dir).file_name().unwrap(), CONFIG_FILE_NAME);
        assert_eq!(status_file_path(dir).file_name().unwrap(), STATUS_FILE_NAME);
        assert_eq!(game_times_file_path(dir).file_name().unwrap(), GAME_TIMES_FILE_NAME);
        assert_eq!(
            metadata_cache_file_path(dir).file_name().unwrap(),
            METADATA_CACHE_FILE_NAME
        );
    }

    #[test]
    fn all_files_share_the_app_dir() {
        let dir = Path::new("data");
        let config = config_file_path(dir);
        assert_eq!(config.parent(), status_file_path(dir).parent());
        assert_eq!(config.parent(), game_times_file_path(dir).parent());
        assert_eq!(config.parent(), metadata_cache_file_path(dir).parent());
    }
}
