use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

/// Serializes `value` as pretty JSON and replaces `path` with it atomically.
///
/// The data is written to a sibling `.tmp` file first and renamed over the
/// target, so readers never observe a half-written file. Missing parent
/// directories are created.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

/// Renames an unreadable data file to `<path>.corrupt` so a fresh one can
/// take its place without losing the old content. Returns the new location.
pub fn move_aside(path: &Path) -> io::Result<PathBuf> {
    let mut aside = path.as_os_str().to_owned();
    aside.push(".corrupt");
    let aside = PathBuf::from(aside);
    std::fs::rename(path, &aside)?;
    Ok(aside)
}
