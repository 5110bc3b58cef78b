use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// ROM name (file stem) to full path, in a stable iteration order.
pub type RomMap = BTreeMap<String, PathBuf>;

/// Walks `root` recursively and collects every file whose extension matches one
/// of `extensions` (case-insensitive, no leading dot).
///
/// A later file with the same stem replaces an earlier one. A missing or
/// unreadable root yields an empty map.
pub fn scan(root: &Path, extensions: &[String]) -> RomMap {
    let mut roms = RomMap::new();

    if !root.is_dir() {
        warn!(root = %root.display(), "ROM directory does not exist");
        return roms;
    }

    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() || !has_rom_extension(entry.path(), extensions) {
            continue;
        }
        let Some(stem) = entry.path().file_stem() else {
            continue;
        };
        roms.insert(stem.to_string_lossy().into_owned(), entry.into_path());
    }

    debug!(root = %root.display(), count = roms.len(), "Catalog scan finished");
    roms
}

fn has_rom_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}
