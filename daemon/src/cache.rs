use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::persist::{move_aside, write_json_atomic};

/// External metadata for one ROM, as returned by the metadata service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMetadata {
    pub id: String,
    pub name: String,
}

/// Durable ROM name -> metadata store, backed by a JSON object on disk.
///
/// Entries never expire; the only way to force a re-fetch is to remove the
/// entry from the file.
#[derive(Debug)]
pub struct MetadataCache {
    path: PathBuf,
    entries: HashMap<String, ResolvedMetadata>,
}

impl MetadataCache {
    /// Loads the cache at `path`. A missing or unreadable file starts an
    /// empty cache; a malformed one is moved aside first so the next flush
    /// does not overwrite it.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                match move_aside(&path) {
                    Ok(aside) => warn!(
                        path = %path.display(),
                        moved_to = %aside.display(),
                        "Metadata cache is malformed, starting empty: {e}"
                    ),
                    Err(move_err) => warn!(
                        path = %path.display(),
                        "Metadata cache is malformed and could not be moved aside ({move_err}), starting empty: {e}"
                    ),
                }
                HashMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), "Failed to read metadata cache, starting empty: {e}");
                HashMap::new()
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "Metadata cache loaded");
        Self { path, entries }
    }

    pub fn get(&self, rom_name: &str) -> Option<&ResolvedMetadata> {
        self.entries.get(rom_name)
    }

    pub fn insert(&mut self, rom_name: String, metadata: ResolvedMetadata) {
        self.entries.insert(rom_name, metadata);
    }

    pub fn remove(&mut self, rom_name: &str) -> Option<ResolvedMetadata> {
        self.entries.remove(rom_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the whole cache to disk.
    pub fn flush(&self) -> io::Result<()> {
        write_json_atomic(&self.path, &self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zelda() -> ResolvedMetadata {
        ResolvedMetadata {
            id: "3030-1234".to_string(),
            name: "The Legend of Zelda".to_string(),
        }
    }

    #[test]
    fn open_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::open(dir.path().join("cache.json"));
        assert!(cache.is_empty());
    }

    #[test]
    fn open_malformed_file_is_empty_and_keeps_old_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "[not, an, object").unwrap();

        let mut cache = MetadataCache::open(&path);
        assert!(cache.is_empty());

        cache.insert("Zelda".to_string(), zelda());
        cache.flush().unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("cache.json.corrupt")).unwrap(),
            "[not, an, object"
        );
        assert_eq!(MetadataCache::open(&path).len(), 1);
    }

    #[test]
    fn flushed_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut cache = MetadataCache::open(&path);
        cache.insert("Zelda".to_string(), zelda());
        cache.flush().unwrap();

        let reopened = MetadataCache::open(&path);
        assert_eq!(reopened.get("Zelda"), Some(&zelda()));
    }

    #[test]
    fn on_disk_format_is_id_and_name_per_rom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut cache = MetadataCache::open(&path);
        cache.insert("Zelda".to_string(), zelda());
        cache.flush().unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["Zelda"]["id"], "3030-1234");
        assert_eq!(raw["Zelda"]["name"], "The Legend of Zelda");
    }
}
