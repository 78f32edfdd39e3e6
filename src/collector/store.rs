/**
 * ============================================================================
 * PERSISTENT STORE MODULE
 * ============================================================================
 *
 * PURPOSE: Named string slots that survive process restarts
 *
 * IMPLEMENTATIONS:
 * - FileStore: JSON object on disk, rewritten atomically on every set
 * - MemoryStore: In-process map for embedding and tests
 *
 * STORAGE STRUCTURE:
 * {data_dir}/store.json
 * {
 *   "toSend": "<key>;<line>|<key>;<line>",
 *   "lastSent": "<key>",
 *   "lastDelivered": "<key>",
 *   "clay-settings": "{...}"
 * }
 *
 * Writes are synchronous: a set returns only after the file has been renamed
 * into place.
 *
 * ============================================================================
 */

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Store handle shared by the queue and the controller
pub type SharedStore = Arc<dyn KeyValueStore>;

/**
 * Key-value persistence capability
 * Implementations use interior mutability so one handle can be shared
 */
pub trait KeyValueStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;

    fn set(&self, name: &str, value: &str) -> Result<(), String>;

    fn remove(&self, name: &str) -> Result<(), String>;
}

/**
 * In-memory store
 */
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, name: &str) -> Option<String> {
        self.values.lock().ok()?.get(name).cloned()
    }

    fn set(&self, name: &str, value: &str) -> Result<(), String> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| format!("Store lock poisoned: {}", e))?;
        values.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), String> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| format!("Store lock poisoned: {}", e))?;
        values.remove(name);
        Ok(())
    }
}

/**
 * File-backed store
 * Keeps the full map in memory and rewrites the file on every mutation
 */
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /**
     * Open (or create) the store file
     * Fails if an existing file cannot be read or parsed, so a corrupt store
     * is never silently overwritten
     */
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, String> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create store directory: {}", e))?;
                log::info!("Created store directory: {}", parent.display());
            }
        }

        let values = if path.exists() {
            let json_str = fs::read_to_string(&path)
                .map_err(|e| format!("Failed to read store file: {}", e))?;
            let values: BTreeMap<String, String> = serde_json::from_str(&json_str)
                .map_err(|e| format!("Failed to parse store JSON: {}", e))?;
            log::info!("Loaded store {} ({} entries)", path.display(), values.len());
            values
        } else {
            log::info!("No existing store at {}, starting empty", path.display());
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /**
     * Write the map to disk atomically (temp file + rename)
     */
    fn flush(&self, values: &BTreeMap<String, String>) -> Result<(), String> {
        let json_str = serde_json::to_string_pretty(values)
            .map_err(|e| format!("Failed to serialize store: {}", e))?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, json_str)
            .map_err(|e| format!("Failed to write temp store file: {}", e))?;

        fs::rename(&temp_path, &self.path)
            .map_err(|e| format!("Failed to save store file: {}", e))?;

        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, name: &str) -> Option<String> {
        self.values.lock().ok()?.get(name).cloned()
    }

    fn set(&self, name: &str, value: &str) -> Result<(), String> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| format!("Store lock poisoned: {}", e))?;
        values.insert(name.to_string(), value.to_string());
        self.flush(&values)
    }

    fn remove(&self, name: &str) -> Result<(), String> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| format!("Store lock poisoned: {}", e))?;
        if values.remove(name).is_some() {
            self.flush(&values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_set_get_remove() {
        let store = MemoryStore::new();
        assert!(store.get("toSend").is_none());

        store.set("toSend", "1;a").unwrap();
        assert_eq!(store.get("toSend").as_deref(), Some("1;a"));

        store.remove("toSend").unwrap();
        assert!(store.get("toSend").is_none());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        {
            let store = FileStore::open(&path).unwrap();
            store.set("lastSent", "1484867400").unwrap();
            store.set("toSend", "1;a|2;b").unwrap();
            store.remove("toSend").unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("lastSent").as_deref(), Some("1484867400"));
        assert!(reopened.get("toSend").is_none());
        // No temp file left behind
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "not json").unwrap();

        let result = FileStore::open(&path);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Failed to parse store JSON"));
    }
}
