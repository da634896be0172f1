//! Key-value persistence for the queue and identity.

use crate::error::StoreError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Default organization name the settings file is keyed by.
pub const DEFAULT_ORGANIZATION: &str = "Mixpanel Rust Library";

/// Key holding the pending message queue.
pub const ANALYTICS_MESSAGES_KEY: &str = "Analytics messages";

/// Key holding the registered super properties.
pub const SUPER_PROPERTIES_KEY: &str = "Super properties";

/// Key holding the people distinct id.
pub const PEOPLE_DISTINCT_ID_KEY: &str = "People distinctId";

/// Key holding the generated device identifier.
pub const DEVICE_ID_KEY: &str = "Device id";

/// Synchronous key-value store shared by the identity and the queue.
///
/// Reads never fail: absent or unreadable values come back as `None`.
pub trait SettingsStore: Send + Sync + Debug {
    /// Get the value stored under `key`.
    fn get(&self, key: &str) -> Option<Value>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key succeeds.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        lock(&self.values).insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.values).remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object file.
///
/// The file is read once on open and rewritten after every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl FileStore {
    /// Open the store at `path`. A missing or malformed file opens empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = read_settings(&path);

        debug!(path = %path.display(), keys = values.len(), "opened settings store");

        Self {
            path,
            values: Mutex::new(values),
        }
    }

    /// Open the store for `organization` under the user's config directory.
    pub fn for_organization(organization: &str) -> Result<Self, StoreError> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine config directory",
            ))
        })?;

        Ok(Self::open(config_dir.join(format!("{organization}.json"))))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, values: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(values)?;
        let tmp_path = self.path.with_extension("json.tmp");

        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;

        Ok(())
    }
}

fn read_settings(path: &Path) -> Map<String, Value> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read settings, starting empty");
            return Map::new();
        }
    };

    match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Object(values)) => values,
        _ => {
            warn!(path = %path.display(), "malformed settings file, starting empty");
            Map::new()
        }
    }
}

impl SettingsStore for FileStore {
    fn get(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut values = lock(&self.values);
        values.insert(key.to_string(), value);
        self.write(&values)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut values = lock(&self.values);
        if values.remove(key).is_none() {
            return Ok(());
        }
        self.write(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_store_set_get_remove() {
        let store = MemoryStore::new();

        assert!(store.get("k").is_none());
        store.set("k", json!({"a": 1})).unwrap();
        assert_eq!(store.get("k"), Some(json!({"a": 1})));

        store.remove("k").unwrap();
        assert!(store.get("k").is_none());
        store.remove("k").unwrap();
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = FileStore::open(&path);
        store.set(PEOPLE_DISTINCT_ID_KEY, json!("13793")).unwrap();
        store.set(SUPER_PROPERTIES_KEY, json!({"plan": "pro"})).unwrap();
        drop(store);

        let reopened = FileStore::open(&path);
        assert_eq!(reopened.get(PEOPLE_DISTINCT_ID_KEY), Some(json!("13793")));
        assert_eq!(
            reopened.get(SUPER_PROPERTIES_KEY),
            Some(json!({"plan": "pro"}))
        );
    }

    #[test]
    fn test_file_store_remove_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = FileStore::open(&path);
        store.set(ANALYTICS_MESSAGES_KEY, json!([])).unwrap();
        store.remove(ANALYTICS_MESSAGES_KEY).unwrap();

        assert!(FileStore::open(&path).get(ANALYTICS_MESSAGES_KEY).is_none());
    }

    #[test]
    fn test_file_store_malformed_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileStore::open(&path);
        assert!(store.get(SUPER_PROPERTIES_KEY).is_none());

        // Writing replaces the corrupt file.
        store.set(SUPER_PROPERTIES_KEY, json!({})).unwrap();
        assert_eq!(FileStore::open(&path).get(SUPER_PROPERTIES_KEY), Some(json!({})));
    }

    #[test]
    fn test_file_store_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("org.json");

        let store = FileStore::open(&path);
        store.set("k", json!(1)).unwrap();

        assert!(path.exists());
    }
}
