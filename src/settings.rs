//! Settings storage backed by a JSON file
//!
//! The file holds a single JSON object. Each setting lives under its own
//! top-level key so unrelated settings survive a write.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Errors that can occur reading or writing the settings file
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("settings file does not contain a JSON object")]
    NotAnObject,
}

/// Key/value settings file
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the value stored under `key`. A missing file reads as empty.
    pub fn get(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        let mut root = self.read_root()?;
        Ok(root.remove(key))
    }

    /// Store `value` under `key`, keeping every other key intact
    pub fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        // A corrupt file is replaced rather than blocking every future write;
        // an unreadable one is left alone
        let mut root = match self.read_root() {
            Ok(root) => root,
            Err(SettingsError::Io(e)) => return Err(SettingsError::Io(e)),
            Err(e) => {
                warn!(
                    ?e,
                    path = ?self.path,
                    "settings file is corrupt, replacing it and dropping its contents"
                );
                Map::new()
            }
        };
        root.insert(key.to_owned(), value);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec_pretty(&Value::Object(root))?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, &self.path)?;

        debug!(path = ?self.path, key, "setting written");
        Ok(())
    }

    fn read_root(&self) -> Result<Map<String, Value>, SettingsError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes)? {
            Value::Object(map) => Ok(map),
            _ => Err(SettingsError::NotAnObject),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        assert!(store.get("recordHotkey").unwrap().is_none());
    }

    #[test]
    fn test_set_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));

        store.set("theme", json!("dark")).unwrap();
        store.set("recordHotkey", json!({"kind": "globe"})).unwrap();

        assert_eq!(store.get("theme").unwrap(), Some(json!("dark")));
        assert_eq!(
            store.get("recordHotkey").unwrap(),
            Some(json!({"kind": "globe"}))
        );
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("nested").join("settings.json"));
        store.set("key", json!(1)).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = SettingsStore::new(&path);
        assert!(matches!(store.get("key"), Err(SettingsError::Json(_))));

        // ...but a write replaces it
        store.set("key", json!(true)).unwrap();
        assert_eq!(store.get("key").unwrap(), Some(json!(true)));
    }

    #[test]
    fn test_non_object_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, b"[1, 2, 3]").unwrap();

        let store = SettingsStore::new(&path);
        assert!(matches!(store.get("key"), Err(SettingsError::NotAnObject)));

        store.set("key", json!("value")).unwrap();
        assert_eq!(store.get("key").unwrap(), Some(json!("value")));
    }

    #[test]
    fn test_unreadable_file_is_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be cannot be read as settings
        let path = dir.path().join("settings.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"data").unwrap();

        let store = SettingsStore::new(&path);
        assert!(matches!(
            store.set("key", json!(1)),
            Err(SettingsError::Io(_))
        ));
        assert!(path.join("keep").exists());
    }
}
