//! Memoizing model-info stores
//!
//! Adapters resolve hashes and ids to human-readable model names through a
//! remote lookup. Answers are cached in a [`ModelInfoStore`] so each key is
//! fetched at most once across runs.

use async_trait::async_trait;
use genarc_common::Result;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Key/value cache of remote model metadata
#[async_trait]
pub trait ModelInfoStore: Send + Sync {
    /// Read persisted entries; a missing backing file is an empty store
    async fn load(&mut self) -> Result<()>;

    fn get(&self, key: &str) -> Option<Value>;

    fn put(&mut self, key: &str, value: Value);

    /// Persist pending changes
    async fn flush(&mut self) -> Result<()>;
}

/// Store persisted as one JSON object in `<dir>/<name>.json`
///
/// Each flush first copies the previous file to `<name>.json.bak`.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Map<String, Value>,
    dirty: bool,
}

impl JsonFileStore {
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(format!("{}.json", name)),
            entries: Map::new(),
            dirty: false,
        }
    }

    /// Open and load in one step
    pub async fn open(dir: &Path, name: &str) -> Result<Self> {
        let mut store = Self::new(dir, name);
        store.load().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ModelInfoStore for JsonFileStore {
    async fn load(&mut self) -> Result<()> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No model info cache yet");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes)? {
            Value::Object(map) => {
                self.entries = map;
                debug!(path = %self.path.display(), entries = self.entries.len(), "Loaded model info cache");
            }
            _ => warn!(path = %self.path.display(), "Model info cache is not a JSON object, ignoring"),
        }
        self.dirty = false;
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
        self.dirty = true;
    }

    async fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        write_with_backup(&self.path, &Value::Object(self.entries.clone())).await?;
        self.dirty = false;
        debug!(path = %self.path.display(), "Saved model info cache");
        Ok(())
    }
}

/// Replace `path` with `value`, keeping the previous version as `<path>.bak`
pub(crate) async fn write_with_backup(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::try_exists(path).await? {
        let mut backup = path.as_os_str().to_owned();
        backup.push(".bak");
        tokio::fs::copy(path, PathBuf::from(backup)).await?;
    }
    tokio::fs::write(path, serde_json::to_vec(value)?).await?;
    Ok(())
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Map<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, key: &str, value: Value) -> Self {
        self.entries.insert(key.to_string(), value);
        self
    }
}

#[async_trait]
impl ModelInfoStore for MemoryStore {
    async fn load(&mut self) -> Result<()> {
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path(), "civitai_models").await.unwrap();
        assert!(store.is_empty());
        assert!(store.get("abc").is_none());
    }

    #[tokio::test]
    async fn test_flush_persists_and_backs_up() {
        let dir = TempDir::new().unwrap();
        let mut store = JsonFileStore::open(dir.path(), "models").await.unwrap();
        store.put("abc", json!({"name": "first"}));
        store.flush().await.unwrap();
        assert!(!dir.path().join("models.json.bak").exists());

        store.put("def", json!({"name": "second"}));
        store.flush().await.unwrap();

        let backup: Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("models.json.bak")).unwrap()).unwrap();
        assert_eq!(backup, json!({"abc": {"name": "first"}}));

        let reopened = JsonFileStore::open(dir.path(), "models").await.unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get("def"), Some(json!({"name": "second"})));
    }

    #[tokio::test]
    async fn test_clean_store_does_not_write() {
        let dir = TempDir::new().unwrap();
        let mut store = JsonFileStore::open(dir.path(), "models").await.unwrap();
        store.flush().await.unwrap();
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let mut store = MemoryStore::new().with_entry("k", json!(1));
        store.put("j", json!(2));
        assert_eq!(store.get("k"), Some(json!(1)));
        assert_eq!(store.get("j"), Some(json!(2)));
    }
}
