//! Persisted key/value namespace, the server-side equivalent of browser local storage.
//!
//! The whole namespace is one JSON object. Every mutation rewrites the document through
//! a temp file and a rename.
use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One store shared by the watchlist and the account registry.
pub type SharedStore = Arc<Mutex<LocalStore>>;

#[derive(Debug)]
pub struct LocalStore {
    path: Option<PathBuf>,
    entries: Map<String, Value>,
}

impl LocalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {:?}", parent))?;
        }

        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read store {:?}", path))?;
            match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    warn!("Store {:?} is not a JSON object, starting empty", path);
                    Map::new()
                }
                Err(e) => {
                    warn!("Store {:?} is corrupt ({}), starting empty", path, e);
                    Map::new()
                }
            }
        } else {
            Map::new()
        };

        let store = Self {
            path: Some(path),
            entries,
        };
        store.flush()?;
        debug!("Opened store with {} keys", store.entries.len());
        Ok(store)
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Map::new(),
        }
    }

    /// Decoded value for `key`. A value that no longer decodes is dropped.
    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let value = self.entries.get(key)?.clone();
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Discarding unreadable value under '{}': {}", key, e);
                self.entries.remove(key);
                if let Err(e) = self.flush() {
                    warn!("Failed to persist store after discarding '{}': {}", key, e);
                }
                None
            }
        }
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .with_context(|| format!("Failed to serialize value for '{}'", key))?;
        self.entries.insert(key.to_string(), value);
        self.flush()
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(&self.entries)
            .context("Failed to serialize store")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, path).with_context(|| format!("Failed to replace {:?}", path))?;
        Ok(())
    }
}
