//! The key/value durable-settings collaborator and two implementations.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::PersistenceError;

/// Durable key/value settings shared by the session.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError>;
    fn set(&self, key: &str, value: Value) -> Result<(), PersistenceError>;
}

/// Settings held in memory, with write-failure injection.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, Value>>,
    fail_writes: RwLock<bool>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `set` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.write() = fail;
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), PersistenceError> {
        if *self.fail_writes.read() {
            return Err(PersistenceError::write(key, "storage unavailable"));
        }
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }
}

/// Settings kept in one JSON object file. Every write rewrites the whole file
/// through a temporary sibling and a rename.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl JsonFileSettings {
    /// Opens `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Map::new(),
            Ok(text) => match serde_json::from_str::<Value>(&text)? {
                Value::Object(map) => map,
                other => {
                    return Err(PersistenceError::read(
                        path.display().to_string(),
                        format!("expected a JSON object, found {}", other),
                    ));
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(JsonFileSettings {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), PersistenceError> {
        let mut values = self.values.lock();
        let mut next = values.clone();
        next.insert(key.to_string(), value);

        let text = serde_json::to_string_pretty(&Value::Object(next.clone()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(|e| PersistenceError::write(key, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| PersistenceError::write(key, e))?;

        *values = next;
        debug!("Wrote settings key {} to {}", key, self.path.display());
        Ok(())
    }
}
