//! Persisted session counter.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Key under which the last used SessionId is stored.
pub const SESSION_KEY: &str = "session";

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("failed to read counter store {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("counter store {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write counter store {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Non-volatile key-value storage for signed counters.
pub trait KeyValueStore {
    fn get_counter(&self, key: &str) -> Result<Option<i64>, CounterError>;

    /// Durably store `value`. Returns only once the value survives power loss.
    fn set_counter(&mut self, key: &str, value: i64) -> Result<(), CounterError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    pub path: PathBuf,
    pub namespace: String,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/timelapse/nvs.json"),
            namespace: "storage".to_string(),
        }
    }
}

type Namespaces = BTreeMap<String, BTreeMap<String, i64>>;

/// Counters kept in a single JSON document, grouped by namespace.
///
/// Every write replaces the file through a synced temporary file and a rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    namespace: String,
}

impl JsonFileStore {
    pub fn open(config: &CounterConfig) -> Result<Self, CounterError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| CounterError::Write {
                    path: config.path.clone(),
                    source,
                })?;
            }
        }
        let store = Self {
            path: config.path.clone(),
            namespace: config.namespace.clone(),
        };
        // Surface a corrupt store at startup rather than on first use.
        store.read_all()?;
        Ok(store)
    }

    fn read_all(&self) -> Result<Namespaces, CounterError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Namespaces::new()),
            Err(source) => {
                return Err(CounterError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_str(&text).map_err(|source| CounterError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn write_all(&self, namespaces: &Namespaces) -> io::Result<()> {
        let tmp = self.path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        let bytes = serde_json::to_vec_pretty(namespaces)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        // The rename only survives power loss once the directory is synced.
        File::open(parent_dir(&self.path))?.sync_all()
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

impl KeyValueStore for JsonFileStore {
    fn get_counter(&self, key: &str) -> Result<Option<i64>, CounterError> {
        let namespaces = self.read_all()?;
        Ok(namespaces
            .get(&self.namespace)
            .and_then(|counters| counters.get(key))
            .copied())
    }

    fn set_counter(&mut self, key: &str, value: i64) -> Result<(), CounterError> {
        let mut namespaces = self.read_all()?;
        namespaces
            .entry(self.namespace.clone())
            .or_default()
            .insert(key.to_string(), value);
        self.write_all(&namespaces)
            .map_err(|source| CounterError::Write {
                path: self.path.clone(),
                source,
            })?;
        debug!("Persisted {}.{} = {}", self.namespace, key, value);
        Ok(())
    }
}

/// The last used SessionId, as persisted across power cycles.
#[derive(Debug)]
pub struct SessionCounterStore<S> {
    store: S,
}

impl<S: KeyValueStore> SessionCounterStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Last persisted value, 0 on a first-ever boot.
    pub fn load(&self) -> Result<i64, CounterError> {
        Ok(self.store.get_counter(SESSION_KEY)?.unwrap_or(0))
    }

    pub fn store(&mut self, value: i64) -> Result<(), CounterError> {
        self.store.set_counter(SESSION_KEY, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryStore;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> CounterConfig {
        CounterConfig {
            path: dir.path().join("nvs").join("nvs.json"),
            namespace: "storage".to_string(),
        }
    }

    #[test]
    fn load_defaults_to_zero() {
        let counter = SessionCounterStore::new(MemoryStore::default());
        assert_eq!(counter.load().unwrap(), 0);
    }

    #[test]
    fn store_then_load() {
        let mut counter = SessionCounterStore::new(MemoryStore::default());
        counter.store(41).unwrap();
        assert_eq!(counter.load().unwrap(), 41);
    }

    #[test]
    fn json_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let mut store = JsonFileStore::open(&config_in(&dir)).unwrap();
        assert_eq!(store.get_counter(SESSION_KEY).unwrap(), None);
        store.set_counter(SESSION_KEY, 7).unwrap();

        let reopened = JsonFileStore::open(&config_in(&dir)).unwrap();
        assert_eq!(reopened.get_counter(SESSION_KEY).unwrap(), Some(7));
        assert!(!dir.path().join("nvs").join("nvs.tmp").exists());
    }

    #[test]
    fn json_store_keeps_namespaces_apart() {
        let dir = TempDir::new().unwrap();
        let mut storage = JsonFileStore::open(&config_in(&dir)).unwrap();
        let mut other = JsonFileStore::open(&CounterConfig {
            namespace: "other".to_string(),
            ..config_in(&dir)
        })
        .unwrap();
        storage.set_counter(SESSION_KEY, 3).unwrap();
        other.set_counter(SESSION_KEY, 99).unwrap();
        assert_eq!(storage.get_counter(SESSION_KEY).unwrap(), Some(3));
        assert_eq!(other.get_counter(SESSION_KEY).unwrap(), Some(99));
    }

    #[test]
    fn parent_dir_of_bare_name_is_current_dir() {
        assert_eq!(parent_dir(Path::new("nvs.json")), Path::new("."));
        assert_eq!(
            parent_dir(Path::new("/var/lib/timelapse/nvs.json")),
            Path::new("/var/lib/timelapse")
        );
    }

    #[test]
    fn json_store_rewrites_in_place() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let mut store = JsonFileStore::open(&config).unwrap();
        for value in 0..3 {
            store.set_counter(SESSION_KEY, value).unwrap();
        }
        let names: Vec<_> = fs::read_dir(config.path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["nvs.json"]);
        assert_eq!(store.get_counter(SESSION_KEY).unwrap(), Some(2));
    }

    #[test]
    fn corrupt_store_is_rejected_on_open() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        fs::create_dir_all(config.path.parent().unwrap()).unwrap();
        fs::write(&config.path, b"{not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&config),
            Err(CounterError::Corrupt { .. })
        ));
    }
}
