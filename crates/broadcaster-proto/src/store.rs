//! Key-value persistence for the handful of values that survive restarts:
//! the server address and the last channel watched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::server::{ServerConfig, DEFAULT_PORT};

const KEY_SERVER_HOST: &str = "broadcaster_server_ip";
const KEY_SERVER_PORT: &str = "broadcaster_server_port";
const KEY_LAST_CHANNEL: &str = "broadcaster_last_channel";

/// Minimal get/set contract.  `set(key, None)` removes the key.  Writes are
/// best-effort: implementations log failures instead of returning them.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: Option<String>);
}

/// Volatile store, used when no state file is wanted and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: Option<String>) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        match value {
            Some(v) => values.insert(key.to_string(), v),
            None => values.remove(key),
        };
    }
}

/// Flat string map persisted as pretty JSON.  Every `set` rewrites the file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store.  A missing or corrupt file starts
    /// empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = Self::load(&path);
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> BTreeMap<String, String> {
        if let Ok(content) = std::fs::read_to_string(path) {
            match serde_json::from_str(&content) {
                Ok(values) => return values,
                Err(e) => warn!("store: ignoring unreadable {}: {}", path.display(), e),
            }
        }
        BTreeMap::new()
    }

    fn save(&self, values: &BTreeMap<String, String>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: Option<String>) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        match value {
            Some(v) => values.insert(key.to_string(), v),
            None => values.remove(key),
        };
        if let Err(e) = self.save(&values) {
            warn!("store: failed to write {}: {}", self.path.display(), e);
        }
    }
}

/// Typed view over a [`KeyValueStore`].
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn KeyValueStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// A stored host with a missing or unusable port falls back to the
    /// default port.
    pub fn server_config(&self) -> Option<ServerConfig> {
        let host = self.store.get(KEY_SERVER_HOST)?;
        let port = self
            .store
            .get(KEY_SERVER_PORT)
            .and_then(|p| p.parse::<u16>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_PORT);
        Some(ServerConfig::new(host, port))
    }

    pub fn set_server_config(&self, config: Option<&ServerConfig>) {
        match config {
            Some(config) => {
                self.store.set(KEY_SERVER_HOST, Some(config.host.clone()));
                self.store.set(KEY_SERVER_PORT, Some(config.port.to_string()));
            }
            None => {
                self.store.set(KEY_SERVER_HOST, None);
                self.store.set(KEY_SERVER_PORT, None);
            }
        }
    }

    pub fn last_channel_slug(&self) -> Option<String> {
        self.store.get(KEY_LAST_CHANNEL)
    }

    pub fn set_last_channel_slug(&self, slug: Option<&str>) {
        self.store.set(KEY_LAST_CHANNEL, slug.map(str::to_string));
    }

    pub fn clear_all(&self) {
        self.set_server_config(None);
        self.set_last_channel_slug(None);
    }
}

impl std::fmt::Debug for Preferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preferences").finish_non_exhaustive()
    }
}
