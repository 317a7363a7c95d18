use crate::error::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const ACCESS_TOKEN: &str = "access_token";
pub const REFRESH_TOKEN: &str = "refresh_token";
/// Epoch milliseconds, stored as a decimal string.
pub const TOKEN_EXPIRATION: &str = "token_expiration";
pub const THEME_PREFERENCE: &str = "theme_preference";

pub const TOKEN_KEYS: [&str; 3] = [ACCESS_TOKEN, REFRESH_TOKEN, TOKEN_EXPIRATION];

/// Secure key/value persistence provided by the host platform.
///
/// Every call is independent and may fail on its own.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    fn delete(&self, key: &str) -> AppResult<()>;

    /// Write several entries as one unit. If one write fails the entries
    /// already written are removed again before the error is returned.
    fn set_many(&self, entries: &[(&str, &str)]) -> AppResult<()> {
        for (index, (key, value)) in entries.iter().enumerate() {
            if let Err(e) = self.set(key, value) {
                for (written, _) in &entries[..index] {
                    if let Err(undo) = self.delete(written) {
                        log::warn!("Failed to roll back {}: {}", written, undo);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

/// JSON file backed store for desktop hosts and development builds.
pub struct FileStore {
    path: PathBuf,
    // Serialises read-modify-write cycles on the file.
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn default_location() -> AppResult<Self> {
        Ok(Self::new(
            crate::config::AppConfig::config_dir()?.join("session.json"),
        ))
    }

    fn read_all(&self) -> AppResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content)
            .map_err(|e| AppError::Storage(format!("{}: {}", self.path.display(), e)))
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> AppResult<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        // Write-then-rename so a crash never leaves half a file behind.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let _guard = self.lock.lock();
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn delete(&self, key: &str) -> AppResult<()> {
        let _guard = self.lock.lock();
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }

    fn set_many(&self, new_entries: &[(&str, &str)]) -> AppResult<()> {
        let _guard = self.lock.lock();
        let mut entries = self.read_all()?;
        for (key, value) in new_entries {
            entries.insert(key.to_string(), value.to_string());
        }
        self.write_all(&entries)
    }
}

/// Process-local store, used when the host has no secure storage and in tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> AppResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
