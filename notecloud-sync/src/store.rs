use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{Note, Settings};
use crate::sync::partition;

/// Well-known keys for the state the sync engine owns.
pub const NOTES_KEY: &str = "notes";
pub const SETTINGS_KEY: &str = "settings";
pub const TRIAL_STARTED_KEY: &str = "trialStarted";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("stored value is malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("data directory is unavailable")]
    NoDataDir,
}

/// Narrow persistence interface: get/set by well-known key. The sync core
/// never touches a storage backend directly.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// One JSON object per store file, loaded at open and rewritten through a
/// temp file on every set.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Map::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn open_default() -> Result<Self, StoreError> {
        let dir = dirs::data_dir().ok_or(StoreError::NoDataDir)?.join("notecloud");
        fs::create_dir_all(&dir)?;
        Self::open(dir.join("store.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &Map<String, Value>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl LocalStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }
}

pub fn load_notes(store: &dyn LocalStore) -> Result<Vec<Note>, StoreError> {
    match store.get(NOTES_KEY)? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(Vec::new()),
    }
}

pub fn save_notes(store: &dyn LocalStore, notes: &[Note]) -> Result<(), StoreError> {
    store.set(NOTES_KEY, serde_json::to_value(notes)?)
}

/// Loads settings with defaults merged under the user-saved overrides.
pub fn load_settings(store: &dyn LocalStore) -> Result<Settings, StoreError> {
    match store.get(SETTINGS_KEY)? {
        Some(value) => {
            let stored: Settings = serde_json::from_value(value)?;
            Ok(partition::overlay(Settings::defaults(), &stored))
        }
        None => Ok(Settings::defaults()),
    }
}

pub fn save_settings(store: &dyn LocalStore, settings: &Settings) -> Result<(), StoreError> {
    store.set(SETTINGS_KEY, serde_json::to_value(settings)?)
}

pub fn trial_started(store: &dyn LocalStore) -> Result<bool, StoreError> {
    Ok(matches!(
        store.get(TRIAL_STARTED_KEY)?,
        Some(Value::Bool(true))
    ))
}

/// Write-once: a started trial is recorded forever and never cleared, by
/// sync or otherwise.
pub fn mark_trial_started(store: &dyn LocalStore) -> Result<(), StoreError> {
    if !trial_started(store)? {
        store.set(TRIAL_STARTED_KEY, Value::Bool(true))?;
    }
    Ok(())
}
