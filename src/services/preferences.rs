//! Persisted key/value preferences (zone and settings-card ordering).
//!
//! All keys live in one JSON object file. Writes go to a sibling temp file first and
//! are renamed into place.

use crate::models::zone::ZoneId;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Ordering of the main zone list.
pub const ZONE_ORDER_KEY: &str = "zones-order";

/// Ordering of the settings cards shown for one area.
pub fn area_card_order_key(zone_id: &ZoneId) -> String {
    format!("area-{}-card-order", zone_id.0)
}

#[derive(Debug)]
pub enum PreferenceError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl core::fmt::Display for PreferenceError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PreferenceError::Io(e) => write!(f, "io error: {}", e),
            PreferenceError::Json(e) => write!(f, "json error: {}", e),
        }
    }
}

impl std::error::Error for PreferenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PreferenceError::Io(e) => Some(e),
            PreferenceError::Json(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for PreferenceError {
    fn from(value: std::io::Error) -> Self {
        PreferenceError::Io(value)
    }
}

impl From<serde_json::Error> for PreferenceError {
    fn from(value: serde_json::Error) -> Self {
        PreferenceError::Json(value)
    }
}

pub trait PreferenceStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<(), PreferenceError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryPreferenceStore {
    entries: BTreeMap<String, String>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), PreferenceError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FilePreferenceStore {
    /// Open (or lazily create) the store at `path`. A missing, unreadable or malformed
    /// file starts an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(s) => match serde_json::from_str::<BTreeMap<String, String>>(&s) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Ignoring malformed preferences file {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Unable to read preferences file {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        debug!("Preferences loaded from {} ({} key(s))", path.display(), entries.len());
        FilePreferenceStore { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), PreferenceError> {
        let body = serde_json::to_string_pretty(&self.entries)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), PreferenceError> {
        self.entries.insert(key.to_string(), value);
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("zone-dashboard-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn file_store_survives_reopen() {
        let path = temp_path("reopen");
        let _ = fs::remove_file(&path);

        let mut store = FilePreferenceStore::open(&path);
        assert_eq!(store.get(ZONE_ORDER_KEY), None);
        store.set(ZONE_ORDER_KEY, r#"["b","a"]"#.to_string()).expect("write prefs");
        store
            .set(&area_card_order_key(&ZoneId::from("kitchen")), r#"["sensors"]"#.to_string())
            .expect("write prefs");

        let reopened = FilePreferenceStore::open(&path);
        assert_eq!(reopened.get(ZONE_ORDER_KEY).as_deref(), Some(r#"["b","a"]"#));
        assert_eq!(
            reopened.get("area-kitchen-card-order").as_deref(),
            Some(r#"["sensors"]"#)
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn malformed_file_starts_empty() {
        let path = temp_path("malformed");
        fs::write(&path, "[not an object").expect("write fixture");

        let store = FilePreferenceStore::open(&path);
        assert_eq!(store.get(ZONE_ORDER_KEY), None);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn memory_store_overwrites() {
        let mut store = MemoryPreferenceStore::new();
        store.set("k", "1".to_string()).unwrap();
        store.set("k", "2".to_string()).unwrap();
        assert_eq!(store.get("k").as_deref(), Some("2"));
    }
}
