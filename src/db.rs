use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::error::{MatchaError, Result};

// Top-level storage keys.
pub const CV_TEXT_KEY: &str = "cvText";
pub const TRACKER_KEY: &str = "tracker";
pub const ANALYSIS_CACHE_KEY: &str = "analysisCache";
pub const SETTINGS_KEY: &str = "settings";
pub const FLOATING_BUTTON_KEY: &str = "floatingButtonEnabled";

/// Key-value persistence for whole JSON documents.
///
/// `get` returns only the keys that are present. Writes replace each listed
/// key wholesale; there is no partial update.
pub trait KeyValueStore {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>>;
    fn set(&self, items: Map<String, Value>) -> Result<()>;
    fn remove(&self, keys: &[&str]) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

pub fn load<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    let mut items = store.get(&[key])?;
    match items.remove(key) {
        Some(Value::Null) | None => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

pub fn save<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let mut items = Map::new();
    items.insert(key.to_string(), serde_json::to_value(value)?);
    store.set(items)
}

// --- SQLite-backed store ---

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    /// Open the database at `path`, or at the platform data directory.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path(),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        let db = Self { conn, path };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "matcha") {
            proj_dirs.data_dir().join("matcha.db")
        } else {
            PathBuf::from("matcha.db")
        }
    }

    fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;
        Ok(())
    }
}

impl KeyValueStore for Database {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>> {
        let mut stmt = self.conn.prepare_cached("SELECT value FROM kv WHERE key = ?1")?;
        let mut out = Map::new();
        for key in keys {
            let raw: Option<String> = stmt.query_row([key], |row| row.get(0)).optional()?;
            if let Some(raw) = raw {
                out.insert(key.to_string(), serde_json::from_str(&raw)?);
            }
        }
        Ok(out)
    }

    fn set(&self, items: Map<String, Value>) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for (key, value) in &items {
            tx.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value.to_string()],
            )?;
        }
        tx.commit()?;
        debug!(keys = ?items.keys().collect::<Vec<_>>(), "storage set");
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM kv", [])?;
        Ok(())
    }
}

// --- In-memory store ---

/// Store used by tests and embedders that need no persistence.
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Map<String, Value>>> {
        self.items
            .lock()
            .map_err(|_| MatchaError::storage("memory store lock poisoned"))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>> {
        let items = self.lock()?;
        Ok(keys
            .iter()
            .filter_map(|k| items.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    fn set(&self, new_items: Map<String, Value>) -> Result<()> {
        self.lock()?.extend(new_items);
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut items = self.lock()?;
        for key in keys {
            items.remove(*key);
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
}
