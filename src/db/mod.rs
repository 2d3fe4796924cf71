//! Durable key/value settings store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::SettingsError;

/// Process-wide settings storage holding opaque blobs under fixed names.
pub trait KeyValueStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SettingsError>;
  fn set(&self, key: &str, value: &[u8]) -> Result<(), SettingsError>;
  fn remove(&self, key: &str) -> Result<(), SettingsError>;
}

/// Settings kept in a SQLite database file.
pub struct SqliteSettings {
  conn: Mutex<Connection>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteSettings {
  /// Open or create the database at the default location.
  pub fn open() -> Result<Self, SettingsError> {
    Self::open_at(&Self::default_path()?)
  }

  pub fn open_at(path: &Path) -> Result<Self, SettingsError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    Self::init(Connection::open(path)?)
  }

  pub fn open_in_memory() -> Result<Self, SettingsError> {
    Self::init(Connection::open_in_memory()?)
  }

  /// Default database path under the platform data directory.
  pub fn default_path() -> Result<PathBuf, SettingsError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| {
        SettingsError::Io(std::io::Error::new(
          std::io::ErrorKind::NotFound,
          "could not determine data directory",
        ))
      })?;

    Ok(data_dir.join("xrate").join("settings.db"))
  }

  fn init(conn: Connection) -> Result<Self, SettingsError> {
    conn.execute_batch(SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SettingsError> {
    self.conn.lock().map_err(|_| SettingsError::Poisoned)
  }
}

impl KeyValueStore for SqliteSettings {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SettingsError> {
    let conn = self.conn()?;
    let value = conn
      .query_row(
        "SELECT value FROM settings WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set(&self, key: &str, value: &[u8]) -> Result<(), SettingsError> {
    let conn = self.conn()?;
    conn.execute(
      "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?, ?, datetime('now'))",
      params![key, value],
    )?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), SettingsError> {
    let conn = self.conn()?;
    conn.execute("DELETE FROM settings WHERE key = ?", params![key])?;
    Ok(())
  }
}

/// Settings that live only as long as the process.
#[derive(Debug, Default)]
pub struct MemorySettings {
  values: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySettings {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KeyValueStore for MemorySettings {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SettingsError> {
    let values = self.values.lock().map_err(|_| SettingsError::Poisoned)?;
    Ok(values.get(key).cloned())
  }

  fn set(&self, key: &str, value: &[u8]) -> Result<(), SettingsError> {
    let mut values = self.values.lock().map_err(|_| SettingsError::Poisoned)?;
    values.insert(key.to_string(), value.to_vec());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), SettingsError> {
    let mut values = self.values.lock().map_err(|_| SettingsError::Poisoned)?;
    values.remove(key);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn exercise(store: &dyn KeyValueStore) {
    assert_eq!(store.get("missing").unwrap(), None);
    store.set("a", b"one").unwrap();
    store.set("a", b"two").unwrap();
    assert_eq!(store.get("a").unwrap().as_deref(), Some(&b"two"[..]));
    store.remove("a").unwrap();
    assert_eq!(store.get("a").unwrap(), None);
  }

  #[test]
  fn test_sqlite_settings() {
    exercise(&SqliteSettings::open_in_memory().unwrap());
  }

  #[test]
  fn test_memory_settings() {
    exercise(&MemorySettings::new());
  }

  #[test]
  fn test_sqlite_settings_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("settings.db");
    SqliteSettings::open_at(&path).unwrap().set("k", b"v").unwrap();
    let reopened = SqliteSettings::open_at(&path).unwrap();
    assert_eq!(reopened.get("k").unwrap().as_deref(), Some(&b"v"[..]));
  }
}
