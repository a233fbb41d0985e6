pub mod schema;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{OfflineError, Result};

/// File name of the SQLite database inside the data directory.
pub const DB_FILE: &str = "offline.db";

/// Database connection wrapper shared by the cache and queue stores
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create the database at the given path
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        OfflineError::StorageUnavailable(format!("Failed to create database directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      OfflineError::StorageUnavailable(format!(
        "Failed to open database at {}: {}",
        path.display(),
        e
      ))
    })?;
    // Cache and queue hold separate connections to the same file
    conn.busy_timeout(Duration::from_secs(5))?;

    Ok(Self { conn })
  }

  /// Open a private in-memory database
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory().map_err(|e| {
      OfflineError::StorageUnavailable(format!("Failed to open in-memory database: {}", e))
    })?;
    Ok(Self { conn })
  }

  /// Run migrations for one store's tables
  pub fn migrate(self, schema: &str) -> Result<Self> {
    self
      .conn
      .execute_batch(schema)
      .map_err(|e| OfflineError::StorageUnavailable(format!("Failed to run migrations: {}", e)))?;
    Ok(self)
  }

  pub fn into_conn(self) -> Connection {
    self.conn
  }
}

/// Get the default data directory
pub fn default_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| OfflineError::StorageUnavailable("Could not determine data directory".into()))?;

  Ok(data_dir.join("offline-sync"))
}
