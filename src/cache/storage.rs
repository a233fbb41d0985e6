//! SQLite implementation of the cache store.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheStore, CachedResponse, Fingerprint};
use crate::db::schema::CACHE_SCHEMA;
use crate::db::Database;
use crate::error::{OfflineError, Result};

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache tables in the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    let db = Database::open(path)?.migrate(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(db.into_conn()),
    })
  }

  /// Volatile storage, used for tests and `--ephemeral` runs.
  pub fn in_memory() -> Result<Self> {
    let db = Database::open_in_memory()?.migrate(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(db.into_conn()),
    })
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| OfflineError::StorageUnavailable(format!("Lock poisoned: {}", e)))
  }
}

fn ensure_generation(conn: &Connection, generation: &str) -> Result<()> {
  conn.execute(
    "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?, ?)",
    params![generation, Utc::now().to_rfc3339()],
  )?;
  Ok(())
}

impl CacheStore for SqliteStorage {
  fn open(&self, generation: &str) -> Result<()> {
    let conn = self.conn()?;
    ensure_generation(&conn, generation)
  }

  fn lookup(&self, generation: &str, fingerprint: &Fingerprint) -> Result<Option<CachedResponse>> {
    let conn = self.conn()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM entries
         WHERE generation = ? AND fingerprint = ?",
        params![generation, fingerprint.key()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()?;

    match row {
      Some((status, headers, body, stored_at)) => {
        let headers: BTreeMap<String, String> = serde_json::from_str(&headers)?;
        Ok(Some(CachedResponse {
          status,
          headers,
          body,
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn store(
    &self,
    generation: &str,
    fingerprint: &Fingerprint,
    response: &CachedResponse,
  ) -> Result<()> {
    let headers = serde_json::to_string(&response.headers)?;
    let conn = self.conn()?;
    ensure_generation(&conn, generation)?;

    conn.execute(
      "INSERT OR REPLACE INTO entries
         (generation, fingerprint, method, url, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        generation,
        fingerprint.key(),
        fingerprint.method(),
        fingerprint.url(),
        response.status,
        headers,
        response.body,
        response.stored_at.to_rfc3339(),
      ],
    )?;

    Ok(())
  }

  fn generation_names(&self) -> Result<BTreeSet<String>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare("SELECT name FROM generations")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<BTreeSet<String>>>()?;
    Ok(names)
  }

  fn delete_generation(&self, generation: &str) -> Result<bool> {
    let conn = self.conn()?;
    // Entries go with the generation through ON DELETE CASCADE
    let deleted = conn.execute("DELETE FROM generations WHERE name = ?", params![generation])?;
    Ok(deleted > 0)
  }

  fn keys(&self, generation: &str) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare("SELECT url FROM entries WHERE generation = ? ORDER BY url")?;
    let urls = stmt
      .query_map(params![generation], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(urls)
  }

  fn mark_installed(&self, version: u32) -> Result<()> {
    let conn = self.conn()?;
    conn.execute(
      "INSERT OR REPLACE INTO installs (version, installed_at) VALUES (?, ?)",
      params![version, Utc::now().to_rfc3339()],
    )?;
    Ok(())
  }

  fn is_installed(&self, version: u32) -> Result<bool> {
    let conn = self.conn()?;
    let found = conn
      .query_row(
        "SELECT 1 FROM installs WHERE version = ?",
        params![version],
        |_| Ok(()),
      )
      .optional()?;
    Ok(found.is_some())
  }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| OfflineError::StorageUnavailable(format!("Failed to parse datetime '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::HttpResponse;
  use url::Url;

  fn fp(path: &str) -> Fingerprint {
    let url = Url::parse("https://app.example.com/").unwrap().join(path).unwrap();
    Fingerprint::new("GET", &url)
  }

  #[test]
  fn test_store_and_lookup() {
    let storage = SqliteStorage::in_memory().unwrap();
    let response = CachedResponse::from_response(
      &HttpResponse::new(200, "body").with_header("Content-Type", "text/plain"),
    );

    storage.store("api-v1", &fp("/api/a"), &response).unwrap();

    let found = storage.lookup("api-v1", &fp("/api/a")).unwrap().unwrap();
    assert_eq!(found.body, b"body");
    assert_eq!(found.headers.get("content-type").map(String::as_str), Some("text/plain"));
    assert!(storage.lookup("api-v1", &fp("/api/b")).unwrap().is_none());
    assert!(storage.lookup("static-v1", &fp("/api/a")).unwrap().is_none());
  }

  #[test]
  fn test_store_replaces_entry() {
    let storage = SqliteStorage::in_memory().unwrap();
    let first = CachedResponse::from_response(&HttpResponse::new(200, "old"));
    let second = CachedResponse::from_response(&HttpResponse::new(200, "new"));

    storage.store("dynamic-v1", &fp("/"), &first).unwrap();
    storage.store("dynamic-v1", &fp("/"), &second).unwrap();

    assert_eq!(storage.keys("dynamic-v1").unwrap().len(), 1);
    assert_eq!(storage.lookup("dynamic-v1", &fp("/")).unwrap().unwrap().body, b"new");
  }

  #[test]
  fn test_open_is_idempotent() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.open("static-v1").unwrap();
    storage.open("static-v1").unwrap();
    assert_eq!(
      storage.generation_names().unwrap(),
      BTreeSet::from(["static-v1".to_string()])
    );
  }

  #[test]
  fn test_delete_generation_drops_entries() {
    let storage = SqliteStorage::in_memory().unwrap();
    let response = CachedResponse::from_response(&HttpResponse::new(200, "x"));
    storage.store("api-v1", &fp("/api/a"), &response).unwrap();

    assert!(storage.delete_generation("api-v1").unwrap());
    assert!(!storage.delete_generation("api-v1").unwrap());
    assert!(storage.keys("api-v1").unwrap().is_empty());
    assert!(storage.lookup("api-v1", &fp("/api/a")).unwrap().is_none());
  }

  #[test]
  fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");
    let response = CachedResponse::from_response(&HttpResponse::new(200, "kept"));

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.store("static-v1", &fp("/app.js"), &response).unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    let found = storage.lookup("static-v1", &fp("/app.js")).unwrap().unwrap();
    assert_eq!(found, response);
  }

  #[test]
  fn test_install_marker_is_per_version_and_durable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    {
      let storage = SqliteStorage::open(&path).unwrap();
      assert!(!storage.is_installed(1).unwrap());
      storage.mark_installed(1).unwrap();
      storage.mark_installed(1).unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    assert!(storage.is_installed(1).unwrap());
    assert!(!storage.is_installed(2).unwrap());
  }
}
