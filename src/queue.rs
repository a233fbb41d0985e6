//! Durable queue of side-effecting requests awaiting replay.
//!
//! Records are appended by the host application when a mutation cannot be
//! delivered. They are immutable: the only way out of the queue is a
//! successful replay or an explicit `remove`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::db::schema::QUEUE_SCHEMA;
use crate::db::Database;
use crate::error::{OfflineError, Result};
use crate::http::HttpRequest;

/// A pending mutation as stored in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedMutation {
  pub id: i64,
  pub url: String,
  pub method: String,
  pub headers: BTreeMap<String, String>,
  pub body: Option<String>,
  pub enqueued_at: DateTime<Utc>,
}

impl QueuedMutation {
  /// The request to issue when replaying this record.
  pub fn to_request(&self) -> HttpRequest {
    HttpRequest {
      method: self.method.clone(),
      url: self.url.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
      destination: None,
    }
  }
}

/// Persistent store of pending mutations, ordered by id.
pub trait MutationQueue: Send + Sync {
  /// Append a record and return its auto-assigned id.
  fn append(&self, request: &HttpRequest) -> Result<i64>;

  /// All records in insertion (id) order.
  fn list_all(&self) -> Result<Vec<QueuedMutation>>;

  /// Remove a record. Returns false if no record had that id.
  fn remove(&self, id: i64) -> Result<bool>;
}

/// SQLite-backed mutation queue.
pub struct SqliteQueue {
  conn: Mutex<Connection>,
}

impl SqliteQueue {
  pub fn open(path: &Path) -> Result<Self> {
    let db = Database::open(path)?.migrate(QUEUE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(db.into_conn()),
    })
  }

  pub fn in_memory() -> Result<Self> {
    let db = Database::open_in_memory()?.migrate(QUEUE_SCHEMA)?;
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

impl MutationQueue for SqliteQueue {
  fn append(&self, request: &HttpRequest) -> Result<i64> {
    let headers = serde_json::to_string(&request.headers)?;
    let conn = self.conn()?;

    conn.execute(
      "INSERT INTO mutations (url, method, headers, body, enqueued_at) VALUES (?, ?, ?, ?, ?)",
      params![
        request.url,
        request.method.to_uppercase(),
        headers,
        request.body,
        Utc::now().to_rfc3339(),
      ],
    )?;
    let id = conn.last_insert_rowid();

    tracing::info!(id, method = %request.method, url = %request.url, "Queued mutation");
    Ok(id)
  }

  fn list_all(&self) -> Result<Vec<QueuedMutation>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(
      "SELECT id, url, method, headers, body, enqueued_at FROM mutations ORDER BY id ASC",
    )?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, Option<String>>(4)?,
          row.get::<_, String>(5)?,
        ))
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows
      .into_iter()
      .map(|(id, url, method, headers, body, enqueued_at)| -> Result<QueuedMutation> {
        let enqueued_at = DateTime::parse_from_rfc3339(&enqueued_at)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| {
            OfflineError::StorageUnavailable(format!("Bad timestamp on mutation {}: {}", id, e))
          })?;
        Ok(QueuedMutation {
          id,
          url,
          method,
          headers: serde_json::from_str(&headers)?,
          body,
          enqueued_at,
        })
      })
      .collect()
  }

  fn remove(&self, id: i64) -> Result<bool> {
    let conn = self.conn()?;
    let deleted = conn.execute("DELETE FROM mutations WHERE id = ?", params![id])?;
    Ok(deleted > 0)
  }
}
