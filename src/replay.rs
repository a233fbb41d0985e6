//! Replays queued mutations once connectivity returns.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::{OfflineError, Result};
use crate::http::Network;
use crate::queue::{MutationQueue, QueuedMutation};

/// Tag of the connectivity-restoration signal that triggers a drain.
pub const SYNC_TAG: &str = "sync-mutations";

/// Result of one pass over the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub replayed: Vec<i64>,
  pub failed: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
  Drained(DrainReport),
  /// A drain for this tag was already running
  Collapsed,
  /// Not a tag this coordinator handles
  Ignored,
}

pub struct ReplayCoordinator {
  queue: Arc<dyn MutationQueue>,
  network: Arc<dyn Network>,
  in_flight: Mutex<HashSet<String>>,
}

/// Clears a tag from the in-flight set when the drain ends, however it ends.
struct InFlight<'a> {
  tags: &'a Mutex<HashSet<String>>,
  tag: String,
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    if let Ok(mut tags) = self.tags.lock() {
      tags.remove(&self.tag);
    }
  }
}

impl ReplayCoordinator {
  pub fn new(queue: Arc<dyn MutationQueue>, network: Arc<dyn Network>) -> Self {
    Self {
      queue,
      network,
      in_flight: Mutex::new(HashSet::new()),
    }
  }

  /// Handle a sync signal. Signals that arrive while the same tag is
  /// draining collapse into that drain.
  pub async fn on_sync(&self, tag: &str) -> Result<SyncOutcome> {
    if tag != SYNC_TAG {
      tracing::debug!(tag, "Ignoring unknown sync tag");
      return Ok(SyncOutcome::Ignored);
    }

    {
      let mut tags = self
        .in_flight
        .lock()
        .map_err(|e| OfflineError::StorageUnavailable(format!("Lock poisoned: {}", e)))?;
      if !tags.insert(tag.to_string()) {
        tracing::debug!(tag, "Drain already running, collapsing signal");
        return Ok(SyncOutcome::Collapsed);
      }
    }
    let _guard = InFlight {
      tags: &self.in_flight,
      tag: tag.to_string(),
    };

    self.drain().await.map(SyncOutcome::Drained)
  }

  /// Replay every queued record in id order. Failed records stay queued.
  pub async fn drain(&self) -> Result<DrainReport> {
    let records = self.queue.list_all()?;
    let mut report = DrainReport::default();

    for record in records {
      match self.replay(&record).await {
        Ok(()) => {
          self.queue.remove(record.id)?;
          report.replayed.push(record.id);
        }
        Err(e) => {
          let age = Utc::now() - record.enqueued_at;
          tracing::warn!(
            id = record.id,
            age_secs = age.num_seconds(),
            error = %e,
            "Replay failed, mutation stays queued"
          );
          report.failed.push(record.id);
        }
      }
    }

    tracing::info!(
      replayed = report.replayed.len(),
      failed = report.failed.len(),
      "Drained mutation queue"
    );
    Ok(report)
  }

  async fn replay(&self, record: &QueuedMutation) -> Result<()> {
    let response = self
      .network
      .fetch(&record.to_request())
      .await
      .map_err(|e| OfflineError::ReplayFailure {
        id: record.id,
        reason: e.to_string(),
      })?;

    if !response.is_success() {
      return Err(OfflineError::ReplayFailure {
        id: record.id,
        reason: format!("server answered {}", response.status),
      });
    }

    tracing::debug!(id = record.id, method = %record.method, url = %record.url, "Replayed mutation");
    Ok(())
  }
}
