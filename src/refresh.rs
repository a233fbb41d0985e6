//! Background refresh of a fixed set of API resources.

use futures::future::join_all;
use std::sync::Arc;
use url::Url;

use crate::cache::{CacheTier, CacheTiers, Fingerprint};
use crate::error::Result;
use crate::http::{resolve_url, HttpRequest, Network};

/// Scheduler tag of the periodic trigger.
pub const REFRESH_TAG: &str = "refresh-api";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
  pub refreshed: Vec<String>,
  pub failed: Vec<String>,
}

pub struct PeriodicRefresher {
  tiers: CacheTiers,
  network: Arc<dyn Network>,
  origin: Url,
  paths: Vec<String>,
}

impl PeriodicRefresher {
  pub fn new(tiers: CacheTiers, network: Arc<dyn Network>, origin: Url, paths: Vec<String>) -> Self {
    Self {
      tiers,
      network,
      origin,
      paths,
    }
  }

  /// Returns `None` for tags this refresher does not own.
  pub async fn on_periodic(&self, tag: &str) -> Option<RefreshReport> {
    if tag != REFRESH_TAG {
      tracing::debug!(tag, "Ignoring unknown periodic tag");
      return None;
    }
    Some(self.refresh().await)
  }

  /// Fetch every path once and store the successes. No retries.
  pub async fn refresh(&self) -> RefreshReport {
    let results = join_all(self.paths.iter().map(|path| async move {
      (path.clone(), self.refresh_one(path).await)
    }))
    .await;

    let mut report = RefreshReport::default();
    for (path, result) in results {
      match result {
        Ok(true) => report.refreshed.push(path),
        Ok(false) => report.failed.push(path),
        Err(e) => {
          tracing::warn!(%path, error = %e, "Periodic refresh failed");
          report.failed.push(path);
        }
      }
    }

    tracing::info!(
      refreshed = report.refreshed.len(),
      failed = report.failed.len(),
      "Periodic refresh finished"
    );
    report
  }

  async fn refresh_one(&self, path: &str) -> Result<bool> {
    let url = resolve_url(&self.origin, path)?;
    let response = self.network.fetch(&HttpRequest::get(url.as_str())).await?;
    if !response.is_success() {
      tracing::warn!(%path, status = response.status, "Periodic refresh got error status");
      return Ok(false);
    }
    self
      .tiers
      .put(CacheTier::Api, &Fingerprint::new("GET", &url), &response)?;
    Ok(true)
  }
}
