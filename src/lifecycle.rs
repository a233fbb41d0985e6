//! Version lifecycle: install pre-warms the tiers, activate evicts stale
//! generations and takes over open application instances.

use futures::future::{join_all, try_join_all};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;

use crate::cache::{CacheTier, CacheTiers, Fingerprint};
use crate::error::{OfflineError, Result};
use crate::http::{resolve_url, HttpRequest, HttpResponse, Network};
use crate::manifest::Manifest;
use crate::notify::Clients;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Idle,
  Installing,
  /// Installed and waiting to activate
  Installed,
  Activated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub precached: usize,
  pub prewarmed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
  pub evicted: Vec<String>,
  pub claimed: usize,
}

pub struct LifecycleController {
  tiers: CacheTiers,
  network: Arc<dyn Network>,
  clients: Arc<dyn Clients>,
  manifest: Arc<Manifest>,
  origin: Url,
  state: Mutex<LifecycleState>,
  skip_waiting: AtomicBool,
}

impl LifecycleController {
  /// A version with a recorded install finished installing in an earlier run.
  pub fn new(
    tiers: CacheTiers,
    network: Arc<dyn Network>,
    clients: Arc<dyn Clients>,
    manifest: Arc<Manifest>,
    origin: Url,
  ) -> Result<Self> {
    let state = if tiers.is_installed()? {
      LifecycleState::Installed
    } else {
      LifecycleState::Idle
    };

    Ok(Self {
      tiers,
      network,
      clients,
      manifest,
      origin,
      state: Mutex::new(state),
      skip_waiting: AtomicBool::new(false),
    })
  }

  fn state_guard(&self) -> Result<MutexGuard<'_, LifecycleState>> {
    self
      .state
      .lock()
      .map_err(|e| OfflineError::Lifecycle(format!("state lock poisoned: {}", e)))
  }

  pub fn state(&self) -> Result<LifecycleState> {
    Ok(*self.state_guard()?)
  }

  fn set_state(&self, state: LifecycleState) -> Result<()> {
    *self.state_guard()? = state;
    Ok(())
  }

  /// Precache the static manifest (all or nothing), then pre-warm the API
  /// list best-effort.
  pub async fn install(&self) -> Result<InstallReport> {
    self.set_state(LifecycleState::Installing)?;
    tracing::info!(version = self.tiers.version(), "Installing");

    let precached = match self.precache_static().await {
      Ok(count) => count,
      Err(e) => {
        self.set_state(LifecycleState::Idle)?;
        tracing::error!(error = %e, "Install failed");
        return Err(e);
      }
    };
    let prewarmed = self.warm(CacheTier::Api, &self.manifest.api_prewarm).await;
    self.tiers.mark_installed()?;

    self.set_state(LifecycleState::Installed)?;
    tracing::info!(precached, prewarmed, "Installed");
    Ok(InstallReport {
      precached,
      prewarmed,
    })
  }

  async fn precache_static(&self) -> Result<usize> {
    let fetched: Vec<(Fingerprint, HttpResponse)> =
      try_join_all(self.manifest.static_paths.iter().map(|path| self.fetch_required(path))).await?;

    // Nothing is stored until every path has been fetched
    self.tiers.open(CacheTier::Static)?;
    for (fingerprint, response) in &fetched {
      self.tiers.put(CacheTier::Static, fingerprint, response)?;
    }
    Ok(fetched.len())
  }

  async fn fetch_required(&self, path: &str) -> Result<(Fingerprint, HttpResponse)> {
    let install_err = |reason: String| OfflineError::InstallFailed {
      path: path.to_string(),
      reason,
    };

    let url = resolve_url(&self.origin, path)?;
    let response = self
      .network
      .fetch(&HttpRequest::get(url.as_str()))
      .await
      .map_err(|e| install_err(e.to_string()))?;
    if !response.is_success() {
      return Err(install_err(format!("status {}", response.status)));
    }
    Ok((Fingerprint::new("GET", &url), response))
  }

  /// Best-effort fan-out into a tier. Individual failures are logged and
  /// dropped; returns how many paths were stored.
  pub async fn warm(&self, tier: CacheTier, paths: &[String]) -> usize {
    let results = join_all(paths.iter().map(|path| self.warm_one(tier, path))).await;

    results
      .into_iter()
      .zip(paths)
      .filter(|(result, path)| match result {
        Ok(stored) => *stored,
        Err(e) => {
          tracing::warn!(%tier, %path, error = %e, "Pre-warm failed");
          false
        }
      })
      .count()
  }

  async fn warm_one(&self, tier: CacheTier, path: &str) -> Result<bool> {
    let url = resolve_url(&self.origin, path)?;
    let response = self.network.fetch(&HttpRequest::get(url.as_str())).await?;
    if !response.is_success() {
      return Ok(false);
    }
    self.tiers.put(tier, &Fingerprint::new("GET", &url), &response)?;
    Ok(true)
  }

  /// Ask for the installed version to activate without waiting for open
  /// instances to close. Returns true if activation can run right away.
  pub fn skip_waiting(&self) -> Result<bool> {
    self.skip_waiting.store(true, Ordering::SeqCst);
    Ok(self.state()? == LifecycleState::Installed)
  }

  pub fn wants_immediate_activation(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  /// Evict every generation outside the current version, then claim clients.
  pub async fn activate(&self) -> Result<ActivateReport> {
    match self.state()? {
      LifecycleState::Installed | LifecycleState::Activated => {}
      state => {
        return Err(OfflineError::Lifecycle(format!(
          "cannot activate version {} while {:?}",
          self.tiers.version(),
          state
        )))
      }
    }

    let keep: BTreeSet<String> = self.tiers.current_generations();
    let evicted = self.tiers.delete_generations_not_in(&keep)?;
    let claimed = self.clients.claim().await?;

    self.set_state(LifecycleState::Activated)?;
    tracing::info!(
      version = self.tiers.version(),
      evicted = evicted.len(),
      claimed,
      "Activated"
    );
    Ok(ActivateReport { evicted, claimed })
  }
}
