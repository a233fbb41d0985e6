//! Versioned tier manager over a cache store.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::traits::{CacheStore, CacheTier, CachedResponse, Fingerprint};
use crate::error::Result;
use crate::http::HttpResponse;

/// Maps tiers to the generation names of one version and evicts the rest.
#[derive(Clone)]
pub struct CacheTiers {
  store: Arc<dyn CacheStore>,
  version: u32,
}

impl CacheTiers {
  pub fn new(store: Arc<dyn CacheStore>, version: u32) -> Self {
    Self { store, version }
  }

  pub fn version(&self) -> u32 {
    self.version
  }

  pub fn generation(&self, tier: CacheTier) -> String {
    tier.generation_name(self.version)
  }

  /// Create the tier's current generation if absent and return its name.
  pub fn open(&self, tier: CacheTier) -> Result<String> {
    let name = self.generation(tier);
    self.store.open(&name)?;
    Ok(name)
  }

  pub fn lookup(&self, tier: CacheTier, fingerprint: &Fingerprint) -> Result<Option<CachedResponse>> {
    let hit = self.store.lookup(&self.generation(tier), fingerprint)?;
    tracing::debug!(
      tier = %tier,
      url = fingerprint.url(),
      hit = hit.is_some(),
      "Cache lookup"
    );
    Ok(hit)
  }

  pub fn put(&self, tier: CacheTier, fingerprint: &Fingerprint, response: &HttpResponse) -> Result<()> {
    self.store.store(
      &self.generation(tier),
      fingerprint,
      &CachedResponse::from_response(response),
    )
  }

  /// Generation names belonging to the current version.
  pub fn current_generations(&self) -> BTreeSet<String> {
    CacheTier::ALL.iter().map(|t| self.generation(*t)).collect()
  }

  pub fn generation_names(&self) -> Result<BTreeSet<String>> {
    self.store.generation_names()
  }

  pub fn keys(&self, generation: &str) -> Result<Vec<String>> {
    self.store.keys(generation)
  }

  pub fn mark_installed(&self) -> Result<()> {
    self.store.mark_installed(self.version)
  }

  pub fn is_installed(&self) -> Result<bool> {
    self.store.is_installed(self.version)
  }

  /// Delete every existing generation whose name is not in `keep`.
  /// Returns the names that were deleted.
  pub fn delete_generations_not_in(&self, keep: &BTreeSet<String>) -> Result<Vec<String>> {
    let existing = self.store.generation_names()?;
    let mut deleted = Vec::new();

    for name in existing.difference(keep) {
      if self.store.delete_generation(name)? {
        tracing::info!(generation = %name, "Evicted stale cache generation");
        deleted.push(name.clone());
      }
    }

    Ok(deleted)
  }
}
