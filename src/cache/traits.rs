//! Core traits and types for the tiered cache.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use url::Url;

use crate::error::Result;
use crate::http::{resolve_url, HttpRequest, HttpResponse};

/// Resource class a cache generation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
  /// Versioned build assets
  Static,
  /// Navigable documents
  Dynamic,
  /// API payloads
  Api,
}

impl CacheTier {
  pub const ALL: [CacheTier; 3] = [CacheTier::Static, CacheTier::Dynamic, CacheTier::Api];

  pub fn as_str(&self) -> &'static str {
    match self {
      CacheTier::Static => "static",
      CacheTier::Dynamic => "dynamic",
      CacheTier::Api => "api",
    }
  }

  /// Generation name for this tier at a version, e.g. `static-v3`.
  pub fn generation_name(&self, version: u32) -> String {
    format!("{}-v{}", self.as_str(), version)
  }
}

impl fmt::Display for CacheTier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Normalized (method, URL) key addressing a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
  method: String,
  url: String,
  hash: String,
}

impl Fingerprint {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    let method = method.to_uppercase();
    let url = url.to_string();

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b" ");
    hasher.update(url.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Self { method, url, hash }
  }

  /// Fingerprint of a request whose URL may be relative to `origin`.
  pub fn for_request(origin: &Url, request: &HttpRequest) -> Result<Self> {
    let url = resolve_url(origin, &request.url)?;
    Ok(Self::new(&request.method, &url))
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn key(&self) -> &str {
    &self.hash
  }
}

/// A stored response. Immutable once stored; a re-fetch replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
  pub fn from_response(response: &HttpResponse) -> Self {
    Self {
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      stored_at: Utc::now(),
    }
  }

  pub fn to_response(&self) -> HttpResponse {
    HttpResponse {
      status: self.status,
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }
}

/// Storage backend holding named cache generations.
///
/// Every operation addresses a single generation or a single entry, so
/// implementations need no multi-record transactions.
pub trait CacheStore: Send + Sync {
  /// Create the generation if it does not exist yet.
  fn open(&self, generation: &str) -> Result<()>;

  fn lookup(&self, generation: &str, fingerprint: &Fingerprint) -> Result<Option<CachedResponse>>;

  /// Store an entry, creating the generation lazily.
  fn store(&self, generation: &str, fingerprint: &Fingerprint, response: &CachedResponse)
    -> Result<()>;

  fn generation_names(&self) -> Result<BTreeSet<String>>;

  /// Delete a whole generation. Returns false if it did not exist.
  fn delete_generation(&self, generation: &str) -> Result<bool>;

  /// URLs stored in a generation, sorted.
  fn keys(&self, generation: &str) -> Result<Vec<String>>;

  /// Record that `version` finished installing. Generations alone don't
  /// prove this since `store` creates them lazily.
  fn mark_installed(&self, version: u32) -> Result<()>;

  fn is_installed(&self, version: u32) -> Result<bool>;
}
