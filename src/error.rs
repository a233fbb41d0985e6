//! Error taxonomy shared by the cache, queue and worker components.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OfflineError>;

#[derive(Debug, Error)]
pub enum OfflineError {
  /// A fetch attempt failed or the network is absent.
  #[error("network unavailable: {0}")]
  NetworkUnavailable(String),

  /// The persistent cache or queue store could not be opened or used.
  #[error("storage unavailable: {0}")]
  StorageUnavailable(String),

  /// A single queued mutation could not be replayed.
  #[error("replay of mutation {id} failed: {reason}")]
  ReplayFailure { id: i64, reason: String },

  /// A path from the static manifest could not be cached during install.
  #[error("install failed while caching {path}: {reason}")]
  InstallFailed { path: String, reason: String },

  /// An event arrived in a lifecycle state that cannot accept it.
  #[error("lifecycle: {0}")]
  Lifecycle(String),

  /// The dispatch table routed an event to a handler that cannot take it.
  #[error("no handler for {0} event")]
  UnhandledEvent(&'static str),

  #[error("invalid url {url}: {reason}")]
  InvalidUrl { url: String, reason: String },

  #[error(transparent)]
  Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for OfflineError {
  fn from(e: rusqlite::Error) -> Self {
    OfflineError::StorageUnavailable(e.to_string())
  }
}

impl OfflineError {
  pub fn is_network(&self) -> bool {
    matches!(self, OfflineError::NetworkUnavailable(_))
  }
}
