use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::notify::NotificationDefaults;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin of the host application; relative request URLs resolve against it
  pub origin: String,
  /// Where the cache and queue database lives (defaults to the XDG data dir)
  pub data_dir: Option<PathBuf>,
  /// Activate a freshly installed version without waiting for open instances
  pub skip_waiting: bool,
  /// Cadence of the periodic API refresh in `run` mode
  pub refresh_interval_secs: u64,
  pub user_agent: String,
  /// Alert defaults push payloads are merged over
  pub notifications: NotificationDefaults,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080/".to_string(),
      data_dir: None,
      skip_waiting: true,
      refresh_interval_secs: 15 * 60,
      user_agent: concat!("offline-sync/", env!("CARGO_PKG_VERSION")).to_string(),
      notifications: NotificationDefaults::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-sync/config.yaml
  ///
  /// Built-in defaults apply when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  pub fn origin_url(&self) -> Result<Url> {
    let url = Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;
    if url.cannot_be_a_base() {
      return Err(eyre!("Origin '{}' cannot be used as a base URL", self.origin));
    }
    Ok(url)
  }

  pub fn data_dir(&self) -> Result<PathBuf> {
    match &self.data_dir {
      Some(dir) => Ok(dir.clone()),
      None => Ok(crate::db::default_dir()?),
    }
  }

  pub fn refresh_interval(&self) -> Duration {
    Duration::from_secs(self.refresh_interval_secs.max(1))
  }
}
