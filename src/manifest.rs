//! Build-time resource lists consumed by install, refresh and the gateway.

/// Bump when the static asset set changes; older generations are evicted on activation.
pub const CACHE_VERSION: u32 = 1;

/// Precached at install. Every path must be fetched for install to succeed.
pub const STATIC_MANIFEST: &[&str] = &[
  "/",
  "/offline.html",
  "/static/js/app.js",
  "/static/css/app.css",
  "/static/icons/icon-192.png",
  "/static/icons/icon-512.png",
];

/// Warmed into the api tier at install, best-effort.
pub const API_PREWARM: &[&str] = &[
  "/api/auth/me",
  "/api/dashboard/summary",
  "/api/notifications/unread",
];

/// Refreshed on every periodic trigger.
pub const REFRESH_PATHS: &[&str] = &["/api/dashboard/summary", "/api/notifications/unread"];

/// API resources that answer with an offline marker instead of failing.
pub const CRITICAL_PATHS: &[&str] = &["/api/auth/me", "/api/users/profile"];

/// Served for navigations that miss the cache while offline.
pub const OFFLINE_DOCUMENT: &str = "/offline.html";

#[derive(Debug, Clone)]
pub struct Manifest {
  pub version: u32,
  pub static_paths: Vec<String>,
  pub api_prewarm: Vec<String>,
  pub refresh_paths: Vec<String>,
  pub critical_paths: Vec<String>,
  pub offline_document: String,
}

impl Manifest {
  pub fn builtin() -> Self {
    let owned = |paths: &[&str]| paths.iter().map(|p| p.to_string()).collect();
    Self {
      version: CACHE_VERSION,
      static_paths: owned(STATIC_MANIFEST),
      api_prewarm: owned(API_PREWARM),
      refresh_paths: owned(REFRESH_PATHS),
      critical_paths: owned(CRITICAL_PATHS),
      offline_document: OFFLINE_DOCUMENT.to_string(),
    }
  }

  pub fn is_critical(&self, path: &str) -> bool {
    self.critical_paths.iter().any(|p| p == path)
  }
}
