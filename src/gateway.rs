//! Interception gateway: classifies outbound reads and applies a cache policy.
//!
//! | class      | tier    | policy                                     |
//! |------------|---------|--------------------------------------------|
//! | static     | static  | cache-first                                |
//! | api        | api     | network-first, cache fallback              |
//! | navigation | dynamic | stale-while-revalidate, offline document   |
//!
//! Non-GET and cross-origin requests go straight to the network and are never
//! cached or queued.

use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use url::Url;

use crate::cache::{CacheTier, CacheTiers, Fingerprint};
use crate::error::{OfflineError, Result};
use crate::http::{resolve_url, HttpRequest, HttpResponse, Network};
use crate::manifest::Manifest;

/// Header set on responses synthesized by the gateway.
pub const OFFLINE_HEADER: &str = "x-offline-sync";

const ASSET_EXTENSIONS: &[&str] = &[
  "js", "css", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2", "ttf", "map",
];

const STATIC_DESTINATIONS: &[&str] = &["script", "style", "image", "font", "manifest"];

const FALLBACK_OFFLINE_PAGE: &str = "<!doctype html><html><head><title>Offline</title></head>\
<body><h1>You are offline</h1><p>This page is not available offline yet.</p></body></html>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  Static,
  Api,
  Navigation,
  /// Non-GET or cross-origin; not intercepted
  Passthrough,
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  Cache,
  /// Synthesized marker for a critical API resource
  OfflineMarker,
  /// Designated offline page for a failed navigation
  OfflineDocument,
}

#[derive(Debug, Clone)]
pub struct GatewayResponse {
  pub response: HttpResponse,
  pub source: ResponseSource,
}

impl GatewayResponse {
  fn network(response: HttpResponse) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
    }
  }

  fn cached(response: HttpResponse) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
    }
  }
}

pub fn classify(origin: &Url, request: &HttpRequest) -> Result<RequestClass> {
  if !request.is_get() {
    return Ok(RequestClass::Passthrough);
  }

  let url = resolve_url(origin, &request.url)?;
  if url.origin() != origin.origin() {
    return Ok(RequestClass::Passthrough);
  }

  let path = url.path();
  if path == "/api" || path.starts_with("/api/") {
    return Ok(RequestClass::Api);
  }

  let destination = request.destination.as_deref();
  let extension = path_extension(path);
  let extension = extension.as_deref();

  if destination.is_some_and(|d| STATIC_DESTINATIONS.contains(&d))
    || path.starts_with("/static/")
    || path.starts_with("/assets/")
    || extension.is_some_and(|e| ASSET_EXTENSIONS.contains(&e))
  {
    return Ok(RequestClass::Static);
  }

  let accepts_html = request
    .header("accept")
    .is_some_and(|a| a.contains("text/html"));
  if destination == Some("document")
    || accepts_html
    || extension.is_none()
    || extension == Some("html")
  {
    return Ok(RequestClass::Navigation);
  }

  // Remaining same-origin reads (manifests, locale bundles) are cached as static
  Ok(RequestClass::Static)
}

fn path_extension(path: &str) -> Option<String> {
  let segment = path.rsplit('/').next()?;
  let (_, ext) = segment.rsplit_once('.')?;
  Some(ext.to_lowercase())
}

#[derive(Clone)]
pub struct Gateway {
  tiers: CacheTiers,
  network: Arc<dyn Network>,
  manifest: Arc<Manifest>,
  origin: Url,
  /// In-flight revalidations, awaited by `settle`
  background: Arc<Mutex<JoinSet<()>>>,
}

impl Gateway {
  pub fn new(
    tiers: CacheTiers,
    network: Arc<dyn Network>,
    manifest: Arc<Manifest>,
    origin: Url,
  ) -> Self {
    Self {
      tiers,
      network,
      manifest,
      origin,
      background: Arc::new(Mutex::new(JoinSet::new())),
    }
  }

  /// Wait until every background revalidation has finished. One-shot callers
  /// run this before the runtime shuts down.
  pub async fn settle(&self) {
    loop {
      let mut pending = match self.background.lock() {
        Ok(mut set) => std::mem::take(&mut *set),
        Err(e) => {
          tracing::warn!(error = %e, "Background task set poisoned");
          return;
        }
      };
      if pending.is_empty() {
        return;
      }
      while let Some(joined) = pending.join_next().await {
        if let Err(e) = joined {
          tracing::warn!(error = %e, "Revalidation task failed");
        }
      }
    }
  }

  pub async fn handle(&self, request: &HttpRequest) -> Result<GatewayResponse> {
    let class = classify(&self.origin, request)?;
    tracing::debug!(method = %request.method, url = %request.url, ?class, "Intercepted request");

    let result = match class {
      RequestClass::Static => self.cache_first(request).await,
      RequestClass::Api => self.network_first(request).await,
      RequestClass::Navigation => self.stale_while_revalidate(request).await,
      RequestClass::Passthrough => self.network.fetch(request).await.map(GatewayResponse::network),
    };

    if let Err(e @ OfflineError::StorageUnavailable(_)) = &result {
      tracing::error!(url = %request.url, error = %e, "Cache storage failed, request aborted");
    }
    result
  }

  /// Static assets: serve from cache, fetch and store on miss.
  async fn cache_first(&self, request: &HttpRequest) -> Result<GatewayResponse> {
    let fingerprint = Fingerprint::for_request(&self.origin, request)?;

    if let Some(cached) = self.tiers.lookup(CacheTier::Static, &fingerprint)? {
      return Ok(GatewayResponse::cached(cached.to_response()));
    }

    let response = self.network.fetch(request).await?;
    if response.is_success() {
      self.tiers.put(CacheTier::Static, &fingerprint, &response)?;
    }
    Ok(GatewayResponse::network(response))
  }

  /// API payloads: prefer the network, fall back to the last stored copy.
  async fn network_first(&self, request: &HttpRequest) -> Result<GatewayResponse> {
    let fingerprint = Fingerprint::for_request(&self.origin, request)?;

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.tiers.put(CacheTier::Api, &fingerprint, &response)?;
        }
        Ok(GatewayResponse::network(response))
      }
      Err(e) if e.is_network() => {
        if let Some(cached) = self.tiers.lookup(CacheTier::Api, &fingerprint)? {
          tracing::info!(url = %request.url, "Network unavailable, serving cached API response");
          return Ok(GatewayResponse::cached(cached.to_response()));
        }

        let path = resolve_url(&self.origin, &request.url)?.path().to_string();
        if self.manifest.is_critical(&path) {
          tracing::info!(%path, "Network unavailable, serving offline marker");
          return Ok(GatewayResponse {
            response: offline_marker(&path),
            source: ResponseSource::OfflineMarker,
          });
        }

        Err(e)
      }
      Err(e) => Err(e),
    }
  }

  /// Documents: answer from cache at once and refresh in the background.
  async fn stale_while_revalidate(&self, request: &HttpRequest) -> Result<GatewayResponse> {
    let fingerprint = Fingerprint::for_request(&self.origin, request)?;

    // Pages precached at install live in the static tier
    let cached = match self.tiers.lookup(CacheTier::Dynamic, &fingerprint)? {
      Some(hit) => Some(hit),
      None => self.tiers.lookup(CacheTier::Static, &fingerprint)?,
    };

    if let Some(cached) = cached {
      self.revalidate(request.clone(), fingerprint);
      return Ok(GatewayResponse::cached(cached.to_response()));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.tiers.put(CacheTier::Dynamic, &fingerprint, &response)?;
        }
        Ok(GatewayResponse::network(response))
      }
      Err(e) if e.is_network() => {
        tracing::info!(url = %request.url, "Network unavailable, serving offline document");
        Ok(GatewayResponse {
          response: self.offline_document()?,
          source: ResponseSource::OfflineDocument,
        })
      }
      Err(e) => Err(e),
    }
  }

  fn revalidate(&self, request: HttpRequest, fingerprint: Fingerprint) {
    let tiers = self.tiers.clone();
    let network = Arc::clone(&self.network);
    let task = async move {
      match network.fetch(&request).await {
        Ok(response) if response.is_success() => {
          if let Err(e) = tiers.put(CacheTier::Dynamic, &fingerprint, &response) {
            tracing::warn!(url = %request.url, error = %e, "Failed to store revalidated page");
          }
        }
        Ok(response) => {
          tracing::debug!(url = %request.url, status = response.status, "Revalidation not stored");
        }
        Err(e) => {
          tracing::debug!(url = %request.url, error = %e, "Revalidation failed");
        }
      }
    };

    match self.background.lock() {
      Ok(mut set) => {
        // Reap finished refreshes so a long-running worker doesn't accumulate them
        while set.try_join_next().is_some() {}
        set.spawn(task);
      }
      Err(e) => tracing::warn!(error = %e, "Background task set poisoned, revalidation skipped"),
    }
  }

  fn offline_document(&self) -> Result<HttpResponse> {
    let url = resolve_url(&self.origin, &self.manifest.offline_document)?;
    let fingerprint = Fingerprint::new("GET", &url);

    match self.tiers.lookup(CacheTier::Static, &fingerprint)? {
      Some(cached) => Ok(cached.to_response()),
      None => Ok(
        HttpResponse::html(503, FALLBACK_OFFLINE_PAGE).with_header(OFFLINE_HEADER, "offline-document"),
      ),
    }
  }
}

fn offline_marker(path: &str) -> HttpResponse {
  HttpResponse::json(
    200,
    &json!({
      "offline": true,
      "resource": path,
      "message": "Offline: showing no data until the connection returns",
    }),
  )
  .with_header(OFFLINE_HEADER, "offline-marker")
}
