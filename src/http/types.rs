use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use crate::error::{OfflineError, Result};

/// An outbound request as issued by the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
  #[serde(default = "default_method")]
  pub method: String,
  pub url: String,
  /// Header names are kept lower-case.
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
  /// Fetch destination hint ("document", "script", "style", "image", ...).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub destination: Option<String>,
}

fn default_method() -> String {
  "GET".to_string()
}

impl HttpRequest {
  pub fn new(method: &str, url: impl Into<String>) -> Self {
    Self {
      method: method.to_uppercase(),
      url: url.into(),
      headers: BTreeMap::new(),
      body: None,
      destination: None,
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new("GET", url)
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_lowercase(), value.into());
    self
  }

  pub fn with_body(mut self, body: impl Into<String>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn with_destination(mut self, destination: &str) -> Self {
    self.destination = Some(destination.to_string());
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A response from the network or from a cache tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self::new(status, value.to_string()).with_header("content-type", "application/json")
  }

  pub fn html(status: u16, page: &str) -> Self {
    Self::new(status, page).with_header("content-type", "text/html; charset=utf-8")
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_lowercase(), value.into());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Network capability. Transport failures surface as `NetworkUnavailable`;
/// any HTTP status, including errors, is a successful fetch.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Resolve a possibly-relative URL against the application origin.
pub fn resolve_url(origin: &Url, raw: &str) -> Result<Url> {
  origin.join(raw).map_err(|e| OfflineError::InvalidUrl {
    url: raw.to_string(),
    reason: e.to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_request_headers_are_case_insensitive() {
    let req = HttpRequest::get("/").with_header("Accept", "text/html");
    assert_eq!(req.header("accept"), Some("text/html"));
    assert_eq!(req.header("ACCEPT"), Some("text/html"));
  }

  #[test]
  fn test_request_deserializes_with_defaults() {
    let req: HttpRequest = serde_json::from_str(r#"{"url": "/api/me"}"#).unwrap();
    assert!(req.is_get());
    assert!(req.headers.is_empty());
    assert_eq!(req.body, None);
  }

  #[test]
  fn test_resolve_relative_and_absolute() {
    let origin = Url::parse("https://app.example.com/").unwrap();
    assert_eq!(
      resolve_url(&origin, "/api/orders?x=1").unwrap().as_str(),
      "https://app.example.com/api/orders?x=1"
    );
    assert_eq!(
      resolve_url(&origin, "https://cdn.example.net/a.js").unwrap().as_str(),
      "https://cdn.example.net/a.js"
    );
  }

  #[test]
  fn test_success_range() {
    assert!(HttpResponse::new(204, "").is_success());
    assert!(!HttpResponse::new(304, "").is_success());
    assert!(!HttpResponse::new(500, "").is_success());
  }
}
