use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::BTreeMap;
use url::Url;

use super::types::{resolve_url, HttpRequest, HttpResponse, Network};
use crate::error::{OfflineError, Result};

/// reqwest-backed network used outside of tests.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
  origin: Url,
}

impl HttpClient {
  pub fn new(origin: Url, user_agent: &str) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(user_agent)
      .build()
      .map_err(|e| OfflineError::NetworkUnavailable(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self { client, origin })
  }

  fn header_map(request: &HttpRequest) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
      match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
      ) {
        (Ok(name), Ok(value)) => {
          headers.insert(name, value);
        }
        _ => tracing::warn!(header = %name, "Dropping header that is not valid HTTP"),
      }
    }
    headers
  }
}

#[async_trait]
impl Network for HttpClient {
  async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse> {
    let url = resolve_url(&self.origin, &request.url)?;
    let method = Method::from_bytes(request.method.to_uppercase().as_bytes()).map_err(|e| {
      OfflineError::InvalidUrl {
        url: request.url.clone(),
        reason: format!("bad method {}: {}", request.method, e),
      }
    })?;

    let mut builder = self
      .client
      .request(method, url.clone())
      .headers(Self::header_map(request));
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| OfflineError::NetworkUnavailable(format!("{} {}: {}", request.method, url, e)))?;

    let status = response.status().as_u16();
    let headers: BTreeMap<String, String> = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| OfflineError::NetworkUnavailable(format!("reading body of {}: {}", url, e)))?;

    tracing::debug!(%url, status, "Fetched from network");

    Ok(HttpResponse {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}
