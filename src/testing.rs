//! Recording fakes for the host-facing capabilities.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::error::{OfflineError, Result};
use crate::http::{resolve_url, HttpRequest, HttpResponse, Network};
use crate::notify::{ClientWindow, Clients, Notification, Notifier};

pub const ORIGIN: &str = "https://app.example.com/";

pub fn origin() -> Url {
  Url::parse(ORIGIN).unwrap()
}

/// Network that records every request. Unknown paths answer 200 with the path
/// as body; `respond` and `fail` override individual paths.
#[derive(Default)]
pub struct FakeNetwork {
  offline: AtomicBool,
  routes: Mutex<HashMap<String, HttpResponse>>,
  failing: Mutex<HashSet<String>>,
  calls: Mutex<Vec<HttpRequest>>,
  delay: Mutex<Option<Duration>>,
}

impl FakeNetwork {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn set_online(&self, online: bool) {
    self.offline.store(!online, Ordering::SeqCst);
  }

  pub fn respond(&self, path: &str, response: HttpResponse) {
    self.routes.lock().unwrap().insert(path.to_string(), response);
  }

  /// Hold every response back for `delay`.
  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  pub fn fail(&self, path: &str) {
    self.failing.lock().unwrap().insert(path.to_string());
  }

  pub fn calls(&self) -> Vec<HttpRequest> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn calls_to(&self, path: &str) -> usize {
    self
      .calls()
      .iter()
      .filter(|r| path_of(&r.url) == path)
      .count()
  }
}

fn path_of(raw: &str) -> String {
  let url = resolve_url(&origin(), raw).unwrap();
  match url.query() {
    Some(q) => format!("{}?{}", url.path(), q),
    None => url.path().to_string(),
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse> {
    self.calls.lock().unwrap().push(request.clone());
    let path = path_of(&request.url);

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    if self.offline.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&path) {
      return Err(OfflineError::NetworkUnavailable(format!("offline: {}", path)));
    }

    let response = self.routes.lock().unwrap().get(&path).cloned();
    Ok(response.unwrap_or_else(|| HttpResponse::new(200, path)))
  }
}

#[derive(Default)]
pub struct FakeNotifier {
  shown: Mutex<Vec<Notification>>,
}

impl FakeNotifier {
  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap().clone()
  }
}

#[async_trait]
impl Notifier for FakeNotifier {
  async fn show(&self, notification: &Notification) -> Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }
}

#[derive(Default)]
pub struct FakeClients {
  windows: Mutex<Vec<ClientWindow>>,
  focused: Mutex<Vec<String>>,
  opened: Mutex<Vec<String>>,
  claims: AtomicUsize,
}

impl FakeClients {
  pub fn with_windows(windows: &[(&str, &str)]) -> Self {
    let clients = Self::default();
    *clients.windows.lock().unwrap() = windows
      .iter()
      .map(|(id, url)| ClientWindow {
        id: id.to_string(),
        url: url.to_string(),
      })
      .collect();
    clients
  }

  pub fn focused(&self) -> Vec<String> {
    self.focused.lock().unwrap().clone()
  }

  pub fn opened(&self) -> Vec<String> {
    self.opened.lock().unwrap().clone()
  }

  pub fn claims(&self) -> usize {
    self.claims.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Clients for FakeClients {
  async fn match_all(&self) -> Result<Vec<ClientWindow>> {
    Ok(self.windows.lock().unwrap().clone())
  }

  async fn focus(&self, id: &str) -> Result<()> {
    self.focused.lock().unwrap().push(id.to_string());
    Ok(())
  }

  async fn open_window(&self, url: &str) -> Result<()> {
    self.opened.lock().unwrap().push(url.to_string());
    Ok(())
  }

  async fn claim(&self) -> Result<usize> {
    self.claims.fetch_add(1, Ordering::SeqCst);
    Ok(self.windows.lock().unwrap().len())
  }
}
