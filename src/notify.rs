//! Push notification rendering and interaction routing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

use crate::error::Result;
use crate::http::resolve_url;

/// Action id that closes the notification without opening anything.
pub const DISMISS_ACTION: &str = "dismiss";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

/// Inbound push payload. Every field is optional and falls back to the
/// configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub icon: Option<String>,
  pub actions: Option<Vec<NotificationAction>>,
  pub metadata: Option<Value>,
}

impl PushPayload {
  /// Parse raw push data. Anything that is not a JSON object becomes the body text.
  pub fn parse(raw: &str) -> Self {
    match serde_json::from_str::<Value>(raw) {
      Ok(value @ Value::Object(_)) => serde_json::from_value(value).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Push payload has unexpected fields, using it as text");
        Self::text(raw)
      }),
      _ => Self::text(raw),
    }
  }

  fn text(raw: &str) -> Self {
    Self {
      body: Some(raw.trim().to_string()),
      ..Self::default()
    }
  }
}

/// Defaults a push payload is merged over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub actions: Vec<NotificationAction>,
  /// Action id -> path opened when that action is chosen
  pub routes: BTreeMap<String, String>,
}

impl Default for NotificationDefaults {
  fn default() -> Self {
    Self {
      title: "New activity".to_string(),
      body: "You have new updates.".to_string(),
      icon: "/static/icons/icon-192.png".to_string(),
      actions: vec![
        NotificationAction {
          action: "open".to_string(),
          title: "Open".to_string(),
          icon: None,
        },
        NotificationAction {
          action: DISMISS_ACTION.to_string(),
          title: "Dismiss".to_string(),
          icon: None,
        },
      ],
      routes: BTreeMap::from([("open".to_string(), "/notifications".to_string())]),
    }
  }
}

/// A fully resolved alert ready for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub actions: Vec<NotificationAction>,
  pub metadata: Value,
}

/// An open instance of the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindow {
  pub id: String,
  pub url: String,
}

/// Displays alerts to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn show(&self, notification: &Notification) -> Result<()>;
}

/// Open application instances controlled by this worker.
#[async_trait]
pub trait Clients: Send + Sync {
  async fn match_all(&self) -> Result<Vec<ClientWindow>>;
  async fn focus(&self, id: &str) -> Result<()>;
  async fn open_window(&self, url: &str) -> Result<()>;
  /// Take control of every open instance. Returns how many were claimed.
  async fn claim(&self) -> Result<usize>;
}

/// What an interaction resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
  Dismissed,
  Focused(String),
  Opened(String),
}

pub struct NotificationDispatcher<'a> {
  defaults: &'a NotificationDefaults,
  origin: &'a Url,
  notifier: &'a dyn Notifier,
  clients: &'a dyn Clients,
}

impl<'a> NotificationDispatcher<'a> {
  pub fn new(
    defaults: &'a NotificationDefaults,
    origin: &'a Url,
    notifier: &'a dyn Notifier,
    clients: &'a dyn Clients,
  ) -> Self {
    Self {
      defaults,
      origin,
      notifier,
      clients,
    }
  }

  /// Merge the payload over the defaults.
  pub fn compose(&self, payload: PushPayload) -> Notification {
    Notification {
      title: payload.title.unwrap_or_else(|| self.defaults.title.clone()),
      body: payload.body.unwrap_or_else(|| self.defaults.body.clone()),
      icon: payload.icon.unwrap_or_else(|| self.defaults.icon.clone()),
      actions: payload
        .actions
        .unwrap_or_else(|| self.defaults.actions.clone()),
      metadata: payload.metadata.unwrap_or(Value::Null),
    }
  }

  pub async fn render(&self, payload: PushPayload) -> Result<Notification> {
    let notification = self.compose(payload);
    self.notifier.show(&notification).await?;
    tracing::info!(title = %notification.title, "Displayed notification");
    Ok(notification)
  }

  /// Route a click on a notification (or one of its actions).
  pub async fn on_interaction(&self, action: Option<&str>, metadata: &Value) -> Result<Interaction> {
    match action {
      Some(DISMISS_ACTION) => {
        tracing::debug!("Notification dismissed");
        Ok(Interaction::Dismissed)
      }
      Some(action) if self.defaults.routes.contains_key(action) => {
        let route = &self.defaults.routes[action];
        let target = resolve_url(self.origin, route)?;
        self.open_or_focus(target.as_str()).await
      }
      _ => {
        let target = metadata
          .get("url")
          .and_then(Value::as_str)
          .unwrap_or("/");
        let target = resolve_url(self.origin, target)?;
        self.focus_any_or_open(target.as_str()).await
      }
    }
  }

  /// Focus the instance already showing `url`, or open one.
  async fn open_or_focus(&self, url: &str) -> Result<Interaction> {
    let windows = self.clients.match_all().await?;
    if let Some(window) = windows.iter().find(|w| w.url == url) {
      self.clients.focus(&window.id).await?;
      return Ok(Interaction::Focused(window.id.clone()));
    }
    self.clients.open_window(url).await?;
    Ok(Interaction::Opened(url.to_string()))
  }

  /// Focus any instance on our origin, or open `url`.
  async fn focus_any_or_open(&self, url: &str) -> Result<Interaction> {
    let windows = self.clients.match_all().await?;
    let same_origin = windows.iter().find(|w| {
      Url::parse(&w.url)
        .map(|u| u.origin() == self.origin.origin())
        .unwrap_or(false)
    });

    if let Some(window) = same_origin {
      self.clients.focus(&window.id).await?;
      return Ok(Interaction::Focused(window.id.clone()));
    }
    self.clients.open_window(url).await?;
    Ok(Interaction::Opened(url.to_string()))
  }
}

/// Notifier for headless runs: alerts go to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
  async fn show(&self, notification: &Notification) -> Result<()> {
    tracing::info!(
      title = %notification.title,
      body = %notification.body,
      actions = notification.actions.len(),
      "Notification"
    );
    Ok(())
  }
}

/// Client registry for headless runs. Instances are tracked in memory only.
#[derive(Default)]
pub struct HeadlessClients {
  windows: std::sync::Mutex<Vec<ClientWindow>>,
}

#[async_trait]
impl Clients for HeadlessClients {
  async fn match_all(&self) -> Result<Vec<ClientWindow>> {
    Ok(self.windows.lock().map(|w| w.clone()).unwrap_or_default())
  }

  async fn focus(&self, id: &str) -> Result<()> {
    tracing::info!(client = id, "Focus client");
    Ok(())
  }

  async fn open_window(&self, url: &str) -> Result<()> {
    tracing::info!(url, "Open client");
    if let Ok(mut windows) = self.windows.lock() {
      let id = format!("client-{}", windows.len() + 1);
      windows.push(ClientWindow {
        id,
        url: url.to_string(),
      });
    }
    Ok(())
  }

  async fn claim(&self) -> Result<usize> {
    Ok(self.windows.lock().map(|w| w.len()).unwrap_or(0))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{FakeClients, FakeNotifier};
  use serde_json::json;

  fn origin() -> Url {
    Url::parse("https://app.example.com/").unwrap()
  }

  #[test]
  fn test_parse_json_payload() {
    let payload = PushPayload::parse(r#"{"title": "Order shipped", "metadata": {"url": "/orders/7"}}"#);
    assert_eq!(payload.title.as_deref(), Some("Order shipped"));
    assert_eq!(payload.body, None);
    assert_eq!(payload.metadata, Some(json!({"url": "/orders/7"})));
  }

  #[test]
  fn test_parse_text_payload() {
    let payload = PushPayload::parse("plain words\n");
    assert_eq!(payload.body.as_deref(), Some("plain words"));
    assert_eq!(payload.title, None);
  }

  #[tokio::test]
  async fn test_render_merges_over_defaults() {
    let defaults = NotificationDefaults::default();
    let origin = origin();
    let notifier = FakeNotifier::default();
    let clients = FakeClients::default();
    let dispatcher = NotificationDispatcher::new(&defaults, &origin, &notifier, &clients);

    let shown = dispatcher
      .render(PushPayload {
        title: Some("Low stock".to_string()),
        ..PushPayload::default()
      })
      .await
      .unwrap();

    assert_eq!(shown.title, "Low stock");
    assert_eq!(shown.body, defaults.body);
    assert_eq!(shown.icon, defaults.icon);
    assert_eq!(shown.actions, defaults.actions);
    assert_eq!(notifier.shown(), vec![shown]);
  }

  #[tokio::test]
  async fn test_dismiss_does_nothing() {
    let defaults = NotificationDefaults::default();
    let origin = origin();
    let notifier = FakeNotifier::default();
    let clients = FakeClients::with_windows(&[("a", "https://app.example.com/")]);
    let dispatcher = NotificationDispatcher::new(&defaults, &origin, &notifier, &clients);

    let result = dispatcher.on_interaction(Some("dismiss"), &Value::Null).await.unwrap();

    assert_eq!(result, Interaction::Dismissed);
    assert!(clients.focused().is_empty());
    assert!(clients.opened().is_empty());
  }

  #[tokio::test]
  async fn test_route_action_focuses_existing_view() {
    let defaults = NotificationDefaults::default();
    let origin = origin();
    let notifier = FakeNotifier::default();
    let clients = FakeClients::with_windows(&[
      ("a", "https://app.example.com/"),
      ("b", "https://app.example.com/notifications"),
    ]);
    let dispatcher = NotificationDispatcher::new(&defaults, &origin, &notifier, &clients);

    let result = dispatcher.on_interaction(Some("open"), &Value::Null).await.unwrap();

    assert_eq!(result, Interaction::Focused("b".to_string()));
    assert_eq!(clients.focused(), vec!["b".to_string()]);
    assert!(clients.opened().is_empty());
  }

  #[tokio::test]
  async fn test_route_action_opens_when_not_open() {
    let defaults = NotificationDefaults::default();
    let origin = origin();
    let notifier = FakeNotifier::default();
    let clients = FakeClients::default();
    let dispatcher = NotificationDispatcher::new(&defaults, &origin, &notifier, &clients);

    let result = dispatcher.on_interaction(Some("open"), &Value::Null).await.unwrap();

    assert_eq!(
      result,
      Interaction::Opened("https://app.example.com/notifications".to_string())
    );
  }

  #[tokio::test]
  async fn test_default_tap_focuses_single_same_origin_instance() {
    let defaults = NotificationDefaults::default();
    let origin = origin();
    let notifier = FakeNotifier::default();
    let clients = FakeClients::with_windows(&[
      ("other", "https://elsewhere.example.org/"),
      ("mine", "https://app.example.com/reports"),
      ("mine-too", "https://app.example.com/orders"),
    ]);
    let dispatcher = NotificationDispatcher::new(&defaults, &origin, &notifier, &clients);

    let result = dispatcher.on_interaction(None, &Value::Null).await.unwrap();

    assert_eq!(result, Interaction::Focused("mine".to_string()));
    assert_eq!(clients.focused(), vec!["mine".to_string()]);
    assert!(clients.opened().is_empty());
  }

  #[tokio::test]
  async fn test_default_tap_opens_metadata_url() {
    let defaults = NotificationDefaults::default();
    let origin = origin();
    let notifier = FakeNotifier::default();
    let clients = FakeClients::with_windows(&[("other", "https://elsewhere.example.org/")]);
    let dispatcher = NotificationDispatcher::new(&defaults, &origin, &notifier, &clients);

    let result = dispatcher
      .on_interaction(Some("unknown"), &json!({"url": "/orders/7"}))
      .await
      .unwrap();

    assert_eq!(
      result,
      Interaction::Opened("https://app.example.com/orders/7".to_string())
    );
    assert_eq!(clients.opened(), vec!["https://app.example.com/orders/7".to_string()]);
  }
}
