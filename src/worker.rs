//! Event dispatch: one handler per event kind, wired over the components.

use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::cache::{CacheStore, CacheTier, CacheTiers};
use crate::error::{OfflineError, Result};
use crate::event::{Event, EventKind, HostMessage};
use crate::gateway::{Gateway, GatewayResponse};
use crate::http::Network;
use crate::lifecycle::{ActivateReport, InstallReport, LifecycleController};
use crate::manifest::Manifest;
use crate::notify::{
  Clients, Interaction, Notification, NotificationDefaults, NotificationDispatcher, Notifier,
  PushPayload,
};
use crate::queue::MutationQueue;
use crate::refresh::{PeriodicRefresher, RefreshReport};
use crate::replay::{ReplayCoordinator, SyncOutcome};

pub type Handler = for<'a> fn(&'a Worker, Event) -> BoxFuture<'a, Result<EventOutcome>>;

#[derive(Debug, Clone)]
pub enum EventOutcome {
  Installed {
    install: InstallReport,
    activated: Option<ActivateReport>,
  },
  Activated(ActivateReport),
  Response(GatewayResponse),
  Notified(Notification),
  Interaction(Interaction),
  Synced(SyncOutcome),
  Refreshed(Option<RefreshReport>),
  Warmed(usize),
  /// Accepted, nothing to report yet
  Ack,
}

impl EventOutcome {
  /// One-line JSON summary written back to the host.
  pub fn summary(&self) -> Value {
    match self {
      EventOutcome::Installed { install, activated } => json!({
        "outcome": "installed",
        "precached": install.precached,
        "prewarmed": install.prewarmed,
        "activated": activated.is_some(),
      }),
      EventOutcome::Activated(report) => json!({
        "outcome": "activated",
        "evicted": report.evicted,
        "claimed": report.claimed,
      }),
      EventOutcome::Response(res) => json!({
        "outcome": "response",
        "status": res.response.status,
        "source": format!("{:?}", res.source).to_lowercase(),
        "headers": res.response.headers,
        "body": res.response.text(),
      }),
      EventOutcome::Notified(n) => json!({
        "outcome": "notified",
        "notification": n,
      }),
      EventOutcome::Interaction(i) => json!({
        "outcome": "interaction",
        "result": format!("{:?}", i),
      }),
      EventOutcome::Synced(SyncOutcome::Drained(report)) => json!({
        "outcome": "drained",
        "replayed": report.replayed,
        "failed": report.failed,
      }),
      EventOutcome::Synced(other) => json!({
        "outcome": format!("{:?}", other).to_lowercase(),
      }),
      EventOutcome::Refreshed(Some(report)) => json!({
        "outcome": "refreshed",
        "refreshed": report.refreshed,
        "failed": report.failed,
      }),
      EventOutcome::Refreshed(None) => json!({ "outcome": "ignored" }),
      EventOutcome::Warmed(count) => json!({ "outcome": "warmed", "stored": count }),
      EventOutcome::Ack => json!({ "outcome": "ack" }),
    }
  }
}

/// Capabilities and settings the worker is assembled from.
pub struct WorkerParts {
  pub store: Arc<dyn CacheStore>,
  pub queue: Arc<dyn MutationQueue>,
  pub network: Arc<dyn Network>,
  pub notifier: Arc<dyn Notifier>,
  pub clients: Arc<dyn Clients>,
  pub manifest: Arc<Manifest>,
  pub origin: Url,
  pub notifications: NotificationDefaults,
  /// Activate right after install instead of waiting
  pub skip_waiting: bool,
}

pub struct Worker {
  tiers: CacheTiers,
  queue: Arc<dyn MutationQueue>,
  gateway: Gateway,
  replay: ReplayCoordinator,
  refresher: PeriodicRefresher,
  lifecycle: LifecycleController,
  notifier: Arc<dyn Notifier>,
  clients: Arc<dyn Clients>,
  notifications: NotificationDefaults,
  origin: Url,
  skip_waiting: bool,
  routes: HashMap<EventKind, Handler>,
}

impl Worker {
  pub fn new(parts: WorkerParts) -> Result<Self> {
    let tiers = CacheTiers::new(parts.store, parts.manifest.version);

    let gateway = Gateway::new(
      tiers.clone(),
      Arc::clone(&parts.network),
      Arc::clone(&parts.manifest),
      parts.origin.clone(),
    );
    let replay = ReplayCoordinator::new(Arc::clone(&parts.queue), Arc::clone(&parts.network));
    let refresher = PeriodicRefresher::new(
      tiers.clone(),
      Arc::clone(&parts.network),
      parts.origin.clone(),
      parts.manifest.refresh_paths.clone(),
    );
    let lifecycle = LifecycleController::new(
      tiers.clone(),
      parts.network,
      Arc::clone(&parts.clients),
      parts.manifest,
      parts.origin.clone(),
    )?;

    let mut routes: HashMap<EventKind, Handler> = HashMap::new();
    routes.insert(EventKind::Install, on_install);
    routes.insert(EventKind::Activate, on_activate);
    routes.insert(EventKind::Fetch, on_fetch);
    routes.insert(EventKind::Push, on_push);
    routes.insert(EventKind::NotificationClick, on_notification_click);
    routes.insert(EventKind::Message, on_message);
    routes.insert(EventKind::Sync, on_sync);
    routes.insert(EventKind::PeriodicSync, on_periodic_sync);

    Ok(Self {
      tiers,
      queue: parts.queue,
      gateway,
      replay,
      refresher,
      lifecycle,
      notifier: parts.notifier,
      clients: parts.clients,
      notifications: parts.notifications,
      origin: parts.origin,
      skip_waiting: parts.skip_waiting,
      routes,
    })
  }

  pub async fn dispatch(&self, event: Event) -> Result<EventOutcome> {
    let kind = event.kind();
    let handler = self
      .routes
      .get(&kind)
      .ok_or(OfflineError::UnhandledEvent(kind.as_str()))?;
    handler(self, event).await
  }

  /// Wait for background cache refreshes started by earlier fetches.
  pub async fn settle(&self) {
    self.gateway.settle().await
  }

  pub fn tiers(&self) -> &CacheTiers {
    &self.tiers
  }

  pub fn queue(&self) -> &dyn MutationQueue {
    self.queue.as_ref()
  }

  fn notifications(&self) -> NotificationDispatcher<'_> {
    NotificationDispatcher::new(
      &self.notifications,
      &self.origin,
      self.notifier.as_ref(),
      self.clients.as_ref(),
    )
  }

  async fn activate_if_requested(&self) -> Result<Option<ActivateReport>> {
    if self.lifecycle.skip_waiting()? {
      return self.lifecycle.activate().await.map(Some);
    }
    Ok(None)
  }
}

fn on_install(worker: &Worker, _event: Event) -> BoxFuture<'_, Result<EventOutcome>> {
  Box::pin(async move {
    let install = worker.lifecycle.install().await?;
    let activated = if worker.skip_waiting || worker.lifecycle.wants_immediate_activation() {
      worker.activate_if_requested().await?
    } else {
      None
    };
    Ok(EventOutcome::Installed { install, activated })
  })
}

fn on_activate(worker: &Worker, _event: Event) -> BoxFuture<'_, Result<EventOutcome>> {
  Box::pin(async move { worker.lifecycle.activate().await.map(EventOutcome::Activated) })
}

fn on_fetch(worker: &Worker, event: Event) -> BoxFuture<'_, Result<EventOutcome>> {
  Box::pin(async move {
    let Event::Fetch { request } = event else {
      return Err(OfflineError::UnhandledEvent("fetch"));
    };
    worker.gateway.handle(&request).await.map(EventOutcome::Response)
  })
}

fn on_push(worker: &Worker, event: Event) -> BoxFuture<'_, Result<EventOutcome>> {
  Box::pin(async move {
    let Event::Push { data } = event else {
      return Err(OfflineError::UnhandledEvent("push"));
    };
    let payload = match data {
      Value::Null => PushPayload::default(),
      Value::String(text) => PushPayload::parse(&text),
      other => PushPayload::parse(&other.to_string()),
    };
    worker
      .notifications()
      .render(payload)
      .await
      .map(EventOutcome::Notified)
  })
}

fn on_notification_click(worker: &Worker, event: Event) -> BoxFuture<'_, Result<EventOutcome>> {
  Box::pin(async move {
    let Event::NotificationClick { action, metadata } = event else {
      return Err(OfflineError::UnhandledEvent("notification_click"));
    };
    worker
      .notifications()
      .on_interaction(action.as_deref(), &metadata)
      .await
      .map(EventOutcome::Interaction)
  })
}

fn on_message(worker: &Worker, event: Event) -> BoxFuture<'_, Result<EventOutcome>> {
  Box::pin(async move {
    let Event::Message { message } = event else {
      return Err(OfflineError::UnhandledEvent("message"));
    };
    match message {
      HostMessage::ForceActivate => match worker.activate_if_requested().await? {
        Some(report) => Ok(EventOutcome::Activated(report)),
        // Activation follows as soon as install completes
        None => Ok(EventOutcome::Ack),
      },
      HostMessage::WarmUrls { paths } => {
        let stored = worker.lifecycle.warm(CacheTier::Dynamic, &paths).await;
        Ok(EventOutcome::Warmed(stored))
      }
    }
  })
}

fn on_sync(worker: &Worker, event: Event) -> BoxFuture<'_, Result<EventOutcome>> {
  Box::pin(async move {
    let Event::Sync { tag } = event else {
      return Err(OfflineError::UnhandledEvent("sync"));
    };
    worker.replay.on_sync(&tag).await.map(EventOutcome::Synced)
  })
}

fn on_periodic_sync(worker: &Worker, event: Event) -> BoxFuture<'_, Result<EventOutcome>> {
  Box::pin(async move {
    let Event::PeriodicSync { tag } = event else {
      return Err(OfflineError::UnhandledEvent("periodic_sync"));
    };
    Ok(EventOutcome::Refreshed(worker.refresher.on_periodic(&tag).await))
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{Fingerprint, SqliteStorage};
  use crate::gateway::ResponseSource;
  use crate::http::{HttpRequest, HttpResponse};
  use crate::queue::SqliteQueue;
  use crate::refresh::REFRESH_TAG;
  use crate::replay::SYNC_TAG;
  use crate::testing::{origin, FakeClients, FakeNetwork, FakeNotifier};
  use std::time::Duration;

  struct Harness {
    worker: Worker,
    network: Arc<FakeNetwork>,
    store: Arc<dyn CacheStore>,
    notifier: Arc<FakeNotifier>,
  }

  fn harness(version: u32, skip_waiting: bool) -> Harness {
    let store: Arc<dyn CacheStore> = Arc::new(SqliteStorage::in_memory().unwrap());
    harness_with_store(Arc::clone(&store), version, skip_waiting)
  }

  fn harness_with_store(store: Arc<dyn CacheStore>, version: u32, skip_waiting: bool) -> Harness {
    let network = FakeNetwork::new();
    let notifier = Arc::new(FakeNotifier::default());
    let manifest = Manifest {
      version,
      ..Manifest::builtin()
    };
    let worker = Worker::new(WorkerParts {
      store: Arc::clone(&store),
      queue: Arc::new(SqliteQueue::in_memory().unwrap()),
      network: network.clone(),
      notifier: notifier.clone(),
      clients: Arc::new(FakeClients::default()),
      manifest: Arc::new(manifest),
      origin: origin(),
      notifications: NotificationDefaults::default(),
      skip_waiting,
    })
    .unwrap();

    Harness {
      worker,
      network,
      store,
      notifier,
    }
  }

  #[test]
  fn test_every_event_kind_has_a_handler() {
    let h = harness(1, false);
    for kind in EventKind::ALL {
      assert!(h.worker.routes.contains_key(&kind), "missing {:?}", kind);
    }
  }

  #[tokio::test]
  async fn test_install_with_skip_waiting_activates() {
    let h = harness(2, true);
    h.store.open("static-v1").unwrap();

    let outcome = h.worker.dispatch(Event::Install).await.unwrap();

    let EventOutcome::Installed { activated, .. } = outcome else {
      panic!("expected install outcome");
    };
    assert_eq!(activated.unwrap().evicted, vec!["static-v1".to_string()]);
  }

  #[tokio::test]
  async fn test_install_without_skip_waiting_waits() {
    let h = harness(2, false);
    h.store.open("static-v1").unwrap();

    let outcome = h.worker.dispatch(Event::Install).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Installed { activated: None, .. }));
    assert!(h.store.generation_names().unwrap().contains("static-v1"));

    let outcome = h
      .worker
      .dispatch(Event::Message {
        message: HostMessage::ForceActivate,
      })
      .await
      .unwrap();
    assert!(matches!(outcome, EventOutcome::Activated(_)));
    assert!(!h.store.generation_names().unwrap().contains("static-v1"));
  }

  #[tokio::test]
  async fn test_force_activate_before_install_defers() {
    let h = harness(1, false);

    let outcome = h
      .worker
      .dispatch(Event::Message {
        message: HostMessage::ForceActivate,
      })
      .await
      .unwrap();
    assert!(matches!(outcome, EventOutcome::Ack));

    let outcome = h.worker.dispatch(Event::Install).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Installed { activated: Some(_), .. }));
  }

  #[tokio::test]
  async fn test_warm_urls_message_fills_dynamic_tier() {
    let h = harness(1, false);

    let outcome = h
      .worker
      .dispatch(Event::Message {
        message: HostMessage::WarmUrls {
          paths: vec!["/reports".to_string(), "/orders".to_string()],
        },
      })
      .await
      .unwrap();

    assert!(matches!(outcome, EventOutcome::Warmed(2)));
    assert_eq!(h.worker.tiers().keys("dynamic-v1").unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_fetch_event_goes_through_gateway() {
    let h = harness(1, false);
    let fetch = Event::Fetch {
      request: HttpRequest::get("/static/js/app.js"),
    };

    h.worker.dispatch(fetch.clone()).await.unwrap();
    let outcome = h.worker.dispatch(fetch).await.unwrap();

    let EventOutcome::Response(res) = outcome else {
      panic!("expected response");
    };
    assert_eq!(res.source, ResponseSource::Cache);
    assert_eq!(h.network.call_count(), 1);
  }

  #[tokio::test]
  async fn test_settle_finishes_page_refresh() {
    let h = harness(1, false);
    let url = Url::parse("https://app.example.com/dashboard").unwrap();
    let fingerprint = Fingerprint::new("GET", &url);
    h.worker
      .tiers()
      .put(CacheTier::Dynamic, &fingerprint, &HttpResponse::html(200, "old"))
      .unwrap();
    h.network.set_delay(Duration::from_millis(20));
    h.network.respond("/dashboard", HttpResponse::html(200, "new"));

    let fetch = Event::Fetch {
      request: HttpRequest::get("/dashboard"),
    };
    h.worker.dispatch(fetch).await.unwrap();
    h.worker.settle().await;

    let refreshed = h.worker.tiers().lookup(CacheTier::Dynamic, &fingerprint).unwrap().unwrap();
    assert_eq!(refreshed.body, b"new");
  }

  #[tokio::test]
  async fn test_sync_event_drains_queue() {
    let h = harness(1, false);
    h.worker
      .queue()
      .append(&HttpRequest::new("POST", "/api/orders").with_body(r#"{"qty":5}"#))
      .unwrap();

    let outcome = h
      .worker
      .dispatch(Event::Sync {
        tag: SYNC_TAG.to_string(),
      })
      .await
      .unwrap();

    assert_eq!(outcome.summary()["outcome"], json!("drained"));
    assert!(h.worker.queue().list_all().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_periodic_sync_refreshes_api_tier() {
    let h = harness(1, false);

    let outcome = h
      .worker
      .dispatch(Event::PeriodicSync {
        tag: REFRESH_TAG.to_string(),
      })
      .await
      .unwrap();

    let EventOutcome::Refreshed(Some(report)) = outcome else {
      panic!("expected refresh report");
    };
    assert_eq!(report.refreshed.len(), Manifest::builtin().refresh_paths.len());
    assert_eq!(
      h.worker.tiers().keys("api-v1").unwrap().len(),
      report.refreshed.len()
    );
  }

  #[tokio::test]
  async fn test_push_event_renders_text_payload() {
    let h = harness(1, false);

    h.worker
      .dispatch(Event::Push {
        data: Value::String("Stock is low".to_string()),
      })
      .await
      .unwrap();

    let shown = h.notifier.shown();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].body, "Stock is low");
    assert_eq!(shown[0].title, NotificationDefaults::default().title);
  }

  #[tokio::test]
  async fn test_push_event_renders_object_payload() {
    let h = harness(1, false);

    h.worker
      .dispatch(Event::Push {
        data: json!({"title": "Order shipped", "metadata": {"url": "/orders/7"}}),
      })
      .await
      .unwrap();

    let shown = h.notifier.shown();
    assert_eq!(shown[0].title, "Order shipped");
    assert_eq!(shown[0].metadata, json!({"url": "/orders/7"}));
  }
}
