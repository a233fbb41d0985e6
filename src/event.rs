use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::http::HttpRequest;
use crate::refresh::REFRESH_TAG;

/// Messages the host application posts on the command channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
  /// Activate the installed version now
  ForceActivate,
  /// Pre-populate the dynamic tier with these paths
  WarmUrls { paths: Vec<String> },
}

/// Worker events, one JSON object per line on the host channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
  Install,
  Activate,
  Fetch {
    request: HttpRequest,
  },
  /// Raw push data: a JSON object or plain text
  Push {
    #[serde(default)]
    data: Value,
  },
  NotificationClick {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    metadata: Value,
  },
  Message {
    message: HostMessage,
  },
  /// Connectivity restored
  Sync {
    tag: String,
  },
  PeriodicSync {
    tag: String,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Install,
  Activate,
  Fetch,
  Push,
  NotificationClick,
  Message,
  Sync,
  PeriodicSync,
}

impl EventKind {
  #[cfg(test)]
  pub const ALL: [EventKind; 8] = [
    EventKind::Install,
    EventKind::Activate,
    EventKind::Fetch,
    EventKind::Push,
    EventKind::NotificationClick,
    EventKind::Message,
    EventKind::Sync,
    EventKind::PeriodicSync,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      EventKind::Install => "install",
      EventKind::Activate => "activate",
      EventKind::Fetch => "fetch",
      EventKind::Push => "push",
      EventKind::NotificationClick => "notification_click",
      EventKind::Message => "message",
      EventKind::Sync => "sync",
      EventKind::PeriodicSync => "periodic_sync",
    }
  }

  /// Lifecycle events run inline so activation never overlaps install.
  pub fn is_lifecycle(&self) -> bool {
    matches!(self, EventKind::Install | EventKind::Activate)
  }
}

impl Event {
  pub fn kind(&self) -> EventKind {
    match self {
      Event::Install => EventKind::Install,
      Event::Activate => EventKind::Activate,
      Event::Fetch { .. } => EventKind::Fetch,
      Event::Push { .. } => EventKind::Push,
      Event::NotificationClick { .. } => EventKind::NotificationClick,
      Event::Message { .. } => EventKind::Message,
      Event::Sync { .. } => EventKind::Sync,
      Event::PeriodicSync { .. } => EventKind::PeriodicSync,
    }
  }
}

pub fn parse_event(line: &str) -> serde_json::Result<Event> {
  serde_json::from_str(line)
}

/// Event handler that produces events from the host channel (stdin) and a
/// periodic refresh timer
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler firing the periodic trigger every `refresh_every`
  pub fn new(refresh_every: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn host channel reader
    let host_tx = tx.clone();
    tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) if line.trim().is_empty() => {}
          Ok(Some(line)) => match parse_event(&line) {
            Ok(event) => {
              if host_tx.send(event).is_err() {
                break;
              }
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring malformed event"),
          },
          Ok(None) => {
            tracing::info!("Host channel closed");
            break;
          }
          Err(e) => {
            tracing::error!(error = %e, "Failed to read host channel");
            break;
          }
        }
      }
    });

    // Spawn scheduler
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(refresh_every);
      // The first tick completes immediately
      interval.tick().await;
      loop {
        interval.tick().await;
        let event = Event::PeriodicSync {
          tag: REFRESH_TAG.to_string(),
        };
        if tx.send(event).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
