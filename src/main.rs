mod cache;
mod config;
mod db;
mod error;
mod event;
mod gateway;
mod http;
mod lifecycle;
mod manifest;
mod notify;
mod queue;
mod refresh;
mod replay;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::cache::{CacheStore, SqliteStorage};
use crate::event::{Event, EventHandler, EventKind, HostMessage};
use crate::http::{HttpClient, HttpRequest};
use crate::manifest::Manifest;
use crate::notify::{HeadlessClients, LogNotifier};
use crate::queue::{MutationQueue, SqliteQueue};
use crate::refresh::REFRESH_TAG;
use crate::replay::SYNC_TAG;
use crate::worker::{EventOutcome, Worker, WorkerParts};

#[derive(Parser, Debug)]
#[command(name = "offline-sync")]
#[command(about = "Offline-first request cache and mutation replay worker")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Application origin, overrides the config file
  #[arg(short, long)]
  origin: Option<String>,

  /// Keep the cache and queue in memory for this process only
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the static manifest and pre-warm API resources
  Install,
  /// Evict stale cache generations and claim open instances
  Activate,
  /// Issue a request through the interception gateway
  Fetch {
    url: String,
    /// Fetch destination hint (document, script, style, image, font)
    #[arg(long)]
    destination: Option<String>,
    #[arg(long)]
    accept: Option<String>,
  },
  /// Queue a mutation that could not be delivered
  Enqueue {
    method: String,
    url: String,
    #[arg(long)]
    body: Option<String>,
    /// Header as "Name: value", repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
  },
  /// Inspect or edit the mutation queue
  Queue {
    #[command(subcommand)]
    action: QueueCommand,
  },
  /// Replay queued mutations
  Drain,
  /// Refresh the periodic API resources
  Refresh,
  /// Render a push payload (JSON object or plain text)
  Push { data: String },
  /// Simulate a click on a notification
  Click {
    action: Option<String>,
    /// Target URL carried in the notification metadata
    #[arg(long)]
    url: Option<String>,
  },
  /// Post a command-channel message, e.g. '{"type":"FORCE_ACTIVATE"}'
  Message { json: String },
  /// Inspect cache generations
  Cache {
    #[command(subcommand)]
    action: CacheCommand,
  },
  /// Process newline-delimited JSON events from stdin until interrupted
  Run,
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  List,
  Remove { id: i64 },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// List generations, or the URLs stored in one
  List { generation: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    config::Config { origin, ..config }
  } else {
    config
  };

  let data_dir = config.data_dir()?;
  let _log_guard = init_logging(&data_dir)?;

  let origin = config.origin_url()?;
  let (store, queue): (Arc<dyn CacheStore>, Arc<dyn MutationQueue>) = if args.ephemeral {
    (
      Arc::new(SqliteStorage::in_memory()?),
      Arc::new(SqliteQueue::in_memory()?),
    )
  } else {
    let db_path = data_dir.join(db::DB_FILE);
    (
      Arc::new(SqliteStorage::open(&db_path)?),
      Arc::new(SqliteQueue::open(&db_path)?),
    )
  };

  let worker = Worker::new(WorkerParts {
    store,
    queue,
    network: Arc::new(HttpClient::new(origin.clone(), &config.user_agent)?),
    notifier: Arc::new(LogNotifier),
    clients: Arc::new(HeadlessClients::default()),
    manifest: Arc::new(Manifest::builtin()),
    origin,
    notifications: config.notifications.clone(),
    skip_waiting: config.skip_waiting,
  })?;

  match args.command {
    Command::Install => dispatch_once(&worker, Event::Install).await,
    Command::Activate => dispatch_once(&worker, Event::Activate).await,
    Command::Fetch {
      url,
      destination,
      accept,
    } => {
      let mut request = HttpRequest::get(url);
      if let Some(destination) = destination {
        request = request.with_destination(&destination);
      }
      if let Some(accept) = accept {
        request = request.with_header("accept", accept);
      }
      dispatch_once(&worker, Event::Fetch { request }).await
    }
    Command::Enqueue {
      method,
      url,
      body,
      headers,
    } => {
      let mut request = HttpRequest::new(&method, url);
      if let Some(body) = body {
        request = request.with_body(body);
      }
      for header in &headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Header must look like 'Name: value', got '{}'", header))?;
        request = request.with_header(name.trim(), value.trim());
      }
      let id = worker.queue().append(&request)?;
      println!("{}", json!({ "outcome": "queued", "id": id }));
      Ok(())
    }
    Command::Queue { action } => match action {
      QueueCommand::List => {
        for record in worker.queue().list_all()? {
          println!("{}", serde_json::to_string(&record)?);
        }
        Ok(())
      }
      QueueCommand::Remove { id } => {
        let removed = worker.queue().remove(id)?;
        println!("{}", json!({ "outcome": "removed", "id": id, "removed": removed }));
        Ok(())
      }
    },
    Command::Drain => {
      let event = Event::Sync {
        tag: SYNC_TAG.to_string(),
      };
      dispatch_once(&worker, event).await
    }
    Command::Refresh => {
      let event = Event::PeriodicSync {
        tag: REFRESH_TAG.to_string(),
      };
      dispatch_once(&worker, event).await
    }
    Command::Push { data } => {
      let event = Event::Push {
        data: Value::String(data),
      };
      dispatch_once(&worker, event).await
    }
    Command::Click { action, url } => {
      let metadata = url.map(|url| json!({ "url": url })).unwrap_or(Value::Null);
      dispatch_once(&worker, Event::NotificationClick { action, metadata }).await
    }
    Command::Message { json } => {
      let message: HostMessage =
        serde_json::from_str(&json).map_err(|e| eyre!("Invalid message '{}': {}", json, e))?;
      dispatch_once(&worker, Event::Message { message }).await
    }
    Command::Cache { action } => {
      let CacheCommand::List { generation } = action;
      match generation {
        Some(generation) => {
          for url in worker.tiers().keys(&generation)? {
            println!("{}", url);
          }
        }
        None => {
          let current = worker.tiers().current_generations();
          for name in worker.tiers().generation_names()? {
            let marker = if current.contains(&name) { "*" } else { " " };
            println!("{} {}", marker, name);
          }
        }
      }
      Ok(())
    }
    Command::Run => run(Arc::new(worker), config.refresh_interval()).await,
  }
}

/// Log to a daily file under the data directory; stdout carries command output.
fn init_logging(data_dir: &Path) -> Result<WorkerGuard> {
  let log_dir = data_dir.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "offline-sync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

async fn dispatch_once(worker: &Worker, event: Event) -> Result<()> {
  let outcome = worker.dispatch(event).await?;
  println!("{}", outcome.summary());
  // The runtime is dropped on return, which would cancel pending refreshes
  worker.settle().await;
  Ok(())
}

fn report(kind: EventKind, result: error::Result<EventOutcome>) {
  match result {
    Ok(outcome) => println!("{}", outcome.summary()),
    Err(e) => {
      tracing::warn!(event = kind.as_str(), error = %e, "Event failed");
      println!(
        "{}",
        json!({ "outcome": "error", "event": kind.as_str(), "error": e.to_string() })
      );
    }
  }
}

async fn run(worker: Arc<Worker>, refresh_every: Duration) -> Result<()> {
  let mut events = EventHandler::new(refresh_every);
  tracing::info!(?refresh_every, "Worker running");

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        tracing::info!("Interrupted, shutting down");
        break;
      }
      event = events.next() => {
        let Some(event) = event else { break };
        let kind = event.kind();

        if kind.is_lifecycle() {
          report(kind, worker.dispatch(event).await);
        } else {
          let worker = Arc::clone(&worker);
          tokio::spawn(async move {
            report(kind, worker.dispatch(event).await);
          });
        }
      }
    }
  }

  worker.settle().await;
  Ok(())
}
