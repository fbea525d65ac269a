mod assemble;
mod cache;
mod clock;
mod config;
mod connectivity;
mod logging;
mod queue;
mod store;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use assemble::types::{Event, EventStatus, ProfileChanges, RsvpStatus};
use assemble::{CachedAssembleClient, WriteOutcome};
use cache::TtlCache;
use clock::SystemClock;
use connectivity::Connectivity;
use queue::{LocalStorage, MemoryLocalStorage, OfflineQueue, QueueEvent, SqliteLocalStorage};
use store::{DocumentStore, RestDocumentStore};

#[derive(Parser, Debug)]
#[command(name = "assemble")]
#[command(about = "Cached reads and offline-tolerant writes for LCC Assemble")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/lcc-assemble/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep the offline queue in memory only
  #[arg(long)]
  ephemeral: bool,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show the offline queue
  Status,
  /// Check connectivity and replay queued writes once
  Sync,
  /// Replay queued writes whenever the store becomes reachable
  Watch,
  /// Show member profiles
  Profile { uids: Vec<String> },
  /// List events
  Events {
    /// upcoming, past or cancelled
    #[arg(short, long)]
    status: Option<EventStatus>,
  },
  /// Show one event
  Event { event_id: String },
  /// Mark an event as cancelled
  Cancel { event_id: String },
  /// Delete an event
  DeleteEvent { event_id: String },
  /// List all members
  Members,
  /// List a member's notifications
  Notifications { uid: String },
  /// Mark a notification as read
  Read { uid: String, notification_id: String },
  /// Record an RSVP
  Rsvp {
    event_id: String,
    uid: String,
    /// going, maybe or declined
    status: RsvpStatus,
  },
  /// Change a member's display name
  Rename { uid: String, display_name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose)?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let store: Arc<dyn DocumentStore> = Arc::new(RestDocumentStore::from_config(&config)?);
  let storage: Arc<dyn LocalStorage> = if args.ephemeral {
    Arc::new(MemoryLocalStorage::new())
  } else {
    match &config.storage.path {
      Some(path) => Arc::new(SqliteLocalStorage::open(path)?),
      None => Arc::new(SqliteLocalStorage::open_default()?),
    }
  };

  // Start from a real reachability check rather than assuming either state
  let connectivity = Connectivity::new(store.ping().await.is_ok());
  let queue = OfflineQueue::load(
    store.clone(),
    storage,
    connectivity.clone(),
    Arc::new(SystemClock),
  );
  let cache = TtlCache::new(config.cache.ttl_table());
  let client = CachedAssembleClient::new(store.clone(), cache, queue.clone(), connectivity.clone());

  match args.command {
    Command::Status => print_status(&queue),
    Command::Sync => {
      if !connectivity.is_online() {
        println!("Store unreachable; {} write(s) still queued", queue.status().queued);
        return Ok(());
      }
      let summary = client.sync().await;
      println!(
        "Replayed {} of {} queued write(s): {} will retry, {} dropped",
        summary.succeeded, summary.attempted, summary.retrying, summary.dropped
      );
    }
    Command::Watch => {
      let interval = Duration::from_secs(config.connectivity.probe_interval_secs);
      watch(&queue, &connectivity, store, interval).await?;
    }
    Command::Profile { uids } => {
      for profile in client.get_user_profiles(&uids).await? {
        println!("{}  {}", profile.uid, profile.display_name);
        if let Some(bio) = profile.bio {
          println!("    {}", bio);
        }
      }
    }
    Command::Events { status } => {
      for event in client.list_events(status).await? {
        print_event(&event);
      }
    }
    Command::Event { event_id } => match client.get_event(&event_id).await? {
      Some(event) => print_event(&event),
      None => println!("No event {}", event_id),
    },
    Command::Cancel { event_id } => {
      let Some(mut event) = client.get_event(&event_id).await? else {
        return Err(eyre!("No event {}", event_id));
      };
      event.status = EventStatus::Cancelled;
      let outcome = client.save_event(event).await?;
      print_outcome(&outcome);
    }
    Command::DeleteEvent { event_id } => {
      let outcome = client.delete_event(&event_id).await?;
      print_outcome(&outcome);
    }
    Command::Members => {
      for profile in client.member_directory().await? {
        println!("{}  {}", profile.uid, profile.display_name);
      }
    }
    Command::Notifications { uid } => {
      for notification in client.list_notifications(&uid).await? {
        println!(
          "{} {}  {}  {}",
          if notification.read { " " } else { "*" },
          notification.id,
          notification.created_at.format("%Y-%m-%d %H:%M"),
          notification.title
        );
      }
    }
    Command::Read {
      uid,
      notification_id,
    } => {
      let outcome = client.mark_notification_read(&uid, &notification_id).await?;
      print_outcome(&outcome);
    }
    Command::Rsvp {
      event_id,
      uid,
      status,
    } => {
      let outcome = client.set_rsvp(&event_id, &uid, status).await?;
      print_outcome(&outcome);
    }
    Command::Rename { uid, display_name } => {
      let changes = ProfileChanges {
        display_name: Some(display_name),
        ..Default::default()
      };
      let outcome = client.update_profile(&uid, changes).await?;
      print_outcome(&outcome);
    }
  }

  let stats = client.cache_stats();
  tracing::debug!(entries = stats.size, types = ?stats.types, "cache at exit");

  Ok(())
}

fn print_status(queue: &OfflineQueue) {
  let status = queue.status();
  println!(
    "{} queued write(s), store {}",
    status.queued,
    if status.processing { "reachable" } else { "unreachable" }
  );
  for op in queue.pending() {
    println!(
      "  {}  {:<6} {}/{}  retries={}  queued {}",
      op.id,
      op.kind,
      op.target_collection,
      op.payload.document_id(),
      op.retry_count,
      op.enqueued_at.format("%Y-%m-%d %H:%M:%S")
    );
  }
}

fn print_event(event: &Event) {
  println!(
    "{}  {}  {:<9}  {}",
    event.id,
    event.start_time.format("%Y-%m-%d %H:%M"),
    event.status.as_str(),
    event.title
  );
}

fn print_outcome(outcome: &WriteOutcome) {
  match outcome {
    WriteOutcome::Written => println!("Saved"),
    WriteOutcome::Queued(id) => println!("Store unreachable; queued as {}", id),
  }
}

/// Probe the store and replay on reconnect until Ctrl-C.
async fn watch(
  queue: &OfflineQueue,
  connectivity: &Connectivity,
  store: Arc<dyn DocumentStore>,
  interval: Duration,
) -> Result<()> {
  let mut events = queue.subscribe();
  let probe = connectivity.spawn_probe(store, interval);
  let replay = queue.spawn_replay_on_reconnect();

  // Anything restored from a previous run goes out right away if we can
  queue.process_queue().await;

  println!("Watching; {} write(s) queued. Ctrl-C to stop.", queue.status().queued);

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      event = events.recv() => match event {
        Ok(QueueEvent::Replayed { operation }) => println!(
          "Replayed {} ({} {}/{})",
          operation.id,
          operation.kind,
          operation.target_collection,
          operation.payload.document_id()
        ),
        Ok(QueueEvent::PermanentlyFailed { operation, error }) => println!(
          "Gave up on {} ({} {}/{}): {}",
          operation.id,
          operation.kind,
          operation.target_collection,
          operation.payload.document_id(),
          error
        ),
        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
          tracing::warn!(skipped = n, "missed queue events");
        }
        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
      },
    }
  }

  probe.abort();
  replay.abort();
  Ok(())
}
