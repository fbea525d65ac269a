use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::store::DocumentStore;

/// Online/offline signal.
///
/// Readable on demand, and subscribers are woken only on real transitions.
/// Clones share the same state.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record the current state. Returns true if this was a transition.
  pub fn set_online(&self, online: bool) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });

    if changed {
      if online {
        tracing::info!("connectivity restored");
      } else {
        tracing::warn!("connectivity lost");
      }
    }
    changed
  }

  /// Receiver that sees every transition from now on.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  /// Periodically ping the store and record whether it answered.
  pub fn spawn_probe(&self, store: Arc<dyn DocumentStore>, interval: Duration) -> JoinHandle<()> {
    let connectivity = self.clone();

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

      loop {
        ticker.tick().await;
        let online = match store.ping().await {
          Ok(()) => true,
          Err(e) => {
            tracing::debug!(error = %e, "store ping failed");
            false
          }
        };
        connectivity.set_online(online);
      }
    })
  }
}
