//! Offline write queue and its replay driver.

use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::operation::{apply_write, OperationKind, Payload, QueuedOperation};
use super::storage::{load_queue, save_queue, LocalStorage};
use crate::clock::Clock;
use crate::connectivity::Connectivity;
use crate::store::DocumentStore;

/// Failed attempts after which an operation is dropped for good.
pub const MAX_RETRIES: u32 = 3;

/// Notifications about queued operations leaving the queue.
#[derive(Debug, Clone)]
pub enum QueueEvent {
  /// The operation was written to the store
  Replayed { operation: QueuedOperation },
  /// The operation failed `MAX_RETRIES` times and was dropped
  PermanentlyFailed {
    operation: QueuedOperation,
    error: String,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
  /// Operations waiting to be replayed
  pub queued: usize,
  /// Whether replay is currently allowed (i.e. we are online)
  pub processing: bool,
  /// Whether a replay pass is in flight right now
  pub replaying: bool,
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
  pub attempted: usize,
  pub succeeded: usize,
  /// Failed but kept for the next pass
  pub retrying: usize,
  /// Failed for the last time and dropped
  pub dropped: usize,
}

struct Inner {
  ops: Mutex<Vec<QueuedOperation>>,
  storage: Arc<dyn LocalStorage>,
  store: Arc<dyn DocumentStore>,
  connectivity: Connectivity,
  clock: Arc<dyn Clock>,
  replaying: AtomicBool,
  events: broadcast::Sender<QueueEvent>,
}

/// Ordered queue of writes made while the store was unreachable.
///
/// Every change is persisted to local storage. Clones share the same queue.
#[derive(Clone)]
pub struct OfflineQueue {
  inner: Arc<Inner>,
}

/// Clears the in-flight flag when a replay pass ends, however it ends.
struct ReplayGuard<'a>(&'a AtomicBool);

impl<'a> ReplayGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for ReplayGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl OfflineQueue {
  /// Create the queue, restoring whatever was persisted in `storage`.
  pub fn load(
    store: Arc<dyn DocumentStore>,
    storage: Arc<dyn LocalStorage>,
    connectivity: Connectivity,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let ops = load_queue(storage.as_ref());
    if !ops.is_empty() {
      tracing::info!(count = ops.len(), "restored offline queue");
    }

    let (events, _rx) = broadcast::channel(64);

    Self {
      inner: Arc::new(Inner {
        ops: Mutex::new(ops),
        storage,
        store,
        connectivity,
        clock,
        replaying: AtomicBool::new(false),
        events,
      }),
    }
  }

  fn ops(&self) -> MutexGuard<'_, Vec<QueuedOperation>> {
    self.inner.ops.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Queue a write and persist the queue. When online, a replay pass is
  /// started in the background; this call never waits for it.
  pub fn enqueue(&self, kind: OperationKind, payload: Payload) -> String {
    let op = QueuedOperation::new(kind, payload, self.inner.clock.now());
    let id = op.id.clone();

    tracing::info!(
      op_id = %id,
      kind = %op.kind,
      collection = %op.target_collection,
      "queued offline write"
    );

    {
      let mut ops = self.ops();
      ops.push(op);
      save_queue(self.inner.storage.as_ref(), &ops);
    }

    if self.inner.connectivity.is_online() {
      match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
          let queue = self.clone();
          handle.spawn(async move {
            queue.process_queue().await;
          });
        }
        Err(_) => tracing::debug!("no runtime, replay deferred to next trigger"),
      }
    }

    id
  }

  /// Replay every queued operation once, in enqueue order.
  ///
  /// No-op while offline or while another pass is running. A failing
  /// operation never stops the pass.
  pub async fn process_queue(&self) -> ReplaySummary {
    let mut summary = ReplaySummary::default();

    if !self.inner.connectivity.is_online() {
      tracing::debug!("offline, skipping replay");
      return summary;
    }

    let Some(_guard) = ReplayGuard::acquire(&self.inner.replaying) else {
      tracing::debug!("replay already in flight");
      return summary;
    };

    let snapshot = self.ops().clone();
    if snapshot.is_empty() {
      return summary;
    }

    tracing::info!(count = snapshot.len(), "replaying offline queue");

    for op in snapshot {
      summary.attempted += 1;
      match self.execute(&op).await {
        Ok(()) => {
          self.remove(&op.id);
          summary.succeeded += 1;
          tracing::info!(op_id = %op.id, kind = %op.kind, "replayed queued write");
          let _ = self.inner.events.send(QueueEvent::Replayed { operation: op });
        }
        Err(e) => {
          if self.record_failure(&op.id, &e.to_string()) {
            summary.dropped += 1;
          } else {
            summary.retrying += 1;
          }
        }
      }
    }

    summary
  }

  async fn execute(&self, op: &QueuedOperation) -> Result<()> {
    apply_write(
      self.inner.store.as_ref(),
      op.kind,
      &op.target_collection,
      &op.payload,
    )
    .await
  }

  fn remove(&self, id: &str) {
    let mut ops = self.ops();
    ops.retain(|op| op.id != id);
    save_queue(self.inner.storage.as_ref(), &ops);
  }

  /// Count a failed attempt. Returns true if the operation was dropped.
  fn record_failure(&self, id: &str, error: &str) -> bool {
    let dropped = {
      let mut ops = self.ops();
      let Some(pos) = ops.iter().position(|op| op.id == id) else {
        return false;
      };

      ops[pos].retry_count += 1;
      let retry_count = ops[pos].retry_count;

      let dropped = if retry_count >= MAX_RETRIES {
        Some(ops.remove(pos))
      } else {
        tracing::warn!(op_id = %id, retry_count, error, "queued write failed, will retry");
        None
      };
      save_queue(self.inner.storage.as_ref(), &ops);
      dropped
    };

    match dropped {
      Some(operation) => {
        tracing::error!(
          op_id = %operation.id,
          kind = %operation.kind,
          collection = %operation.target_collection,
          error,
          "queued write failed permanently, dropping"
        );
        let _ = self.inner.events.send(QueueEvent::PermanentlyFailed {
          operation,
          error: error.to_string(),
        });
        true
      }
      None => false,
    }
  }

  pub fn status(&self) -> QueueStatus {
    QueueStatus {
      queued: self.ops().len(),
      processing: self.inner.connectivity.is_online(),
      replaying: self.inner.replaying.load(Ordering::Acquire),
    }
  }

  /// Copy of the pending operations, oldest first.
  pub fn pending(&self) -> Vec<QueuedOperation> {
    self.ops().clone()
  }

  /// Receive replay and permanent-failure notifications.
  pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
    self.inner.events.subscribe()
  }

  /// Run a replay pass whenever connectivity comes back.
  ///
  /// The receiver only keeps the latest value, so an offline and online
  /// round trip between two wakeups shows up as a single change to online.
  /// Every wakeup that sees online therefore replays. Overlapping passes
  /// are already no-ops, and so is a pass over an empty queue.
  pub fn spawn_replay_on_reconnect(&self) -> JoinHandle<()> {
    let queue = self.clone();
    let mut rx = self.inner.connectivity.subscribe();
    // Mark the current state seen here, not in the task, so a transition
    // before the task's first poll still wakes it.
    rx.borrow_and_update();

    tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        if online {
          queue.process_queue().await;
        } else {
          tracing::debug!(queued = queue.status().queued, "offline, writes will be queued");
        }
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::assemble::types::{ProfileChanges, RsvpStatus, EVENTS, RSVPS, USERS};
  use crate::clock::ManualClock;
  use crate::queue::storage::MemoryLocalStorage;
  use crate::store::memory::{MemoryDocumentStore, StoreCall};
  use async_trait::async_trait;
  use serde_json::Value;
  use tokio::sync::Notify;

  struct Harness {
    store: Arc<MemoryDocumentStore>,
    storage: Arc<MemoryLocalStorage>,
    connectivity: Connectivity,
    queue: OfflineQueue,
  }

  impl Harness {
    /// Starts offline so enqueue never kicks off a background pass.
    fn new() -> Self {
      let store = Arc::new(MemoryDocumentStore::new());
      let storage = Arc::new(MemoryLocalStorage::new());
      let connectivity = Connectivity::new(false);
      let queue = OfflineQueue::load(
        store.clone(),
        storage.clone(),
        connectivity.clone(),
        Arc::new(ManualClock::default()),
      );
      Self {
        store,
        storage,
        connectivity,
        queue,
      }
    }

    fn reload(&self) -> OfflineQueue {
      OfflineQueue::load(
        self.store.clone(),
        self.storage.clone(),
        self.connectivity.clone(),
        Arc::new(ManualClock::default()),
      )
    }
  }

  fn rename(uid: &str, name: &str) -> Payload {
    Payload::Profile {
      uid: uid.to_string(),
      changes: ProfileChanges {
        display_name: Some(name.to_string()),
        ..Default::default()
      },
    }
  }

  fn set_call(collection: &str, id: &str, merge: bool) -> StoreCall {
    StoreCall::Set {
      collection: collection.to_string(),
      id: id.to_string(),
      merge,
    }
  }

  async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..100 {
      if done() {
        return;
      }
      tokio::task::yield_now().await;
    }
    panic!("condition not reached");
  }

  #[tokio::test]
  async fn test_persistence_survives_restart() {
    let h = Harness::new();
    h.queue.enqueue(OperationKind::Update, rename("u1", "Ada"));
    h.queue.enqueue(OperationKind::Update, rename("u2", "Grace"));
    h.queue.enqueue(OperationKind::Delete, Payload::EventRef {
      event_id: "e1".to_string(),
    });

    // One failed pass so the retry counters are non-zero
    h.store.set_unreachable(true);
    h.connectivity.set_online(true);
    h.queue.process_queue().await;

    let before = h.queue.pending();
    assert_eq!(before.len(), 3);
    assert!(before.iter().all(|op| op.retry_count == 1));

    let reloaded = h.reload();
    assert_eq!(reloaded.pending(), before);
  }

  #[tokio::test]
  async fn test_replay_preserves_enqueue_order() {
    let h = Harness::new();
    h.queue.enqueue(OperationKind::Update, rename("a", "A"));
    h.queue.enqueue(OperationKind::Create, rename("b", "B"));
    h.queue.enqueue(OperationKind::Delete, rename("c", "C"));

    h.connectivity.set_online(true);
    let summary = h.queue.process_queue().await;

    assert_eq!(summary.succeeded, 3);
    assert_eq!(
      h.store.writes(),
      vec![
        set_call(USERS, "a", true),
        set_call(USERS, "b", false),
        StoreCall::Delete(USERS.to_string(), "c".to_string()),
      ]
    );
    assert!(h.queue.pending().is_empty());
    assert!(h.reload().pending().is_empty());
  }

  #[tokio::test]
  async fn test_offline_process_is_noop() {
    let h = Harness::new();
    h.queue.enqueue(OperationKind::Update, rename("u1", "Ada"));
    let before = h.queue.pending();

    let summary = h.queue.process_queue().await;

    assert_eq!(summary, ReplaySummary::default());
    assert!(h.store.calls().is_empty());
    assert_eq!(h.queue.pending(), before);
  }

  #[tokio::test]
  async fn test_retry_exhaustion_drops_after_three_failures() {
    let h = Harness::new();
    let mut events = h.queue.subscribe();
    h.store.reject_writes_to("u1");
    let id = h.queue.enqueue(OperationKind::Update, rename("u1", "Ada"));
    h.connectivity.set_online(true);

    for expected_retries in 1..MAX_RETRIES {
      let summary = h.queue.process_queue().await;
      assert_eq!(summary.retrying, 1);
      assert_eq!(h.queue.pending()[0].retry_count, expected_retries);
    }

    let summary = h.queue.process_queue().await;
    assert_eq!(summary.dropped, 1);
    assert!(h.queue.pending().is_empty());
    assert!(h.reload().pending().is_empty());

    match events.try_recv().unwrap() {
      QueueEvent::PermanentlyFailed { operation, error } => {
        assert_eq!(operation.id, id);
        assert!(error.contains("permission denied"));
      }
      other => panic!("unexpected event {:?}", other),
    }

    // Never attempted a fourth time
    h.queue.process_queue().await;
    assert_eq!(h.store.writes().len(), 3);
  }

  #[tokio::test]
  async fn test_failure_does_not_abort_pass() {
    let h = Harness::new();
    h.store.reject_writes_to("bad");
    h.queue.enqueue(OperationKind::Update, rename("good1", "A"));
    h.queue.enqueue(OperationKind::Update, rename("bad", "B"));
    h.queue.enqueue(OperationKind::Update, rename("good2", "C"));
    h.connectivity.set_online(true);

    let summary = h.queue.process_queue().await;

    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.retrying, 1);
    let pending = h.queue.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload.document_id(), "bad");
  }

  #[tokio::test]
  async fn test_delete_targets_captured_identity() {
    let h = Harness::new();
    h.store.insert(EVENTS, "e1", serde_json::json!({ "id": "e1" }));
    h.store.insert(
      RSVPS,
      "e1_u1",
      serde_json::json!({ "eventId": "e1", "uid": "u1" }),
    );
    h.queue.enqueue(OperationKind::Delete, Payload::EventRef {
      event_id: "e1".to_string(),
    });
    h.queue.enqueue(OperationKind::Delete, Payload::Rsvp {
      event_id: "e1".to_string(),
      uid: "u1".to_string(),
      status: RsvpStatus::Declined,
    });
    h.connectivity.set_online(true);

    h.queue.process_queue().await;

    assert_eq!(h.store.doc(EVENTS, "e1"), None);
    assert_eq!(h.store.doc(RSVPS, "e1_u1"), None);
  }

  #[tokio::test]
  async fn test_update_merges_into_existing_document() {
    let h = Harness::new();
    h.store.insert(
      USERS,
      "u1",
      serde_json::json!({ "uid": "u1", "displayName": "Old", "bio": "keep" }),
    );
    h.queue.enqueue(OperationKind::Update, rename("u1", "New"));
    h.connectivity.set_online(true);

    h.queue.process_queue().await;

    assert_eq!(
      h.store.doc(USERS, "u1"),
      Some(serde_json::json!({ "uid": "u1", "displayName": "New", "bio": "keep" }))
    );
  }

  #[tokio::test]
  async fn test_enqueue_while_online_replays_in_background() {
    let h = Harness::new();
    h.connectivity.set_online(true);
    let mut events = h.queue.subscribe();

    let id = h.queue.enqueue(OperationKind::Update, rename("u1", "Ada"));

    wait_until(|| h.queue.pending().is_empty()).await;
    assert_eq!(h.store.writes(), vec![set_call(USERS, "u1", true)]);
    match events.recv().await.unwrap() {
      QueueEvent::Replayed { operation } => assert_eq!(operation.id, id),
      other => panic!("unexpected event {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_reconnect_triggers_replay() {
    let h = Harness::new();
    let listener = h.queue.spawn_replay_on_reconnect();
    h.queue.enqueue(OperationKind::Update, rename("u1", "Ada"));
    tokio::task::yield_now().await;
    assert!(h.store.calls().is_empty());

    h.connectivity.set_online(true);
    wait_until(|| h.queue.pending().is_empty()).await;
    assert_eq!(h.store.writes().len(), 1);

    // Going offline replays nothing
    h.connectivity.set_online(false);
    tokio::task::yield_now().await;
    assert_eq!(h.store.writes().len(), 1);

    listener.abort();
  }

  #[tokio::test]
  async fn test_reconnect_before_listener_first_runs() {
    let h = Harness::new();
    h.queue.enqueue(OperationKind::Update, rename("u1", "Ada"));
    let listener = h.queue.spawn_replay_on_reconnect();
    h.connectivity.set_online(true);

    wait_until(|| h.queue.pending().is_empty()).await;
    assert_eq!(h.store.writes(), vec![set_call(USERS, "u1", true)]);

    listener.abort();
  }

  #[tokio::test]
  async fn test_offline_online_round_trip_between_wakeups() {
    let h = Harness::new();
    h.connectivity.set_online(true);
    let listener = h.queue.spawn_replay_on_reconnect();
    tokio::task::yield_now().await;

    // Both transitions land before the listener wakes again
    h.connectivity.set_online(false);
    h.queue.enqueue(OperationKind::Update, rename("u1", "Ada"));
    h.connectivity.set_online(true);

    wait_until(|| h.queue.pending().is_empty()).await;
    assert_eq!(h.store.writes(), vec![set_call(USERS, "u1", true)]);

    listener.abort();
  }

  /// Store whose writes wait until released.
  struct GatedStore {
    gate: Notify,
    inner: MemoryDocumentStore,
  }

  #[async_trait]
  impl DocumentStore for GatedStore {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>> {
      self.inner.get_document(collection, id).await
    }

    async fn set_document(
      &self,
      collection: &str,
      id: &str,
      data: Value,
      merge: bool,
    ) -> Result<()> {
      self.gate.notified().await;
      self.inner.set_document(collection, id, data, merge).await
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
      self.inner.delete_document(collection, id).await
    }

    async fn query_collection(
      &self,
      collection: &str,
      filters: &[crate::store::Filter],
    ) -> Result<Vec<Value>> {
      self.inner.query_collection(collection, filters).await
    }

    async fn ping(&self) -> Result<()> {
      Ok(())
    }
  }

  #[tokio::test]
  async fn test_second_pass_is_noop_while_first_in_flight() {
    let store = Arc::new(GatedStore {
      gate: Notify::new(),
      inner: MemoryDocumentStore::new(),
    });
    let connectivity = Connectivity::new(false);
    let queue = OfflineQueue::load(
      store.clone(),
      Arc::new(MemoryLocalStorage::new()),
      connectivity.clone(),
      Arc::new(ManualClock::default()),
    );
    queue.enqueue(OperationKind::Update, rename("u1", "Ada"));
    connectivity.set_online(true);

    let first = tokio::spawn({
      let queue = queue.clone();
      async move { queue.process_queue().await }
    });
    wait_until(|| queue.status().replaying).await;

    let second = queue.process_queue().await;
    assert_eq!(second, ReplaySummary::default());

    store.gate.notify_one();
    let first = first.await.unwrap();
    assert_eq!(first.succeeded, 1);
    assert_eq!(store.inner.writes().len(), 1);
    assert!(!queue.status().replaying);
  }

  #[test]
  fn test_status_reflects_connectivity() {
    let h = Harness::new();
    h.queue.enqueue(OperationKind::Update, rename("u1", "Ada"));
    assert_eq!(
      h.queue.status(),
      QueueStatus {
        queued: 1,
        processing: false,
        replaying: false,
      }
    );

    h.connectivity.set_online(true);
    assert!(h.queue.status().processing);
  }
}
