//! Assemble client that reads through the TTL cache and queues writes while
//! the document store is unreachable.

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::cache::ttl::{EVENTS, EVENT_DETAILS, MEMBER_DIRECTORY, NOTIFICATIONS, USER_PROFILE};
use crate::cache::{self, CacheStats, Params, TtlCache};
use crate::connectivity::Connectivity;
use crate::queue::{apply_write, OfflineQueue, OperationKind, Payload, QueueEvent, ReplaySummary};
use crate::store::{is_unreachable, DocumentStore, Filter};

use super::types::{
  self, Event, EventStatus, Notification, ProfileChanges, RsvpStatus, UserProfile,
};

/// What happened to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
  /// Written to the store
  Written,
  /// Store unreachable; queued for replay under this operation id
  Queued(String),
}

/// Client for the Assemble documents.
///
/// Reads are served from the cache when fresh and fetched from the store
/// otherwise. Writes go straight to the store when online and into the
/// offline queue when not, or when earlier writes are still queued. Every
/// write invalidates the cache entries it could have made stale, once when
/// it is issued and again when a queued copy is replayed.
#[derive(Clone)]
pub struct CachedAssembleClient {
  store: Arc<dyn DocumentStore>,
  cache: TtlCache<Value>,
  queue: OfflineQueue,
  connectivity: Connectivity,
}

impl CachedAssembleClient {
  pub fn new(
    store: Arc<dyn DocumentStore>,
    cache: TtlCache<Value>,
    queue: OfflineQueue,
    connectivity: Connectivity,
  ) -> Self {
    let client = Self {
      store,
      cache,
      queue,
      connectivity,
    };
    client.spawn_replay_invalidation();
    client
  }

  /// Invalidate on every replayed write, whatever started the replay.
  fn spawn_replay_invalidation(&self) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
      tracing::debug!("no runtime, replayed writes only invalidate on sync");
      return;
    };

    let cache = self.cache.clone();
    let mut events = self.queue.subscribe();
    handle.spawn(async move {
      loop {
        match events.recv().await {
          Ok(QueueEvent::Replayed { operation }) => invalidate_for(&cache, &operation.payload),
          Ok(QueueEvent::PermanentlyFailed { .. }) => {}
          Err(RecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "missed replay events, clearing cache");
            cache.clear_all();
          }
          Err(RecvError::Closed) => break,
        }
      }
    });
  }

  pub fn queue(&self) -> &OfflineQueue {
    &self.queue
  }

  pub fn cache_stats(&self) -> CacheStats {
    self.cache.stats()
  }

  /// Replay queued writes once. When any of them went out, every cached
  /// read is dropped since it may predate the replayed data.
  pub async fn sync(&self) -> ReplaySummary {
    let summary = self.queue.process_queue().await;
    if summary.succeeded > 0 {
      self.cache.clear_all();
    }
    summary
  }

  /// Serve from cache, or fetch, cache and return.
  ///
  /// Nothing is cached when the fetcher finds nothing or returns data that
  /// does not decode as `T`.
  async fn read_through<T, F, Fut>(
    &self,
    resource_type: &str,
    id: Option<&str>,
    params: Option<&Params>,
    fetcher: F,
  ) -> Result<Option<T>>
  where
    T: DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<Value>>>,
  {
    if let Some(cached) = self.cache.get(resource_type, id, params) {
      return decode(resource_type, cached).map(Some);
    }

    let Some(fresh) = fetcher().await? else {
      return Ok(None);
    };
    let decoded = decode(resource_type, fresh.clone())?;
    self.cache.set(resource_type, fresh, id, params);
    Ok(Some(decoded))
  }

  async fn read_list<T, F, Fut>(
    &self,
    resource_type: &str,
    id: Option<&str>,
    params: Option<&Params>,
    fetcher: F,
  ) -> Result<Vec<T>>
  where
    T: DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<Value>>>,
  {
    let list = self
      .read_through(resource_type, id, params, || async move {
        fetcher().await.map(|docs| Some(Value::Array(docs)))
      })
      .await?;
    Ok(list.unwrap_or_default())
  }

  pub async fn get_user_profile(&self, uid: &str) -> Result<Option<UserProfile>> {
    self
      .read_through(USER_PROFILE, Some(uid), None, || {
        self.store.get_document(types::USERS, uid)
      })
      .await
  }

  /// Fetch several profiles concurrently; missing ones are skipped.
  pub async fn get_user_profiles(&self, uids: &[String]) -> Result<Vec<UserProfile>> {
    let profiles =
      futures::future::try_join_all(uids.iter().map(|uid| self.get_user_profile(uid))).await?;
    Ok(profiles.into_iter().flatten().collect())
  }

  pub async fn get_event(&self, event_id: &str) -> Result<Option<Event>> {
    self
      .read_through(EVENT_DETAILS, Some(event_id), None, || {
        self.store.get_document(types::EVENTS, event_id)
      })
      .await
  }

  /// List events, optionally only those with `status`.
  pub async fn list_events(&self, status: Option<EventStatus>) -> Result<Vec<Event>> {
    let params = status.map(|s| Params::new().with("status", s.as_str()));
    let filters: Vec<Filter> = status
      .map(|s| Filter::equals("status", s.as_str()))
      .into_iter()
      .collect();

    self
      .read_list(EVENTS, None, params.as_ref(), || {
        self.store.query_collection(types::EVENTS, &filters)
      })
      .await
  }

  pub async fn list_notifications(&self, uid: &str) -> Result<Vec<Notification>> {
    let filters = [Filter::equals("uid", uid)];
    self
      .read_list(NOTIFICATIONS, Some(uid), None, || {
        self.store.query_collection(types::NOTIFICATIONS, &filters)
      })
      .await
  }

  pub async fn member_directory(&self) -> Result<Vec<UserProfile>> {
    self
      .read_list(MEMBER_DIRECTORY, None, None, || {
        self.store.query_collection(types::USERS, &[])
      })
      .await
  }

  pub async fn update_profile(&self, uid: &str, changes: ProfileChanges) -> Result<WriteOutcome> {
    self
      .write(
        OperationKind::Update,
        Payload::Profile {
          uid: uid.to_string(),
          changes,
        },
      )
      .await
  }

  /// Create or overwrite an event.
  pub async fn save_event(&self, event: Event) -> Result<WriteOutcome> {
    self
      .write(OperationKind::Create, Payload::Event { event })
      .await
  }

  pub async fn delete_event(&self, event_id: &str) -> Result<WriteOutcome> {
    self
      .write(
        OperationKind::Delete,
        Payload::EventRef {
          event_id: event_id.to_string(),
        },
      )
      .await
  }

  pub async fn set_rsvp(
    &self,
    event_id: &str,
    uid: &str,
    status: RsvpStatus,
  ) -> Result<WriteOutcome> {
    self
      .write(
        OperationKind::Create,
        Payload::Rsvp {
          event_id: event_id.to_string(),
          uid: uid.to_string(),
          status,
        },
      )
      .await
  }

  pub async fn mark_notification_read(
    &self,
    uid: &str,
    notification_id: &str,
  ) -> Result<WriteOutcome> {
    self
      .write(
        OperationKind::Update,
        Payload::NotificationRead {
          uid: uid.to_string(),
          notification_id: notification_id.to_string(),
        },
      )
      .await
  }

  /// Write directly when online and nothing is queued; otherwise queue, so
  /// writes reach the store in the order they were made. A store that turns
  /// out to be unreachable also queues. Errors the store reports are
  /// returned as-is.
  async fn write(&self, kind: OperationKind, payload: Payload) -> Result<WriteOutcome> {
    let outcome = if !self.connectivity.is_online() {
      WriteOutcome::Queued(self.queue.enqueue(kind, payload.clone()))
    } else if self.queue.status().queued > 0 {
      tracing::debug!("earlier writes still queued, queueing behind them");
      WriteOutcome::Queued(self.queue.enqueue(kind, payload.clone()))
    } else {
      match apply_write(self.store.as_ref(), kind, payload.collection(), &payload).await {
        Ok(()) => WriteOutcome::Written,
        Err(e) if is_unreachable(&e) => {
          tracing::warn!(error = %e, "store unreachable, queueing write");
          self.connectivity.set_online(false);
          WriteOutcome::Queued(self.queue.enqueue(kind, payload.clone()))
        }
        Err(e) => return Err(e),
      }
    };

    invalidate_for(&self.cache, &payload);
    Ok(outcome)
  }
}

fn decode<T: DeserializeOwned>(resource_type: &str, value: Value) -> Result<T> {
  serde_json::from_value(value).map_err(|e| eyre!("Failed to decode {}: {}", resource_type, e))
}

/// Drop cache entries a write to `payload`'s document may have made stale.
fn invalidate_for(cache: &TtlCache<Value>, payload: &Payload) {
  match payload {
    Payload::Profile { uid, .. } => cache::invalidate_user(cache, uid),
    Payload::Event { event } => cache::invalidate_event(cache, &event.id),
    Payload::EventRef { event_id } | Payload::Rsvp { event_id, .. } => {
      cache::invalidate_event(cache, event_id)
    }
    Payload::NotificationRead { uid, .. } => cache::invalidate_notifications(cache, uid),
  }
}
