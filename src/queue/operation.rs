//! Queued write operations and their typed payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::assemble::types::{
  rsvp_doc_id, Event, ProfileChanges, RsvpStatus, EVENTS, NOTIFICATIONS, RSVPS, USERS,
};
use crate::store::DocumentStore;

/// Kind of write to replay against the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
  /// Insert or overwrite the target document
  Create,
  /// Merge fields into the target document
  Update,
  /// Delete the target document
  Delete,
}

impl fmt::Display for OperationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Create => "create",
      Self::Update => "update",
      Self::Delete => "delete",
    };
    f.pad(s)
  }
}

/// Data carried by a queued write.
///
/// Every variant names the document it targets, so an operation can be
/// replayed with no context beyond itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "camelCase")]
pub enum Payload {
  #[serde(rename_all = "camelCase")]
  Profile { uid: String, changes: ProfileChanges },
  #[serde(rename_all = "camelCase")]
  Event { event: Event },
  #[serde(rename_all = "camelCase")]
  EventRef { event_id: String },
  #[serde(rename_all = "camelCase")]
  Rsvp {
    event_id: String,
    uid: String,
    status: RsvpStatus,
  },
  #[serde(rename_all = "camelCase")]
  NotificationRead { uid: String, notification_id: String },
}

impl Payload {
  /// Collection the payload's document lives in.
  pub fn collection(&self) -> &'static str {
    match self {
      Self::Profile { .. } => USERS,
      Self::Event { .. } | Self::EventRef { .. } => EVENTS,
      Self::Rsvp { .. } => RSVPS,
      Self::NotificationRead { .. } => NOTIFICATIONS,
    }
  }

  /// Id of the target document inside its collection.
  pub fn document_id(&self) -> String {
    match self {
      Self::Profile { uid, .. } => uid.clone(),
      Self::Event { event } => event.id.clone(),
      Self::EventRef { event_id } => event_id.clone(),
      Self::Rsvp { event_id, uid, .. } => rsvp_doc_id(event_id, uid),
      Self::NotificationRead {
        notification_id, ..
      } => notification_id.clone(),
    }
  }

  /// Document body written on create or update.
  pub fn body(&self) -> serde_json::Result<Value> {
    match self {
      Self::Profile { changes, .. } => serde_json::to_value(changes),
      Self::Event { event } => serde_json::to_value(event),
      Self::EventRef { .. } => Ok(Value::Object(Default::default())),
      Self::Rsvp {
        event_id,
        uid,
        status,
      } => Ok(serde_json::json!({
        "eventId": event_id,
        "uid": uid,
        "status": status,
      })),
      Self::NotificationRead { .. } => Ok(serde_json::json!({ "read": true })),
    }
  }
}

/// Perform one write against the store.
///
/// Create replaces the target document, update merges into it and delete
/// removes the document the payload identifies.
pub async fn apply_write(
  store: &dyn DocumentStore,
  kind: OperationKind,
  collection: &str,
  payload: &Payload,
) -> color_eyre::Result<()> {
  let id = payload.document_id();
  match kind {
    OperationKind::Create => {
      store
        .set_document(collection, &id, payload.body()?, false)
        .await
    }
    OperationKind::Update => store.set_document(collection, &id, payload.body()?, true).await,
    OperationKind::Delete => store.delete_document(collection, &id).await,
  }
}

/// A pending write, persisted until it is replayed or given up on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
  pub id: String,
  pub kind: OperationKind,
  pub target_collection: String,
  pub payload: Payload,
  pub enqueued_at: DateTime<Utc>,
  #[serde(default)]
  pub retry_count: u32,
}

impl QueuedOperation {
  pub fn new(kind: OperationKind, payload: Payload, now: DateTime<Utc>) -> Self {
    Self {
      id: operation_id(now),
      kind,
      target_collection: payload.collection().to_string(),
      payload,
      enqueued_at: now,
      retry_count: 0,
    }
  }
}

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// `<millis>-<9 hex chars>`. Unique within one process; not collision-proof
/// across processes sharing the same storage.
fn operation_id(now: DateTime<Utc>) -> String {
  let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);

  let mut hasher = Sha256::new();
  hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
  hasher.update(std::process::id().to_le_bytes());
  hasher.update(seq.to_le_bytes());
  let digest = hex::encode(hasher.finalize());

  format!("{}-{}", now.timestamp_millis(), &digest[..9])
}
