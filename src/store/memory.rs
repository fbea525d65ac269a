//! In-process document store used by tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Report, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{DocumentStore, Filter, Unreachable};

/// A write or read the store received, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
  Get(String, String),
  Set { collection: String, id: String, merge: bool },
  Delete(String, String),
  Query(String),
}

#[derive(Default)]
pub struct MemoryDocumentStore {
  docs: Mutex<BTreeMap<(String, String), Value>>,
  calls: Mutex<Vec<StoreCall>>,
  unreachable: AtomicBool,
  /// Document ids whose writes are rejected by the store
  rejected: Mutex<HashSet<String>>,
}

impl MemoryDocumentStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every call fail as if the network were down.
  pub fn set_unreachable(&self, unreachable: bool) {
    self.unreachable.store(unreachable, Ordering::SeqCst);
  }

  /// Reject every write to document `id`.
  pub fn reject_writes_to(&self, id: &str) {
    self.rejected.lock().unwrap().insert(id.to_string());
  }

  pub fn insert(&self, collection: &str, id: &str, doc: Value) {
    self
      .docs
      .lock()
      .unwrap()
      .insert((collection.to_string(), id.to_string()), doc);
  }

  pub fn doc(&self, collection: &str, id: &str) -> Option<Value> {
    self
      .docs
      .lock()
      .unwrap()
      .get(&(collection.to_string(), id.to_string()))
      .cloned()
  }

  pub fn calls(&self) -> Vec<StoreCall> {
    self.calls.lock().unwrap().clone()
  }

  /// Only the write calls, in order.
  pub fn writes(&self) -> Vec<StoreCall> {
    self
      .calls()
      .into_iter()
      .filter(|c| matches!(c, StoreCall::Set { .. } | StoreCall::Delete(..)))
      .collect()
  }

  fn record(&self, call: StoreCall) -> Result<()> {
    self.calls.lock().unwrap().push(call);
    if self.unreachable.load(Ordering::SeqCst) {
      return Err(Report::new(Unreachable("connection refused".to_string())));
    }
    Ok(())
  }

  fn check_rejected(&self, id: &str) -> Result<()> {
    if self.rejected.lock().unwrap().contains(id) {
      return Err(eyre!("permission denied for {}", id));
    }
    Ok(())
  }
}

fn matches(filter: &Filter, doc: &Value) -> bool {
  doc.get(&filter.field) == Some(&filter.value)
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
  async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>> {
    self.record(StoreCall::Get(collection.to_string(), id.to_string()))?;
    Ok(self.doc(collection, id))
  }

  async fn set_document(
    &self,
    collection: &str,
    id: &str,
    data: Value,
    merge: bool,
  ) -> Result<()> {
    self.record(StoreCall::Set {
      collection: collection.to_string(),
      id: id.to_string(),
      merge,
    })?;
    self.check_rejected(id)?;

    let mut docs = self.docs.lock().unwrap();
    let key = (collection.to_string(), id.to_string());
    if merge {
      if let (Some(Value::Object(existing)), Value::Object(fields)) = (docs.get_mut(&key), &data) {
        existing.extend(fields.clone());
        return Ok(());
      }
    }
    docs.insert(key, data);
    Ok(())
  }

  async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
    self.record(StoreCall::Delete(collection.to_string(), id.to_string()))?;
    self.check_rejected(id)?;
    self
      .docs
      .lock()
      .unwrap()
      .remove(&(collection.to_string(), id.to_string()));
    Ok(())
  }

  async fn query_collection(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Value>> {
    self.record(StoreCall::Query(collection.to_string()))?;
    let docs = self.docs.lock().unwrap();
    Ok(
      docs
        .iter()
        .filter(|((c, _), doc)| c == collection && filters.iter().all(|f| matches(f, doc)))
        .map(|(_, doc)| doc.clone())
        .collect(),
    )
  }

  async fn ping(&self) -> Result<()> {
    if self.unreachable.load(Ordering::SeqCst) {
      return Err(Report::new(Unreachable("connection refused".to_string())));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_filter_matching() {
    let doc = json!({ "status": "upcoming", "hostUid": "u1" });
    assert!(matches(&Filter::equals("status", "upcoming"), &doc));
    assert!(!matches(&Filter::equals("status", "past"), &doc));
    assert!(!matches(&Filter::equals("missing", "x"), &doc));
  }

  #[tokio::test]
  async fn test_merge_and_replace() {
    let store = MemoryDocumentStore::new();
    store.insert("users", "u1", json!({ "a": 1, "b": 2 }));

    store
      .set_document("users", "u1", json!({ "b": 3 }), true)
      .await
      .unwrap();
    assert_eq!(store.doc("users", "u1"), Some(json!({ "a": 1, "b": 3 })));

    store
      .set_document("users", "u1", json!({ "c": 4 }), false)
      .await
      .unwrap();
    assert_eq!(store.doc("users", "u1"), Some(json!({ "c": 4 })));
  }
}
