//! In-memory TTL cache with lazy eviction.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::key::{CacheKey, Params};
use super::ttl::TtlTable;
use crate::clock::{Clock, SystemClock};

/// A cached value with the time it was written and how long it lives.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
  data: V,
  written_at: DateTime<Utc>,
  ttl: Duration,
}

impl<V> CacheEntry<V> {
  fn is_valid(&self, now: DateTime<Utc>) -> bool {
    now - self.written_at < self.ttl
  }
}

/// Diagnostic snapshot of the cache contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
  /// Number of stored entries, expired-but-not-yet-evicted ones included
  pub size: usize,
  /// Entry count per resource type
  pub types: BTreeMap<String, usize>,
}

/// Keyed TTL cache.
///
/// Expired entries are never returned; they are dropped the next time they
/// are looked up. There is no background sweep. Clones share the same table.
pub struct TtlCache<V> {
  entries: Arc<Mutex<HashMap<CacheKey, CacheEntry<V>>>>,
  ttls: Arc<TtlTable>,
  clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
  pub fn new(ttls: TtlTable) -> Self {
    Self::with_clock(ttls, Arc::new(SystemClock))
  }

  pub fn with_clock(ttls: TtlTable, clock: Arc<dyn Clock>) -> Self {
    Self {
      entries: Arc::new(Mutex::new(HashMap::new())),
      ttls: Arc::new(ttls),
      clock,
    }
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry<V>>> {
    // The map holds no cross-entry invariants, so a poisoned lock is still usable.
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Look up a value. An expired entry is removed and reported as a miss.
  pub fn get(&self, resource_type: &str, id: Option<&str>, params: Option<&Params>) -> Option<V> {
    let key = CacheKey::new(resource_type, id, params);
    let now = self.clock.now();
    let mut entries = self.entries();

    match entries.get(&key) {
      Some(entry) if entry.is_valid(now) => {
        tracing::trace!(key = %key, "cache hit");
        Some(entry.data.clone())
      }
      Some(_) => {
        entries.remove(&key);
        tracing::trace!(key = %key, "cache entry expired");
        None
      }
      None => {
        tracing::trace!(key = %key, "cache miss");
        None
      }
    }
  }

  /// Store a value, replacing any previous entry for the same key.
  pub fn set(&self, resource_type: &str, value: V, id: Option<&str>, params: Option<&Params>) {
    let key = CacheKey::new(resource_type, id, params);
    let entry = CacheEntry {
      data: value,
      written_at: self.clock.now(),
      ttl: self.ttls.ttl_for(resource_type),
    };
    self.entries().insert(key, entry);
  }

  /// Remove the `(type, id)` entry, or every entry of `type` when `id` is `None`.
  pub fn clear(&self, resource_type: &str, id: Option<&str>) {
    let mut entries = self.entries();
    match id {
      Some(id) => {
        entries.remove(&CacheKey::new(resource_type, Some(id), None));
      }
      None => entries.retain(|key, _| key.resource_type() != resource_type),
    }
  }

  pub fn clear_all(&self) {
    self.entries().clear();
  }

  /// Snapshot of the table. Does not evict anything.
  pub fn stats(&self) -> CacheStats {
    let entries = self.entries();
    let mut types = BTreeMap::new();
    for key in entries.keys() {
      *types.entry(key.resource_type().to_string()).or_insert(0) += 1;
    }
    CacheStats {
      size: entries.len(),
      types,
    }
  }
}

impl<V> Clone for TtlCache<V> {
  fn clone(&self) -> Self {
    Self {
      entries: Arc::clone(&self.entries),
      ttls: Arc::clone(&self.ttls),
      clock: Arc::clone(&self.clock),
    }
  }
}
