//! Per-resource-type time-to-live table.

use chrono::Duration;
use std::collections::HashMap;

pub const USER_PROFILE: &str = "userProfile";
pub const EVENTS: &str = "events";
pub const EVENT_DETAILS: &str = "eventDetails";
pub const NOTIFICATIONS: &str = "notifications";
pub const MEMBER_DIRECTORY: &str = "memberDirectory";

/// TTL applied to resource types missing from the table.
pub const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;

/// Built-in TTLs in milliseconds.
const BUILTIN_TTLS_MS: &[(&str, u64)] = &[
  (USER_PROFILE, 5 * 60 * 1000),
  (EVENTS, 2 * 60 * 1000),
  (EVENT_DETAILS, 10 * 60 * 1000),
  (NOTIFICATIONS, 60 * 1000),
  (MEMBER_DIRECTORY, 15 * 60 * 1000),
];

/// Mapping from resource type to TTL, with a fallback for unknown types.
#[derive(Debug, Clone)]
pub struct TtlTable {
  ttls: HashMap<String, Duration>,
  default_ttl: Duration,
}

impl TtlTable {
  /// Table with no per-type entries; every type gets `default_ttl`.
  pub fn empty(default_ttl: Duration) -> Self {
    Self {
      ttls: HashMap::new(),
      default_ttl,
    }
  }

  /// Set (or replace) the TTL for one resource type.
  ///
  /// Non-positive durations are ignored, an entry must be able to be valid.
  pub fn with_ttl(mut self, resource_type: impl Into<String>, ttl: Duration) -> Self {
    if ttl > Duration::zero() {
      self.ttls.insert(resource_type.into(), ttl);
    }
    self
  }

  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    if ttl > Duration::zero() {
      self.default_ttl = ttl;
    }
    self
  }

  /// TTL for `resource_type`, falling back to the default.
  pub fn ttl_for(&self, resource_type: &str) -> Duration {
    self
      .ttls
      .get(resource_type)
      .copied()
      .unwrap_or(self.default_ttl)
  }
}

impl Default for TtlTable {
  fn default() -> Self {
    BUILTIN_TTLS_MS.iter().fold(
      Self::empty(Duration::milliseconds(DEFAULT_TTL_MS as i64)),
      |table, (resource_type, ms)| table.with_ttl(*resource_type, Duration::milliseconds(*ms as i64)),
    )
  }
}
