//! Invalidation helpers for the resource types the app caches.
//!
//! Each helper clears the entry that was written plus every list view that
//! may embed it.

use super::table::TtlCache;
use super::ttl::{EVENTS, EVENT_DETAILS, MEMBER_DIRECTORY, NOTIFICATIONS, USER_PROFILE};

/// A user's profile changed.
pub fn invalidate_user<V: Clone>(cache: &TtlCache<V>, uid: &str) {
  cache.clear(USER_PROFILE, Some(uid));
  cache.clear(MEMBER_DIRECTORY, None);
  tracing::debug!(uid, "invalidated user profile");
}

/// An event (or something that hangs off it, like an RSVP) changed.
pub fn invalidate_event<V: Clone>(cache: &TtlCache<V>, event_id: &str) {
  cache.clear(EVENT_DETAILS, Some(event_id));
  cache.clear(EVENTS, None);
  tracing::debug!(event_id, "invalidated event");
}

pub fn invalidate_notifications<V: Clone>(cache: &TtlCache<V>, uid: &str) {
  cache.clear(NOTIFICATIONS, Some(uid));
  tracing::debug!(uid, "invalidated notifications");
}
