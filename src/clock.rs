//! Time source shared by the cache and the offline queue.

use chrono::{DateTime, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Clock that only moves when told to. Clones share the same instant.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct ManualClock {
  now: std::sync::Arc<std::sync::Mutex<DateTime<Utc>>>,
}

#[cfg(test)]
impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: std::sync::Arc::new(std::sync::Mutex::new(start)),
    }
  }

  /// Move the clock forward.
  pub fn advance(&self, by: chrono::Duration) {
    if let Ok(mut now) = self.now.lock() {
      *now += by;
    }
  }
}

#[cfg(test)]
impl Default for ManualClock {
  fn default() -> Self {
    Self::new(Utc::now())
  }
}

#[cfg(test)]
impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    match self.now.lock() {
      Ok(now) => *now,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }
}
