//! Document store the app reads from and replays writes against.

#[cfg(test)]
pub mod memory;
mod rest;

use async_trait::async_trait;
use color_eyre::{Report, Result};
use serde_json::Value;
use std::fmt;

pub use rest::RestDocumentStore;

/// Equality filter on a top-level document field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
  pub field: String,
  pub value: Value,
}

impl Filter {
  pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
    Self {
      field: field.into(),
      value: value.into(),
    }
  }
}

/// Remote document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
  /// Fetch one document. `Ok(None)` when it does not exist.
  async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>>;

  /// Write a document. With `merge`, fields are merged into the existing
  /// document; otherwise the document is replaced.
  async fn set_document(&self, collection: &str, id: &str, data: Value, merge: bool)
    -> Result<()>;

  /// Delete a document. Deleting a missing document succeeds.
  async fn delete_document(&self, collection: &str, id: &str) -> Result<()>;

  /// All documents in `collection` matching every filter.
  async fn query_collection(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Value>>;

  /// Cheap reachability check.
  async fn ping(&self) -> Result<()>;
}

/// The store could not be reached (network failure, timeout, gateway error).
///
/// Carried inside an eyre report so callers can tell transport failures from
/// errors the store itself reported.
#[derive(Debug)]
pub struct Unreachable(pub String);

impl fmt::Display for Unreachable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "document store unreachable: {}", self.0)
  }
}

impl std::error::Error for Unreachable {}

/// Whether an error means the store could not be reached.
pub fn is_unreachable(err: &Report) -> bool {
  err.downcast_ref::<Unreachable>().is_some()
}
