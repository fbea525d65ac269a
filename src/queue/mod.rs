//! Offline write queue.
//!
//! Writes that could not reach the document store are queued here, persisted
//! to local storage after every change, and replayed in order once the store
//! is reachable again. An operation that fails `MAX_RETRIES` times is dropped
//! and reported through `QueueEvent::PermanentlyFailed`.

mod operation;
mod replay;
mod storage;

pub use operation::{apply_write, OperationKind, Payload};
pub use replay::{OfflineQueue, QueueEvent, ReplaySummary};
pub use storage::{LocalStorage, MemoryLocalStorage, SqliteLocalStorage};
