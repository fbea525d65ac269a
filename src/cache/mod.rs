//! Process-local TTL cache for documents read from the store.
//!
//! - Keys combine a resource type, an optional document id and optional
//!   query parameters (order-independent)
//! - Each resource type has its own TTL, with a 5 minute fallback
//! - Entries expire lazily on lookup

mod invalidate;
mod key;
mod table;
pub mod ttl;

pub use invalidate::{invalidate_event, invalidate_notifications, invalidate_user};
pub use key::Params;
pub use table::{CacheStats, TtlCache};
pub use ttl::TtlTable;
