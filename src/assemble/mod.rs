mod cached_client;
pub mod types;

pub use cached_client::{CachedAssembleClient, WriteOutcome};
