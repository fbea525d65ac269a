//! Durable local storage and queue (de)serialization.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::operation::QueuedOperation;

/// Storage key the offline queue is persisted under.
pub const QUEUE_STORAGE_KEY: &str = "lcc_assemble_offline_queue";

/// String key/value storage that survives restarts.
pub trait LocalStorage: Send + Sync {
  fn read_string(&self, key: &str) -> Result<Option<String>>;

  fn write_string(&self, key: &str, value: &str) -> Result<()>;
}

/// SQLite-backed local storage.
pub struct SqliteLocalStorage {
  conn: Mutex<Connection>,
}

impl SqliteLocalStorage {
  /// Open (or create) the storage database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open local storage at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("lcc-assemble").join("local.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORAGE_SCHEMA)
      .map_err(|e| eyre!("Failed to run storage migrations: {}", e))?;

    Ok(())
  }
}

const STORAGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS local_storage (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl LocalStorage for SqliteLocalStorage {
  fn read_string(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT value FROM local_storage WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read '{}': {}", key, e))
  }

  fn write_string(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO local_storage (key, value, updated_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write '{}': {}", key, e))?;

    Ok(())
  }
}

/// Storage that lives only as long as the process.
#[derive(Default)]
pub struct MemoryLocalStorage {
  values: Mutex<HashMap<String, String>>,
}

impl MemoryLocalStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl LocalStorage for MemoryLocalStorage {
  fn read_string(&self, key: &str) -> Result<Option<String>> {
    let values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(values.get(key).cloned())
  }

  fn write_string(&self, key: &str, value: &str) -> Result<()> {
    let mut values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    values.insert(key.to_string(), value.to_string());
    Ok(())
  }
}

/// Load the persisted queue. Missing, unreadable or corrupt data yields an
/// empty queue.
pub fn load_queue(storage: &dyn LocalStorage) -> Vec<QueuedOperation> {
  let raw = match storage.read_string(QUEUE_STORAGE_KEY) {
    Ok(Some(raw)) => raw,
    Ok(None) => return Vec::new(),
    Err(e) => {
      tracing::error!(error = %e, "failed to read offline queue, starting empty");
      return Vec::new();
    }
  };

  match serde_json::from_str::<Vec<QueuedOperation>>(&raw) {
    Ok(queue) => {
      tracing::debug!(count = queue.len(), "loaded offline queue");
      queue
    }
    Err(e) => {
      tracing::warn!(error = %e, "persisted offline queue is corrupt, starting empty");
      Vec::new()
    }
  }
}

/// Persist the whole queue. Failures are logged, never returned.
pub fn save_queue(storage: &dyn LocalStorage, queue: &[QueuedOperation]) {
  let raw = match serde_json::to_string(queue) {
    Ok(raw) => raw,
    Err(e) => {
      tracing::error!(error = %e, "failed to serialize offline queue");
      return;
    }
  };

  if let Err(e) = storage.write_string(QUEUE_STORAGE_KEY, &raw) {
    tracing::error!(error = %e, "failed to persist offline queue");
  }
}
