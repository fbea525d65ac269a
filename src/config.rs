use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cache::ttl::DEFAULT_TTL_MS;
use crate::cache::TtlTable;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub store: StoreConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
  /// Base URL of the document API, e.g. "https://db.example.test/v1/documents"
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  10
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// TTL for resource types without an entry of their own
  #[serde(default = "default_ttl_ms")]
  pub default_ttl_ms: u64,
  /// Per-type overrides, merged over the built-in table
  #[serde(default)]
  pub ttl_ms: BTreeMap<String, u64>,
}

fn default_ttl_ms() -> u64 {
  DEFAULT_TTL_MS
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_ttl_ms: DEFAULT_TTL_MS,
      ttl_ms: BTreeMap::new(),
    }
  }
}

impl CacheConfig {
  /// Build the TTL table: built-ins first, then configured overrides.
  pub fn ttl_table(&self) -> TtlTable {
    let table = TtlTable::default().with_default_ttl(millis(self.default_ttl_ms));
    self
      .ttl_ms
      .iter()
      .fold(table, |table, (resource_type, ms)| {
        table.with_ttl(resource_type.as_str(), millis(*ms))
      })
  }
}

fn millis(ms: u64) -> Duration {
  Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
  /// How often to check whether the store is reachable
  #[serde(default = "default_probe_interval_secs")]
  pub probe_interval_secs: u64,
}

fn default_probe_interval_secs() -> u64 {
  15
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_interval_secs: default_probe_interval_secs(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Local storage database (default: $XDG_DATA_HOME/lcc-assemble/local.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./assemble.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/lcc-assemble/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/lcc-assemble/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("assemble.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("lcc-assemble").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// API token for the document store, from ASSEMBLE_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("ASSEMBLE_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}
