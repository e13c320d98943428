use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::approvals::types::ResourceType;

/// Upper bound on `api.max_retries`
const MAX_RETRIES: u32 = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  /// Durable-store key holding the selected client id
  pub client_context_key: String,
  /// Items per page inside each status group of a tab
  pub tab_page_size: usize,
  /// Items per request to the approvals endpoint
  pub api_page_size: u32,
  /// Delay before the authoritative refetch that follows a status change
  pub refetch_delay_ms: u64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api: ApiConfig::default(),
      cache: CacheConfig::default(),
      client_context_key: "selectedClientId".to_string(),
      tab_page_size: 5,
      api_page_size: 10,
      refetch_delay_ms: 1500,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  pub timeout_secs: u64,
  /// Additional attempts after the first
  pub max_retries: u32,
  /// First retry delay; doubles on each further retry
  pub retry_base_delay_ms: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:3000/api/".to_string(),
      timeout_secs: 15,
      max_retries: 2,
      retry_base_delay_ms: 500,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Prefix of every key written by the cache
  pub namespace: String,
  pub ttl_secs: u64,
  /// How long past expiry an entry may still be served when the network fails
  pub stale_grace_secs: u64,
  /// Per content type TTLs, in seconds
  #[serde(deserialize_with = "deserialize_ttl_overrides")]
  pub ttl_overrides: HashMap<ResourceType, u64>,
  /// Keep the cache in the SQLite store instead of process memory
  pub durable: bool,
  /// Byte limit of the in-memory store used when `durable` is off
  pub session_quota_bytes: Option<usize>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      namespace: "portal-cache".to_string(),
      ttl_secs: 300,
      stale_grace_secs: 600,
      ttl_overrides: HashMap::new(),
      durable: true,
      session_quota_bytes: None,
    }
  }
}

fn deserialize_ttl_overrides<'de, D>(
  deserializer: D,
) -> Result<HashMap<ResourceType, u64>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let raw: HashMap<String, u64> = HashMap::deserialize(deserializer)?;
  raw
    .into_iter()
    .map(|(name, secs)| {
      name
        .parse::<ResourceType>()
        .map(|resource| (resource, secs))
        .map_err(serde::de::Error::custom)
    })
    .collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./portal.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/portal/config.yaml
  ///
  /// Without any file the defaults are used.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("portal.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("portal").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    if config.tab_page_size == 0 || config.api_page_size == 0 {
      return Err(eyre!("page sizes must be at least 1"));
    }
    if config.api.max_retries > MAX_RETRIES {
      return Err(eyre!("api.max_retries must be at most {}", MAX_RETRIES));
    }
    Ok(config)
  }

  /// TTL for cached pages of `resource`.
  pub fn ttl_for(&self, resource: ResourceType) -> chrono::Duration {
    let secs = self
      .cache
      .ttl_overrides
      .get(&resource)
      .copied()
      .unwrap_or(self.cache.ttl_secs);
    chrono::Duration::seconds(secs as i64)
  }

  /// Get the API token from the environment, if one is set.
  ///
  /// Checks PORTAL_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("PORTAL_API_TOKEN").ok().filter(|t| !t.is_empty())
  }
}
