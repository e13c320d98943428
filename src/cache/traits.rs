//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};

/// A query whose results can be cached.
///
/// Keys must be deterministic: equal queries produce equal keys and any
/// differing input produces a different key.
pub trait QueryKey {
  /// Full cache key, starting with `namespace:`.
  fn cache_key(&self, namespace: &str) -> String;

  /// Human readable description for logs.
  fn description(&self) -> String;
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
  /// Recoverable error to surface next to the data, if the fetch degraded
  pub error: Option<String>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
      error: None,
    }
  }

  /// Create a new cache result from cached data that is still within its TTL.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
      error: None,
    }
  }

  /// Expired (but within the grace margin) data served because the network failed.
  pub fn stale(data: T, cached_at: DateTime<Utc>, error: String) -> Self {
    Self {
      data,
      source: CacheSource::Stale,
      cached_at: Some(cached_at),
      error: Some(error),
    }
  }

  /// Placeholder data served because the network failed and nothing was cached.
  pub fn empty(data: T, error: String) -> Self {
    Self {
      data,
      source: CacheSource::Empty,
      cached_at: None,
      error: Some(error),
    }
  }

  pub fn is_degraded(&self) -> bool {
    matches!(self.source, CacheSource::Stale | CacheSource::Empty)
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still within its TTL
  CacheFresh,
  /// Expired cache data served after the network fetch failed
  Stale,
  /// Nothing usable; an empty placeholder was returned
  Empty,
}
