//! Cache layer that orchestrates both cache tiers.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::clock::Clock;
use super::memory::TtlCache;
use super::storage::{KeyValueStore, PersistentCache};

/// Two cache tiers keyed identically: a fast in-memory TTL cache in front of
/// a serialized store.
///
/// Reads always revalidate the TTL; a value read before an `.await` must be
/// read again afterwards rather than trusted.
pub struct CacheLayer<V> {
  memory: TtlCache<V>,
  persistent: PersistentCache,
  clock: Arc<dyn Clock>,
  namespace: String,
  /// How far past expiry an entry can still serve as a fallback
  grace: Duration,
}

impl<V> CacheLayer<V>
where
  V: Clone + Serialize + DeserializeOwned,
{
  pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, namespace: &str) -> Self {
    Self {
      memory: TtlCache::new(clock.clone()),
      persistent: PersistentCache::new(store, clock.clone(), namespace),
      clock,
      namespace: namespace.to_string(),
      grace: Duration::zero(),
    }
  }

  /// Set how long expired entries may still serve as a fallback.
  pub fn with_grace(mut self, grace: Duration) -> Self {
    self.memory = TtlCache::new(self.clock.clone()).with_grace(grace);
    self.grace = grace;
    self
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  /// Look up a fresh value, memory first. A persistent hit is promoted to
  /// memory with its original timestamp so it does not outlive its TTL.
  pub fn get(&self, key: &str, ttl: Duration) -> Option<(V, DateTime<Utc>)> {
    if let Some(hit) = self.memory.get_entry(key) {
      debug!(key = %key, tier = "memory", "cache hit");
      return Some(hit);
    }

    let (data, stored_at) = self.persistent.get::<V>(key, ttl)?;
    debug!(key = %key, tier = "persistent", "cache hit");
    self.memory.set_at(key, data.clone(), ttl, stored_at);
    Some((data, stored_at))
  }

  /// Look up a value that may have expired, but by no more than the grace margin.
  pub fn get_stale(&self, key: &str, ttl: Duration) -> Option<(V, DateTime<Utc>)> {
    self
      .memory
      .get_stale(key)
      .or_else(|| self.persistent.get::<V>(key, ttl + self.grace))
  }

  /// Write a value into both tiers.
  pub fn set(&self, key: &str, data: &V, ttl: Duration) {
    self.memory.set(key, data.clone(), ttl);
    self.persistent.set(key, data);
  }

  pub fn delete(&self, key: &str) {
    self.memory.delete(key);
    self.persistent.delete(key);
  }

  /// Drop every entry in both tiers whose key starts with `prefix`.
  ///
  /// Runs synchronously: once this returns the next read cannot observe
  /// any of the removed entries.
  pub fn invalidate_prefix(&self, prefix: &str) -> usize {
    let memory = self.memory.delete_by_prefix(prefix);
    let persistent = self.persistent.delete_by_prefix(prefix);
    debug!(prefix = %prefix, memory, persistent, "invalidated cache entries");
    memory.max(persistent)
  }

  /// Drop everything in this layer's namespace from both tiers.
  pub fn invalidate_all(&self) -> usize {
    let prefix = format!("{}:", self.namespace);
    let memory = self.memory.delete_by_prefix(&prefix);
    let persistent = self.persistent.clear_namespace();
    debug!(namespace = %self.namespace, memory, persistent, "cleared cache namespace");
    memory.max(persistent)
  }
}
