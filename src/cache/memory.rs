//! In-memory TTL cache.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::clock::Clock;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
  data: V,
  inserted_at: DateTime<Utc>,
  ttl: Duration,
}

impl<V> CacheEntry<V> {
  fn age(&self, now: DateTime<Utc>) -> Duration {
    now - self.inserted_at
  }

  fn is_valid(&self, now: DateTime<Utc>) -> bool {
    self.age(now) < self.ttl
  }
}

/// Key -> value store where every entry carries its own TTL.
///
/// Expired entries read as absent. They are kept around for `grace` past their
/// TTL so [`TtlCache::get_stale`] can serve them as a fallback, and evicted
/// lazily once they are older than that.
pub struct TtlCache<V> {
  entries: Mutex<HashMap<String, CacheEntry<V>>>,
  clock: Arc<dyn Clock>,
  grace: Duration,
}

impl<V: Clone> TtlCache<V> {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      clock,
      grace: Duration::zero(),
    }
  }

  /// Keep expired entries around for `grace` so they can back a stale fallback.
  pub fn with_grace(mut self, grace: Duration) -> Self {
    self.grace = grace;
    self
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Get a value if present and within its TTL.
  pub fn get(&self, key: &str) -> Option<V> {
    self.get_entry(key).map(|(data, _)| data)
  }

  /// Like [`TtlCache::get`], also returning when the entry was inserted.
  pub fn get_entry(&self, key: &str) -> Option<(V, DateTime<Utc>)> {
    let now = self.clock.now();
    let mut entries = self.entries();
    let entry = entries.get(key)?;

    if entry.is_valid(now) {
      return Some((entry.data.clone(), entry.inserted_at));
    }
    if entry.age(now) >= entry.ttl + self.grace {
      entries.remove(key);
    }
    None
  }

  /// Get a value that expired no more than `grace` ago (or is still valid).
  pub fn get_stale(&self, key: &str) -> Option<(V, DateTime<Utc>)> {
    let now = self.clock.now();
    let entries = self.entries();
    let entry = entries.get(key)?;
    (entry.age(now) < entry.ttl + self.grace).then(|| (entry.data.clone(), entry.inserted_at))
  }

  /// Insert or overwrite a value.
  pub fn set(&self, key: &str, data: V, ttl: Duration) {
    self.set_at(key, data, ttl, self.clock.now());
  }

  /// Insert with an explicit insertion time (used when promoting from a slower tier).
  pub fn set_at(&self, key: &str, data: V, ttl: Duration, inserted_at: DateTime<Utc>) {
    self.entries().insert(
      key.to_string(),
      CacheEntry {
        data,
        inserted_at,
        ttl,
      },
    );
  }

  pub fn delete(&self, key: &str) {
    self.entries().remove(key);
  }

  /// Remove every entry whose key starts with `prefix`. Returns how many were removed.
  pub fn delete_by_prefix(&self, prefix: &str) -> usize {
    let mut entries = self.entries();
    let before = entries.len();
    entries.retain(|key, _| !key.starts_with(prefix));
    before - entries.len()
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.entries().len()
  }
}
