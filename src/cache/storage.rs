//! Persistent key-value stores and the serialized cache that sits on them.

use chrono::{DateTime, Duration, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::clock::Clock;

/// A string key-value medium, the shape of browser session/local storage.
///
/// The medium may be shared with other writers, so callers must only touch
/// keys inside their own namespace.
pub trait KeyValueStore: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>>;

  fn set_item(&self, key: &str, value: &str) -> Result<()>;

  fn remove_item(&self, key: &str) -> Result<()>;

  /// All keys currently stored.
  fn keys(&self) -> Result<Vec<String>>;
}

/// Process-memory store, the analogue of session-scoped storage.
#[derive(Default)]
pub struct MemoryStore {
  items: Mutex<BTreeMap<String, String>>,
  /// Maximum total size of keys + values in bytes
  quota: Option<usize>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Store that refuses writes once `bytes` of keys and values are held.
  pub fn with_quota(bytes: usize) -> Self {
    Self {
      items: Mutex::new(BTreeMap::new()),
      quota: Some(bytes),
    }
  }
}

impl KeyValueStore for MemoryStore {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let items = self.items.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(items.get(key).cloned())
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let mut items = self.items.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(quota) = self.quota {
      let used: usize = items
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| k.len() + v.len())
        .sum();
      if used + key.len() + value.len() > quota {
        return Err(eyre!("Storage quota exceeded writing {}", key));
      }
    }

    items.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    let mut items = self.items.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    items.remove(key);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let items = self.items.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(items.keys().cloned().collect())
  }
}

/// SQLite-backed durable store, the analogue of local storage.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for the key-value table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    item_key TEXT PRIMARY KEY,
    item_value TEXT NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("portal").join("store.db"))
  }
}

impl KeyValueStore for SqliteStore {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT item_value FROM kv_store WHERE item_key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (item_key, item_value, written_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write {}: {}", key, e))?;

    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM kv_store WHERE item_key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove {}: {}", key, e))?;

    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT item_key FROM kv_store ORDER BY item_key")
      .map_err(|e| eyre!("Failed to prepare key listing: {}", e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(keys)
  }
}

/// Stored envelope. `timestamp` is milliseconds since the Unix epoch.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
  data: T,
  timestamp: i64,
}

/// JSON cache over a [`KeyValueStore`].
///
/// Every failure in here degrades to a miss (reads) or a skipped write: the
/// cache only ever makes things faster, it never makes a fetch fail.
pub struct PersistentCache {
  store: Arc<dyn KeyValueStore>,
  clock: Arc<dyn Clock>,
  /// Only keys with this prefix are ever enumerated or cleared
  namespace: String,
}

impl PersistentCache {
  pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, namespace: &str) -> Self {
    Self {
      store,
      clock,
      namespace: namespace.to_string(),
    }
  }

  /// Read a value no older than `max_age`.
  pub fn get<T: DeserializeOwned>(
    &self,
    key: &str,
    max_age: Duration,
  ) -> Option<(T, DateTime<Utc>)> {
    let raw = match self.store.get_item(key) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(key = %key, error = %e, "persistent cache read failed");
        return None;
      }
    };

    let envelope: Envelope<T> = match serde_json::from_str(&raw) {
      Ok(envelope) => envelope,
      Err(e) => {
        warn!(key = %key, error = %e, "discarding undecodable cache entry");
        return None;
      }
    };

    let stored_at = Utc.timestamp_millis_opt(envelope.timestamp).single()?;
    if self.clock.now() - stored_at < max_age {
      Some((envelope.data, stored_at))
    } else {
      debug!(key = %key, "persistent cache entry expired");
      None
    }
  }

  /// Write a value stamped with the current time. Failures are logged and swallowed.
  pub fn set<T: Serialize>(&self, key: &str, data: &T) {
    let envelope = Envelope {
      data,
      timestamp: self.clock.now().timestamp_millis(),
    };

    let raw = match serde_json::to_string(&envelope) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(key = %key, error = %e, "failed to serialize cache entry; skipping");
        return;
      }
    };

    if let Err(e) = self.store.set_item(key, &raw) {
      warn!(key = %key, error = %e, "failed to persist cache entry; skipping");
    }
  }

  pub fn delete(&self, key: &str) {
    if let Err(e) = self.store.remove_item(key) {
      warn!(key = %key, error = %e, "failed to remove cache entry");
    }
  }

  /// Remove every key starting with `prefix`. Returns how many were removed.
  pub fn delete_by_prefix(&self, prefix: &str) -> usize {
    let keys = match self.store.keys() {
      Ok(keys) => keys,
      Err(e) => {
        warn!(prefix = %prefix, error = %e, "failed to enumerate cache keys");
        return 0;
      }
    };

    keys
      .iter()
      .filter(|key| key.starts_with(prefix))
      .filter(|key| match self.store.remove_item(key) {
        Ok(()) => true,
        Err(e) => {
          warn!(key = %key, error = %e, "failed to remove cache entry");
          false
        }
      })
      .count()
  }

  /// Remove every key in this cache's namespace, leaving foreign keys alone.
  pub fn clear_namespace(&self) -> usize {
    let prefix = format!("{}:", self.namespace);
    self.delete_by_prefix(&prefix)
  }
}
