//! The selected client filter and its generation counter.

use color_eyre::Result;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::cache::KeyValueStore;

/// Which client's items to show
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientFilter {
  All,
  Client(String),
}

impl ClientFilter {
  /// Parse a `clientId` value; absent and `"all"` both mean no filter.
  pub fn from_param(value: Option<&str>) -> Self {
    match value.map(str::trim) {
      None | Some("") | Some("all") => ClientFilter::All,
      Some(id) => ClientFilter::Client(id.to_string()),
    }
  }

  pub fn as_param(&self) -> &str {
    match self {
      ClientFilter::All => "all",
      ClientFilter::Client(id) => id,
    }
  }
}

impl fmt::Display for ClientFilter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_param())
  }
}

/// Snapshot of the context taken when a fetch is issued.
///
/// A fetch may only commit its result while its token is still current.
#[derive(Debug, Clone)]
pub struct ContextToken {
  generation: u64,
  current: Arc<AtomicU64>,
  client: ClientFilter,
}

impl ContextToken {
  pub fn is_current(&self) -> bool {
    self.current.load(Ordering::SeqCst) == self.generation
  }

  pub fn client(&self) -> &ClientFilter {
    &self.client
  }
}

/// Process-wide client selection.
///
/// Starts unresolved when the selection is not yet known; no fetches are
/// issued until it resolves. Every change bumps the generation, which
/// invalidates all outstanding [`ContextToken`]s.
#[derive(Debug)]
pub struct ClientContext {
  client: Mutex<Option<ClientFilter>>,
  generation: Arc<AtomicU64>,
}

impl ClientContext {
  pub fn new(initial: Option<ClientFilter>) -> Self {
    Self {
      client: Mutex::new(initial),
      generation: Arc::new(AtomicU64::new(0)),
    }
  }

  /// Read the persisted selection. The store is never written from here.
  pub fn from_store(store: &dyn KeyValueStore, key: &str) -> Result<Self> {
    let selected = store.get_item(key)?;
    Ok(Self::new(Some(ClientFilter::from_param(selected.as_deref()))))
  }

  pub fn current(&self) -> Option<ClientFilter> {
    self.client.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  /// Token for a fetch issued now, or `None` while unresolved.
  pub fn token(&self) -> Option<ContextToken> {
    let client = self.client.lock().unwrap_or_else(|e| e.into_inner());
    client.as_ref().map(|client| ContextToken {
      generation: self.generation.load(Ordering::SeqCst),
      current: Arc::clone(&self.generation),
      client: client.clone(),
    })
  }

  /// Select a client. Returns false (and changes nothing) if it was already selected.
  pub fn switch(&self, filter: ClientFilter) -> bool {
    let mut client = self.client.lock().unwrap_or_else(|e| e.into_inner());
    if client.as_ref() == Some(&filter) {
      return false;
    }

    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    info!(client = %filter, generation, "client context changed");
    *client = Some(filter);
    true
  }
}
