//! Approvals client with transparent two-tier caching and invalidation.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheLayer, CacheResult, Clock, KeyValueStore, QueryKey};
use crate::config::Config;
use crate::context::ContextToken;

use super::cache::{type_prefix, PageQuery};
use super::client::{ApprovalsClient, FetchError, Transport};
use super::types::{Page, ResourceType, StatusUpdate};

/// Approvals client with transparent caching support.
///
/// Reads go memory tier, then persistent tier, then network. Writes to the
/// endpoint invalidate every cached page of the affected content type.
pub struct CachedApprovalsClient<T: Transport> {
  inner: ApprovalsClient<T>,
  cache: CacheLayer<Page>,
  config: Config,
}

impl<T: Transport> CachedApprovalsClient<T> {
  pub fn new(
    transport: T,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: &Config,
  ) -> Self {
    let inner = ApprovalsClient::new(transport, clock.clone(), &config.api);
    let cache = CacheLayer::new(store, clock, &config.cache.namespace)
      .with_grace(chrono::Duration::seconds(config.cache.stale_grace_secs as i64));

    Self {
      inner,
      cache,
      config: config.clone(),
    }
  }

  #[cfg(test)]
  pub fn transport(&self) -> &T {
    self.inner.transport()
  }

  /// Cached page for `query`, if fresh. Never touches the network.
  #[cfg(test)]
  pub fn peek(&self, query: &PageQuery) -> Option<Page> {
    let key = query.cache_key(self.cache.namespace());
    self
      .cache
      .get(&key, self.config.ttl_for(query.resource))
      .map(|(page, _)| page)
  }

  /// Fetch one page.
  ///
  /// With `use_cache` a fresh cached page is returned without network access.
  /// Failures never surface as errors: after retries the caller gets stale
  /// data within the grace margin, or an empty page, plus an error message.
  pub async fn fetch_page(&self, query: &PageQuery, use_cache: bool) -> CacheResult<Page> {
    match self.fetch_page_guarded(query, use_cache, None).await {
      Ok(result) => result,
      // Only reachable with a token
      Err(e) => CacheResult::empty(Page::empty(), e.to_string()),
    }
  }

  /// Like [`Self::fetch_page`], but tied to the client context that issued it.
  ///
  /// The token is checked before dispatch and again after the response
  /// arrives. If the context moved on in between, the result is dropped
  /// without touching the cache and `FetchError::Superseded` is returned.
  pub async fn fetch_page_guarded(
    &self,
    query: &PageQuery,
    use_cache: bool,
    token: Option<&ContextToken>,
  ) -> Result<CacheResult<Page>, FetchError> {
    let key = query.cache_key(self.cache.namespace());
    let ttl = self.config.ttl_for(query.resource);

    if use_cache {
      if let Some((page, cached_at)) = self.cache.get(&key, ttl) {
        return Ok(CacheResult::from_cache(page, cached_at));
      }
    }

    let still_current = || token.map_or(true, ContextToken::is_current);

    if !still_current() {
      debug!(query = %query.description(), "client changed before dispatch; not fetching");
      return Err(FetchError::Superseded);
    }

    let fetched = self.inner.fetch_page(query, token).await;

    if !still_current() || matches!(fetched, Err(FetchError::Superseded)) {
      debug!(query = %query.description(), "client changed while fetching; discarding result");
      return Err(FetchError::Superseded);
    }

    match fetched {
      Ok(page) => {
        self.cache.set(&key, &page, ttl);
        // A switch that landed between the check above and the write has
        // already cleared the namespace; take this entry back out too.
        if !still_current() {
          self.cache.delete(&key);
          debug!(query = %query.description(), "client changed while caching; entry dropped");
          return Err(FetchError::Superseded);
        }
        Ok(CacheResult::from_network(page))
      }
      Err(e) => {
        let message = e.to_string();
        match self.cache.get_stale(&key, ttl) {
          Some((page, cached_at)) => {
            warn!(query = %query.description(), error = %e, "fetch failed; serving stale cache");
            Ok(CacheResult::stale(page, cached_at, message))
          }
          None => {
            warn!(query = %query.description(), error = %e, "fetch failed; serving empty page");
            Ok(CacheResult::empty(Page::empty(), message))
          }
        }
      }
    }
  }

  /// Send a status change, then invalidate the content type whatever the outcome.
  pub async fn update_status(&self, update: &StatusUpdate) -> Result<(), FetchError> {
    let result = self.inner.update_status(update).await;
    if let Err(e) = &result {
      warn!(item = %update.item_id, status = %update.status, error = %e, "status update failed");
    }
    self.invalidate_by_type(update.resource);
    result
  }

  /// Drop every cached page of `resource`, across pages, filters and clients.
  pub fn invalidate_by_type(&self, resource: ResourceType) -> usize {
    let removed = self
      .cache
      .invalidate_prefix(&type_prefix(self.cache.namespace(), resource));
    debug!(resource = %resource, removed, "invalidated content type");
    removed
  }

  /// Drop every cached page this client ever wrote.
  pub fn invalidate_all(&self) -> usize {
    let removed = self.cache.invalidate_all();
    info!(removed, "invalidated all cached pages");
    removed
  }
}
