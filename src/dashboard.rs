//! Approvals dashboard state: tabs, client switching, optimistic updates.
//!
//! Every tab loads the full filtered item set for the selected client once and
//! paginates it in memory per status group. Loads carry a [`ContextToken`]
//! so a response that arrives after the client changed is dropped instead of
//! being shown under the new selection.

use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::approvals::cache::PageQuery;
use crate::approvals::cached_client::CachedApprovalsClient;
use crate::approvals::client::{FetchError, Transport};
use crate::approvals::types::{
  ApprovalItem, ApprovalStatus, ResourceType, StatusGroup, StatusUpdate,
};
use crate::cache::CacheSource;
use crate::config::Config;
use crate::context::{ClientContext, ClientFilter, ContextToken};
use crate::pagination::{GroupPage, PageError, PaginationState, StatusPager};

/// Upper bound on API pages fetched for one tab
const MAX_TAB_PAGES: u32 = 50;

/// Outcome of loading a tab
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
  /// Items committed to the tab
  Loaded { items: usize, source: CacheSource },
  /// The fetch failed; the tab kept what it had and shows `error`
  Degraded { items: usize, error: String },
  /// The client context is not known yet, so nothing was requested
  Suppressed,
  /// The client changed while loading; the result was dropped
  Discarded,
}

/// Sync state of an item's status against the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
  /// Status came from the store
  #[default]
  Clean,
  /// Changed locally; waiting for the authoritative refetch
  Pending {
    previous: ApprovalStatus,
    requested: ApprovalStatus,
  },
  /// The authoritative refetch arrived after a local change
  Reconciled,
}

/// Result of an approve / request-changes action
#[derive(Debug)]
pub struct MutationOutcome {
  /// Items whose update call failed, with the reason
  pub failures: Vec<(String, FetchError)>,
  /// The scheduled authoritative refetch
  pub reconcile: JoinHandle<()>,
}

/// Read-only snapshot of a tab for rendering
#[derive(Debug, Clone)]
pub struct TabView {
  pub resource: ResourceType,
  /// Only true while loading a tab that has nothing to show yet
  pub loading: bool,
  pub error: Option<String>,
  pub total_items: usize,
  pub selected: BTreeSet<String>,
  pub groups: Vec<(StatusGroup, GroupPage)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
  Idle,
  Loading,
  Ready,
}

struct TabState {
  items: Vec<ApprovalItem>,
  load: LoadState,
  error: Option<String>,
  selection: BTreeSet<String>,
  pager: StatusPager,
  sync: HashMap<String, SyncState>,
}

impl TabState {
  fn new(page_size: usize) -> Self {
    Self {
      items: Vec::new(),
      load: LoadState::Idle,
      error: None,
      selection: BTreeSet::new(),
      pager: StatusPager::new(page_size),
      sync: HashMap::new(),
    }
  }

  /// A load has completed, even if it found nothing.
  fn has_data(&self) -> bool {
    self.load == LoadState::Ready
  }

  fn reset(&mut self) {
    self.items.clear();
    self.load = LoadState::Idle;
    self.error = None;
    self.selection.clear();
    self.pager.reset();
    self.sync.clear();
  }

  /// Replace items with data from the store. Pending local changes are
  /// overwritten: the store always wins.
  fn commit(&mut self, items: Vec<ApprovalItem>) {
    for state in self.sync.values_mut() {
      if matches!(state, SyncState::Pending { .. }) {
        *state = SyncState::Reconciled;
      }
    }
    self.selection.retain(|id| items.iter().any(|item| &item.id == id));
    self.items = items;
    self.pager.recompute(&self.items);
    self.load = LoadState::Ready;
    self.error = None;
  }

  fn apply_optimistic(&mut self, id: &str, status: ApprovalStatus) -> bool {
    let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
      return false;
    };

    let previous = match self.sync.get(id) {
      Some(SyncState::Pending { previous, .. }) => *previous,
      _ => item.status,
    };
    item.status = status;
    self.sync.insert(
      id.to_string(),
      SyncState::Pending {
        previous,
        requested: status,
      },
    );
    self.pager.recompute(&self.items);
    true
  }
}

struct DashboardState {
  active: ResourceType,
  tabs: HashMap<ResourceType, TabState>,
}

/// The approvals view model over a [`CachedApprovalsClient`].
pub struct Dashboard<T: Transport> {
  client: CachedApprovalsClient<T>,
  context: ClientContext,
  state: Mutex<DashboardState>,
  api_page_size: u32,
  tab_page_size: usize,
  refetch_delay: Duration,
}

impl<T: Transport + 'static> Dashboard<T> {
  pub fn new(client: CachedApprovalsClient<T>, context: ClientContext, config: &Config) -> Self {
    let tabs = ResourceType::ALL
      .into_iter()
      .map(|resource| (resource, TabState::new(config.tab_page_size)))
      .collect();

    Self {
      client,
      context,
      state: Mutex::new(DashboardState {
        active: ResourceType::Keywords,
        tabs,
      }),
      api_page_size: config.api_page_size,
      tab_page_size: config.tab_page_size,
      refetch_delay: Duration::from_millis(config.refetch_delay_ms),
    }
  }

  fn lock(&self) -> MutexGuard<'_, DashboardState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn with_tab<R>(&self, resource: ResourceType, f: impl FnOnce(&mut TabState) -> R) -> R {
    let page_size = self.tab_page_size;
    let mut state = self.lock();
    let tab = state
      .tabs
      .entry(resource)
      .or_insert_with(|| TabState::new(page_size));
    f(tab)
  }

  pub fn client(&self) -> &CachedApprovalsClient<T> {
    &self.client
  }

  pub fn current_client(&self) -> Option<ClientFilter> {
    self.context.current()
  }

  pub fn active_tab(&self) -> ResourceType {
    self.lock().active
  }

  /// Load the active tab (cache first).
  pub async fn load_active(&self) -> LoadOutcome {
    let active = self.active_tab();
    self.load_tab(active).await
  }

  /// Load one tab, cache first.
  pub async fn load_tab(&self, resource: ResourceType) -> LoadOutcome {
    self.load(resource, true).await
  }

  /// Load every tab concurrently.
  pub async fn load_all_tabs(&self) -> Vec<(ResourceType, LoadOutcome)> {
    let loads = ResourceType::ALL
      .into_iter()
      .map(|resource| async move { (resource, self.load_tab(resource).await) });
    join_all(loads).await
  }

  /// Authoritative refetch of a tab, bypassing the cache.
  pub async fn reconcile(&self, resource: ResourceType) -> LoadOutcome {
    self.load(resource, false).await
  }

  async fn load(&self, resource: ResourceType, use_cache: bool) -> LoadOutcome {
    let Some(token) = self.context.token() else {
      debug!(resource = %resource, "client selection unresolved; not loading");
      return LoadOutcome::Suppressed;
    };

    self.with_tab(resource, |tab| {
      if !tab.has_data() {
        tab.load = LoadState::Loading;
      }
    });

    let fetched = match self.fetch_all_pages(resource, use_cache, &token).await {
      Ok(fetched) => fetched,
      Err(_) => return self.discard(resource),
    };

    let committed = self.with_tab(resource, |tab| {
      // Checked under the state lock. A client switch bumps the generation
      // before it takes this lock to reset the tabs.
      if !token.is_current() {
        return None;
      }

      Some(match fetched.error {
        Some(error) if tab.has_data() || fetched.items.is_empty() => {
          // Keep whatever valid view is already on screen.
          if !tab.has_data() {
            tab.load = LoadState::Idle;
          }
          tab.error = Some(error.clone());
          LoadOutcome::Degraded {
            items: tab.items.len(),
            error,
          }
        }
        error => {
          let count = fetched.items.len();
          tab.commit(fetched.items);
          tab.error = error;
          LoadOutcome::Loaded {
            items: count,
            source: fetched.source,
          }
        }
      })
    });

    committed.unwrap_or_else(|| self.discard(resource))
  }

  fn discard(&self, resource: ResourceType) -> LoadOutcome {
    debug!(resource = %resource, "client changed during load; result dropped");
    LoadOutcome::Discarded
  }

  /// Walk the API pages for `resource` until the last one.
  ///
  /// A degraded page anywhere in a multi-page walk fails the whole walk: the
  /// items are dropped and only the error is kept. Stale data is only used
  /// when it is the entire tab.
  async fn fetch_all_pages(
    &self,
    resource: ResourceType,
    use_cache: bool,
    token: &ContextToken,
  ) -> Result<FetchedTab, FetchError> {
    let mut fetched = FetchedTab {
      items: Vec::new(),
      source: CacheSource::CacheFresh,
      error: None,
    };
    let mut query = PageQuery::new(resource, token.client().clone()).page_size(self.api_page_size);

    loop {
      let result = self
        .client
        .fetch_page_guarded(&query, use_cache, Some(token))
        .await?;

      let degraded = result.is_degraded();
      let pagination = result.data.pagination;
      if degraded {
        let partial = query.page > 1 || pagination.has_next_page;
        if partial {
          warn!(
            resource = %resource,
            page = query.page,
            "page failed mid-walk; dropping the tab fetch"
          );
          fetched.items.clear();
        } else {
          fetched.items = result.data.items;
        }
        fetched.source = result.source;
        fetched.error = result.error;
        break;
      }

      fetched.source = worst_source(fetched.source, result.source);
      fetched.items.extend(result.data.items);

      if !pagination.has_next_page || query.page >= MAX_TAB_PAGES {
        if pagination.has_next_page {
          warn!(resource = %resource, pages = query.page, "stopped paging at the page limit");
        }
        break;
      }
      let next_page = query.page + 1;
      query = query.page(next_page).offset(pagination.next_offset);
    }

    Ok(fetched)
  }

  /// Switch the selected client.
  ///
  /// Order matters: the context moves first (so in-flight loads for the old
  /// client get dropped), then the whole cache namespace and every tab are
  /// cleared, and only then is the active tab fetched again.
  pub async fn switch_client(&self, filter: ClientFilter) -> Option<LoadOutcome> {
    if !self.context.switch(filter.clone()) {
      return None;
    }

    self.client.invalidate_all();
    {
      let mut state = self.lock();
      for tab in state.tabs.values_mut() {
        tab.reset();
      }
    }

    info!(client = %filter, "reloading for new client");
    Some(self.load_active().await)
  }

  /// Switch tabs. Selections are cleared; a tab with data is shown as is,
  /// a tab without data has its cache entries invalidated and is loaded.
  pub async fn switch_tab(&self, resource: ResourceType) -> Option<LoadOutcome> {
    let needs_load = {
      let mut state = self.lock();
      state.active = resource;
      for tab in state.tabs.values_mut() {
        tab.selection.clear();
      }
      state.tabs.get(&resource).is_some_and(|tab| !tab.has_data())
    };

    if !needs_load {
      return None;
    }
    self.client.invalidate_by_type(resource);
    Some(self.load_tab(resource).await)
  }

  /// Select a page of one status group. Local only.
  pub fn set_page(
    &self,
    resource: ResourceType,
    group: StatusGroup,
    page: u32,
  ) -> Result<PaginationState, PageError> {
    self.with_tab(resource, |tab| tab.pager.set_page(group, page))
  }

  pub fn return_to_first_page(
    &self,
    resource: ResourceType,
    group: StatusGroup,
  ) -> PaginationState {
    self.with_tab(resource, |tab| tab.pager.return_to_first(group))
  }

  /// Toggle an item in the tab's selection. Returns whether it is now selected.
  pub fn toggle_selection(&self, resource: ResourceType, id: &str) -> bool {
    self.with_tab(resource, |tab| {
      if !tab.items.iter().any(|item| item.id == id) {
        return false;
      }
      if tab.selection.remove(id) {
        false
      } else {
        tab.selection.insert(id.to_string())
      }
    })
  }

  pub fn item(&self, resource: ResourceType, id: &str) -> Option<ApprovalItem> {
    self.with_tab(resource, |tab| tab.items.iter().find(|item| item.id == id).cloned())
  }

  pub fn sync_state(&self, resource: ResourceType, id: &str) -> SyncState {
    self.with_tab(resource, |tab| tab.sync.get(id).copied().unwrap_or_default())
  }

  pub fn view(&self, resource: ResourceType) -> TabView {
    self.with_tab(resource, |tab| TabView {
      resource,
      loading: tab.load == LoadState::Loading,
      error: tab.error.clone(),
      total_items: tab.items.len(),
      selected: tab.selection.clone(),
      groups: StatusGroup::ALL
        .into_iter()
        .map(|group| (group, tab.pager.page_of(group, &tab.items)))
        .collect(),
    })
  }

  /// Approve one item.
  pub async fn approve(self: &Arc<Self>, resource: ResourceType, id: &str) -> MutationOutcome {
    self
      .mutate(resource, vec![id.to_string()], ApprovalStatus::Approved, None)
      .await
  }

  /// Ask for changes on one item.
  pub async fn request_changes(
    self: &Arc<Self>,
    resource: ResourceType,
    id: &str,
    reason: &str,
  ) -> MutationOutcome {
    self
      .mutate(
        resource,
        vec![id.to_string()],
        ApprovalStatus::ChangesRequested,
        Some(reason.to_string()),
      )
      .await
  }

  /// Apply `status` to every selected item of the tab, then clear the selection.
  pub async fn bulk_update(
    self: &Arc<Self>,
    resource: ResourceType,
    status: ApprovalStatus,
    reason: Option<String>,
  ) -> MutationOutcome {
    let ids: Vec<String> = self.with_tab(resource, |tab| {
      std::mem::take(&mut tab.selection).into_iter().collect()
    });
    self.mutate(resource, ids, status, reason).await
  }

  /// Two-phase status change: show it locally right away, tell the store,
  /// then schedule a refetch whose result replaces the local guess.
  async fn mutate(
    self: &Arc<Self>,
    resource: ResourceType,
    ids: Vec<String>,
    status: ApprovalStatus,
    reason: Option<String>,
  ) -> MutationOutcome {
    self.with_tab(resource, |tab| {
      for id in &ids {
        if !tab.apply_optimistic(id, status) {
          warn!(resource = %resource, item = %id, "status change for an item not on screen");
        }
        tab.selection.remove(id);
      }
    });
    info!(resource = %resource, status = %status, items = ids.len(), "updating status");

    let updates = ids.iter().map(|id| {
      let update = StatusUpdate {
        resource,
        item_id: id.clone(),
        status,
        revision_reason: reason.clone(),
      };
      async move { (update.item_id.clone(), self.client.update_status(&update).await) }
    });
    let failures = join_all(updates)
      .await
      .into_iter()
      .filter_map(|(id, result)| result.err().map(|e| (id, e)))
      .collect();

    MutationOutcome {
      failures,
      reconcile: self.schedule_reconcile(resource),
    }
  }

  fn schedule_reconcile(self: &Arc<Self>, resource: ResourceType) -> JoinHandle<()> {
    let dashboard = Arc::clone(self);
    let delay = self.refetch_delay;
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let outcome = dashboard.reconcile(resource).await;
      debug!(resource = %resource, ?outcome, "reconciled after status change");
    })
  }
}

struct FetchedTab {
  items: Vec<ApprovalItem>,
  source: CacheSource,
  error: Option<String>,
}

/// The least trustworthy of two sources.
fn worst_source(a: CacheSource, b: CacheSource) -> CacheSource {
  let rank = |s: CacheSource| match s {
    CacheSource::CacheFresh => 0,
    CacheSource::Network => 1,
    CacheSource::Stale => 2,
    CacheSource::Empty => 3,
  };
  if rank(a) >= rank(b) {
    a
  } else {
    b
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::approvals::client::HttpResponse;
  use crate::approvals::testing::FakeTransport;
  use crate::cache::clock::ManualClock;
  use crate::cache::MemoryStore;

  fn client(id: &str) -> ClientFilter {
    ClientFilter::Client(id.to_string())
  }

  fn dashboard(initial: Option<ClientFilter>) -> Arc<Dashboard<FakeTransport>> {
    let config = Config::default();
    let cached = CachedApprovalsClient::new(
      FakeTransport::new(),
      Arc::new(MemoryStore::new()),
      Arc::new(ManualClock::default()),
      &config,
    );
    Arc::new(Dashboard::new(cached, ClientContext::new(initial), &config))
  }

  fn transport(dashboard: &Dashboard<FakeTransport>) -> &FakeTransport {
    dashboard.client().transport()
  }

  fn ids(dashboard: &Dashboard<FakeTransport>, resource: ResourceType) -> Vec<String> {
    dashboard.with_tab(resource, |tab| tab.items.iter().map(|i| i.id.clone()).collect())
  }

  #[tokio::test]
  async fn test_unresolved_client_suppresses_requests() {
    let dashboard = dashboard(None);

    assert_eq!(dashboard.load_tab(ResourceType::Briefs).await, LoadOutcome::Suppressed);
    assert_eq!(transport(&dashboard).get_count(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_approve_is_optimistic_then_reconciled() {
    let dashboard = dashboard(Some(client("client1")));
    transport(&dashboard).set_page(
      ResourceType::Briefs,
      "client1",
      &[("brief1", "Awaiting Approval")],
    );
    dashboard.load_tab(ResourceType::Briefs).await;
    let gets_before = transport(&dashboard).get_count();

    // The store settles on a different answer than the optimistic one.
    transport(&dashboard).set_page(ResourceType::Briefs, "client1", &[("brief1", "Published")]);
    let outcome = dashboard.approve(ResourceType::Briefs, "brief1").await;

    let item = dashboard.item(ResourceType::Briefs, "brief1").unwrap();
    assert_eq!(item.status, ApprovalStatus::Approved);
    assert_eq!(
      dashboard.sync_state(ResourceType::Briefs, "brief1"),
      SyncState::Pending {
        previous: ApprovalStatus::AwaitingApproval,
        requested: ApprovalStatus::Approved
      }
    );
    assert!(outcome.failures.is_empty());
    let posts = transport(&dashboard).posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].status, ApprovalStatus::Approved);
    let query = PageQuery::new(ResourceType::Briefs, client("client1"));
    assert!(dashboard.client().peek(&query).is_none());

    let started = tokio::time::Instant::now();
    outcome.reconcile.await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert_eq!(transport(&dashboard).get_count(), gets_before + 1);
    let item = dashboard.item(ResourceType::Briefs, "brief1").unwrap();
    assert_eq!(item.status, ApprovalStatus::Published);
    assert_eq!(dashboard.sync_state(ResourceType::Briefs, "brief1"), SyncState::Reconciled);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_update_keeps_optimistic_state_until_refetch_reverts_it() {
    let dashboard = dashboard(Some(client("client1")));
    transport(&dashboard).set_page(
      ResourceType::Articles,
      "client1",
      &[("a1", "Awaiting Approval")],
    );
    dashboard.load_tab(ResourceType::Articles).await;
    transport(&dashboard).set_post_response(Ok(HttpResponse {
      status: 500,
      body: r#"{"error": "Airtable unavailable"}"#.to_string(),
    }));

    let outcome = dashboard
      .request_changes(ResourceType::Articles, "a1", "needs sources")
      .await;

    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(
      dashboard.item(ResourceType::Articles, "a1").unwrap().status,
      ApprovalStatus::ChangesRequested
    );
    assert_eq!(
      transport(&dashboard).posts()[0].revision_reason.as_deref(),
      Some("needs sources")
    );

    outcome.reconcile.await.unwrap();
    assert_eq!(
      dashboard.item(ResourceType::Articles, "a1").unwrap().status,
      ApprovalStatus::AwaitingApproval
    );
  }

  #[tokio::test]
  async fn test_client_switch_discards_in_flight_load() {
    let dashboard = dashboard(Some(client("client1")));
    let transport = transport(&dashboard);
    transport.set_page(ResourceType::Keywords, "client1", &[("c1-kw", "Awaiting Approval")]);
    transport.set_page(ResourceType::Keywords, "client2", &[("c2-kw", "Awaiting Approval")]);
    let gate = transport.hold("client1");

    let pending = {
      let dashboard = dashboard.clone();
      tokio::spawn(async move { dashboard.load_tab(ResourceType::Keywords).await })
    };
    while transport.get_count() == 0 {
      tokio::task::yield_now().await;
    }

    let switched = dashboard.switch_client(client("client2")).await;
    assert!(matches!(switched, Some(LoadOutcome::Loaded { items: 1, .. })));

    gate.add_permits(1);
    assert_eq!(pending.await.unwrap(), LoadOutcome::Discarded);

    assert_eq!(ids(&dashboard, ResourceType::Keywords), vec!["c2-kw".to_string()]);
    let stale_query = PageQuery::new(ResourceType::Keywords, client("client1"));
    assert!(dashboard.client().peek(&stale_query).is_none());
  }

  #[tokio::test]
  async fn test_client_switch_clears_every_tab_and_cache() {
    let dashboard = dashboard(Some(client("client1")));
    transport(&dashboard).set_page(ResourceType::Briefs, "client1", &[("b1", "In Progress")]);
    transport(&dashboard).set_page(ResourceType::Articles, "client1", &[("a1", "In Progress")]);
    dashboard.load_all_tabs().await;
    dashboard.toggle_selection(ResourceType::Briefs, "b1");

    assert_eq!(dashboard.switch_client(client("client1")).await, None);
    assert!(dashboard.switch_client(client("client2")).await.is_some());

    assert!(ids(&dashboard, ResourceType::Briefs).is_empty());
    assert!(ids(&dashboard, ResourceType::Articles).is_empty());
    assert!(dashboard.view(ResourceType::Briefs).selected.is_empty());
    let old = PageQuery::new(ResourceType::Articles, client("client1"));
    assert!(dashboard.client().peek(&old).is_none());
  }

  #[tokio::test]
  async fn test_load_all_tabs_fetches_each_type() {
    let dashboard = dashboard(Some(ClientFilter::All));
    transport(&dashboard).set_page(ResourceType::Backlinks, "all", &[("bl1", "Approved")]);

    let outcomes = dashboard.load_all_tabs().await;

    assert_eq!(outcomes.len(), ResourceType::ALL.len());
    assert_eq!(transport(&dashboard).get_count(), ResourceType::ALL.len());
    assert_eq!(ids(&dashboard, ResourceType::Backlinks), vec!["bl1".to_string()]);
  }

  #[tokio::test]
  async fn test_tab_with_data_is_not_refetched() {
    let dashboard = dashboard(Some(client("client1")));
    transport(&dashboard).set_page(ResourceType::Briefs, "client1", &[("b1", "In Progress")]);
    dashboard.switch_tab(ResourceType::Briefs).await;
    let gets = transport(&dashboard).get_count();

    dashboard.switch_tab(ResourceType::Keywords).await;
    let again = dashboard.switch_tab(ResourceType::Briefs).await;

    assert_eq!(again, None);
    // Keywords had nothing, so it was loaded; briefs was not touched.
    assert_eq!(transport(&dashboard).get_count(), gets + 1);
  }

  #[tokio::test]
  async fn test_tab_switch_clears_selection() {
    let dashboard = dashboard(Some(client("client1")));
    transport(&dashboard).set_page(ResourceType::Briefs, "client1", &[("b1", "In Progress")]);
    dashboard.load_tab(ResourceType::Briefs).await;
    assert!(dashboard.toggle_selection(ResourceType::Briefs, "b1"));

    dashboard.switch_tab(ResourceType::Articles).await;

    assert!(dashboard.view(ResourceType::Briefs).selected.is_empty());
  }

  #[tokio::test]
  async fn test_toggle_unknown_item_is_ignored() {
    let dashboard = dashboard(Some(client("client1")));
    assert!(!dashboard.toggle_selection(ResourceType::Briefs, "ghost"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_bulk_update_covers_selection_and_clears_it() {
    let dashboard = dashboard(Some(client("client1")));
    transport(&dashboard).set_page(
      ResourceType::Keywords,
      "client1",
      &[("k1", "Awaiting Approval"), ("k2", "Awaiting Approval"), ("k3", "Awaiting Approval")],
    );
    dashboard.load_tab(ResourceType::Keywords).await;
    dashboard.toggle_selection(ResourceType::Keywords, "k1");
    dashboard.toggle_selection(ResourceType::Keywords, "k3");

    let outcome = dashboard
      .bulk_update(ResourceType::Keywords, ApprovalStatus::Approved, None)
      .await;

    let mut posted: Vec<String> = transport(&dashboard)
      .posts()
      .into_iter()
      .map(|p| p.item_id)
      .collect();
    posted.sort();
    assert_eq!(posted, vec!["k1".to_string(), "k3".to_string()]);
    assert!(dashboard.view(ResourceType::Keywords).selected.is_empty());
    assert_eq!(
      dashboard.item(ResourceType::Keywords, "k2").unwrap().status,
      ApprovalStatus::AwaitingApproval
    );
    outcome.reconcile.await.unwrap();
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_first_load_shows_empty_with_banner() {
    let dashboard = dashboard(Some(client("client1")));
    for _ in 0..3 {
      transport(&dashboard).push(Err(FetchError::Timeout(Duration::from_secs(15))));
    }

    let outcome = dashboard.load_tab(ResourceType::Briefs).await;

    assert!(matches!(outcome, LoadOutcome::Degraded { items: 0, .. }));
    let view = dashboard.view(ResourceType::Briefs);
    assert!(!view.loading);
    assert!(view.error.is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_refresh_keeps_current_view() {
    let dashboard = dashboard(Some(client("client1")));
    transport(&dashboard).set_page(ResourceType::Briefs, "client1", &[("b1", "In Progress")]);
    dashboard.load_tab(ResourceType::Briefs).await;
    dashboard.client().invalidate_all();
    for _ in 0..3 {
      transport(&dashboard).push(Err(FetchError::Network("reset".to_string())));
    }

    let outcome = dashboard.reconcile(ResourceType::Briefs).await;

    assert!(matches!(outcome, LoadOutcome::Degraded { items: 1, .. }));
    assert_eq!(ids(&dashboard, ResourceType::Briefs), vec!["b1".to_string()]);
  }

  #[tokio::test]
  async fn test_tab_loads_every_api_page() {
    let dashboard = dashboard(Some(client("client1")));
    let transport = transport(&dashboard);
    transport.push(Ok(HttpResponse::ok(
      serde_json::json!({
        "items": [{"id": "a"}, {"id": "b"}],
        "pagination": {"currentPage": 1, "totalPages": 2, "hasNextPage": true}
      })
      .to_string(),
    )));
    transport.push(Ok(HttpResponse::ok(
      serde_json::json!({
        "items": [{"id": "c"}],
        "pagination": {"currentPage": 2, "totalPages": 2, "hasNextPage": false}
      })
      .to_string(),
    )));

    dashboard.load_tab(ResourceType::Articles).await;

    assert_eq!(ids(&dashboard, ResourceType::Articles), vec!["a", "b", "c"]);
    let pages: Vec<String> = transport
      .gets()
      .iter()
      .map(|params| params.iter().find(|(k, _)| k == "page").unwrap().1.clone())
      .collect();
    assert_eq!(pages, vec!["1", "2"]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_on_a_later_page_drops_the_whole_tab() {
    let dashboard = dashboard(Some(client("client1")));
    let transport = transport(&dashboard);
    transport.push(Ok(HttpResponse::ok(
      serde_json::json!({
        "items": [{"id": "a"}, {"id": "b"}],
        "pagination": {"currentPage": 1, "totalPages": 2, "hasNextPage": true}
      })
      .to_string(),
    )));
    for _ in 0..3 {
      transport.push(Err(FetchError::Network("reset".to_string())));
    }

    let outcome = dashboard.load_tab(ResourceType::Articles).await;

    assert!(matches!(outcome, LoadOutcome::Degraded { items: 0, .. }));
    assert!(ids(&dashboard, ResourceType::Articles).is_empty());
    let view = dashboard.view(ResourceType::Articles);
    assert!(view.error.is_some());
    assert!(!view.loading);

    // Nothing was committed, so visiting the tab loads it again.
    transport.set_page(ResourceType::Articles, "client1", &[("a", "In Progress")]);
    let retried = dashboard.switch_tab(ResourceType::Articles).await;
    assert!(matches!(retried, Some(LoadOutcome::Loaded { items: 1, .. })));
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_later_page_keeps_existing_items() {
    let dashboard = dashboard(Some(client("client1")));
    transport(&dashboard).set_page(ResourceType::Briefs, "client1", &[("b1", "In Progress")]);
    dashboard.load_tab(ResourceType::Briefs).await;
    let transport = transport(&dashboard);
    transport.push(Ok(HttpResponse::ok(
      serde_json::json!({
        "items": [{"id": "x"}],
        "pagination": {"currentPage": 1, "totalPages": 2, "hasNextPage": true}
      })
      .to_string(),
    )));
    for _ in 0..3 {
      transport.push(Ok(HttpResponse {
        status: 502,
        body: String::new(),
      }));
    }

    let outcome = dashboard.reconcile(ResourceType::Briefs).await;

    assert!(matches!(outcome, LoadOutcome::Degraded { items: 1, .. }));
    assert_eq!(ids(&dashboard, ResourceType::Briefs), vec!["b1".to_string()]);
  }

  #[tokio::test]
  async fn test_background_tab_load_for_old_client_is_dropped() {
    let dashboard = dashboard(Some(client("client1")));
    let transport = transport(&dashboard);
    transport.set_page(ResourceType::Briefs, "client1", &[("c1-brief", "In Progress")]);
    transport.set_page(ResourceType::Briefs, "client2", &[("c2-brief", "In Progress")]);
    let gate = transport.hold("client1");
    assert_eq!(dashboard.active_tab(), ResourceType::Keywords);

    let pending = {
      let dashboard = dashboard.clone();
      tokio::spawn(async move { dashboard.load_tab(ResourceType::Briefs).await })
    };
    while transport.get_count() == 0 {
      tokio::task::yield_now().await;
    }

    dashboard.switch_client(client("client2")).await;
    gate.add_permits(1);

    assert_eq!(pending.await.unwrap(), LoadOutcome::Discarded);
    assert!(ids(&dashboard, ResourceType::Briefs).is_empty());
    let stale_query = PageQuery::new(ResourceType::Briefs, client("client1"));
    assert!(dashboard.client().peek(&stale_query).is_none());

    // The background tab is still unloaded, so visiting it fetches client2's items.
    let visited = dashboard.switch_tab(ResourceType::Briefs).await;
    assert!(matches!(visited, Some(LoadOutcome::Loaded { items: 1, .. })));
    assert_eq!(ids(&dashboard, ResourceType::Briefs), vec!["c2-brief".to_string()]);
  }

  #[tokio::test]
  async fn test_refresh_of_empty_loaded_tab_shows_no_spinner() {
    let dashboard = dashboard(Some(client("client1")));
    let outcome = dashboard.load_tab(ResourceType::Backlinks).await;
    assert_eq!(
      outcome,
      LoadOutcome::Loaded {
        items: 0,
        source: CacheSource::Network
      }
    );

    let gate = transport(&dashboard).hold("client1");
    let pending = {
      let dashboard = dashboard.clone();
      tokio::spawn(async move { dashboard.reconcile(ResourceType::Backlinks).await })
    };
    while transport(&dashboard).get_count() < 2 {
      tokio::task::yield_now().await;
    }

    assert!(!dashboard.view(ResourceType::Backlinks).loading);
    gate.add_permits(1);
    pending.await.unwrap();
  }

  #[tokio::test]
  async fn test_return_to_first_page_after_group_shrinks() {
    let dashboard = dashboard(Some(client("client1")));
    let items: Vec<(String, &str)> = (0..7)
      .map(|i| (format!("b{}", i), "In Progress"))
      .collect();
    let items: Vec<(&str, &str)> = items.iter().map(|(id, s)| (id.as_str(), *s)).collect();
    transport(&dashboard).set_page(ResourceType::Briefs, "client1", &items);
    dashboard.load_tab(ResourceType::Briefs).await;
    dashboard
      .set_page(ResourceType::Briefs, StatusGroup::InProgress, 2)
      .unwrap();

    transport(&dashboard).set_page(ResourceType::Briefs, "client1", &items[..3]);
    dashboard.reconcile(ResourceType::Briefs).await;

    let in_progress = |view: &TabView| {
      view
        .groups
        .iter()
        .find(|(group, _)| *group == StatusGroup::InProgress)
        .map(|(_, page)| page.clone())
        .unwrap()
    };
    assert_eq!(
      in_progress(&dashboard.view(ResourceType::Briefs)),
      GroupPage::OutOfRange {
        requested: 2,
        total_pages: 1
      }
    );

    let state = dashboard.return_to_first_page(ResourceType::Briefs, StatusGroup::InProgress);
    assert_eq!(state.current_page, 1);
    assert!(matches!(
      in_progress(&dashboard.view(ResourceType::Briefs)),
      GroupPage::Items { items, .. } if items.len() == 3
    ));
  }

  #[tokio::test]
  async fn test_page_change_is_local() {
    let dashboard = dashboard(Some(client("client1")));
    let items: Vec<(String, &str)> = (0..12)
      .map(|i| (format!("k{}", i), "Awaiting Approval"))
      .collect();
    let items: Vec<(&str, &str)> = items.iter().map(|(id, s)| (id.as_str(), *s)).collect();
    transport(&dashboard).set_raw_page(
      ResourceType::Keywords,
      "client1",
      crate::approvals::testing::page_body(&items),
    );
    dashboard.load_tab(ResourceType::Keywords).await;
    let gets = transport(&dashboard).get_count();

    let state = dashboard
      .set_page(ResourceType::Keywords, StatusGroup::AwaitingApproval, 3)
      .unwrap();

    assert_eq!(transport(&dashboard).get_count(), gets);
    assert_eq!((state.total_pages, state.has_next_page, state.has_prev_page), (3, false, true));
    let view = dashboard.view(ResourceType::Keywords);
    let (_, page) = view
      .groups
      .iter()
      .find(|(group, _)| *group == StatusGroup::AwaitingApproval)
      .unwrap();
    assert!(matches!(page, GroupPage::Items { items, .. } if items.len() == 2));
  }
}
