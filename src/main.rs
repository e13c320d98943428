mod approvals;
mod cache;
mod config;
mod context;
mod dashboard;
mod logging;
mod pagination;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

use approvals::cache::PageQuery;
use approvals::cached_client::CachedApprovalsClient;
use approvals::client::HttpTransport;
use approvals::types::{ApprovalItem, ApprovalStatus, Page, ResourceType, StatusGroup};
use cache::{CacheResult, KeyValueStore, MemoryStore, SqliteStore, SystemClock};
use context::{ClientContext, ClientFilter};
use dashboard::{Dashboard, LoadOutcome, MutationOutcome, TabView};
use pagination::GroupPage;

#[derive(Parser, Debug)]
#[command(name = "portal")]
#[command(about = "Cached client for the marketing operations approvals portal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/portal/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Client to act for ("all" for every client); defaults to the saved selection
  #[arg(long, global = true)]
  client: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch one API page of a content type
  List {
    resource: ResourceType,
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long)]
    page_size: Option<u32>,
    #[arg(long)]
    status: Option<ApprovalStatus>,
    /// Skip the cache and go to the network
    #[arg(long)]
    no_cache: bool,
  },
  /// Open a tab and show it grouped by status
  Tab {
    resource: ResourceType,
    /// Status group to page through
    #[arg(long)]
    group: Option<StatusGroup>,
    #[arg(long, requires = "group")]
    page: Option<u32>,
    /// Return the group to its first page
    #[arg(long, requires = "group", conflicts_with = "page")]
    first: bool,
  },
  /// Load every tab at once
  LoadAll,
  /// Approve one item, or several at once
  Approve {
    resource: ResourceType,
    #[arg(required = true)]
    ids: Vec<String>,
  },
  /// Request changes on an item
  RequestChanges {
    resource: ResourceType,
    id: String,
    #[arg(long)]
    reason: String,
  },
  /// Drop cached pages, for one content type or all of them
  Invalidate { resource: Option<ResourceType> },
  /// Show the saved client selection, or switch to another client
  Client {
    /// Client id, or "all"
    switch_to: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init()?;

  let durable: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open()?);
  let cache_store: Arc<dyn KeyValueStore> = if config.cache.durable {
    durable.clone()
  } else if let Some(bytes) = config.cache.session_quota_bytes {
    Arc::new(MemoryStore::with_quota(bytes))
  } else {
    Arc::new(MemoryStore::new())
  };

  let context = match args.client.as_deref() {
    Some(client) => ClientContext::new(Some(ClientFilter::from_param(Some(client)))),
    None => ClientContext::from_store(durable.as_ref(), &config.client_context_key)?,
  };

  if let Command::Client { switch_to: None } = args.command {
    match context.current() {
      Some(client) => println!("{}", client),
      None => println!("(unresolved)"),
    }
    return Ok(());
  }

  let client = CachedApprovalsClient::new(
    HttpTransport::new(&config.api)?,
    cache_store,
    Arc::new(SystemClock),
    &config,
  );
  let dashboard = Arc::new(Dashboard::new(client, context, &config));

  match args.command {
    Command::List {
      resource,
      page,
      page_size,
      status,
      no_cache,
    } => {
      let Some(filter) = dashboard.current_client() else {
        println!("no client selected");
        return Ok(());
      };
      let query = PageQuery::new(resource, filter)
        .page(page)
        .page_size(page_size.unwrap_or(config.api_page_size))
        .status(status);
      print_page(&dashboard.client().fetch_page(&query, !no_cache).await);
    }
    Command::Tab {
      resource,
      group,
      page,
      first,
    } => {
      match dashboard.switch_tab(resource).await {
        Some(outcome) => report_load(resource, &outcome),
        None => println!("{}: already loaded", resource),
      }
      if let Some(group) = group {
        if first {
          dashboard.return_to_first_page(resource, group);
        } else if let Some(page) = page {
          dashboard.set_page(resource, group, page)?;
        }
      }
      print_tab(&dashboard.view(resource));
    }
    Command::LoadAll => {
      for (resource, outcome) in dashboard.load_all_tabs().await {
        report_load(resource, &outcome);
      }
    }
    Command::Approve { resource, ids } => {
      dashboard.load_tab(resource).await;
      let outcome = match ids.as_slice() {
        [id] => dashboard.approve(resource, id).await,
        _ => {
          for id in &ids {
            if !dashboard.toggle_selection(resource, id) {
              println!("{} not found in {}; skipped", id, resource);
            }
          }
          dashboard
            .bulk_update(resource, ApprovalStatus::Approved, None)
            .await
        }
      };
      finish_mutation(&dashboard, resource, &ids, outcome).await;
    }
    Command::RequestChanges {
      resource,
      id,
      reason,
    } => {
      dashboard.load_tab(resource).await;
      let outcome = dashboard.request_changes(resource, &id, &reason).await;
      finish_mutation(&dashboard, resource, &[id], outcome).await;
    }
    Command::Invalidate { resource } => {
      let removed = match resource {
        Some(resource) => dashboard.client().invalidate_by_type(resource),
        None => dashboard.client().invalidate_all(),
      };
      println!("removed {} cached page(s)", removed);
    }
    Command::Client { switch_to } => {
      let filter = ClientFilter::from_param(switch_to.as_deref());
      match dashboard.switch_client(filter.clone()).await {
        Some(outcome) => {
          durable.set_item(&config.client_context_key, filter.as_param())?;
          println!("switched to {}; cached pages cleared", filter);
          report_load(dashboard.active_tab(), &outcome);
        }
        None => println!("already on {}", filter),
      }
    }
  }

  Ok(())
}

fn report_load(resource: ResourceType, outcome: &LoadOutcome) {
  match outcome {
    LoadOutcome::Loaded { items, source } => {
      println!("{}: {} item(s) ({:?})", resource, items, source)
    }
    LoadOutcome::Degraded { items, error } => {
      println!("{}: {} item(s), refresh failed: {}", resource, items, error)
    }
    LoadOutcome::Suppressed => println!("{}: no client selected", resource),
    LoadOutcome::Discarded => println!("{}: client changed; result dropped", resource),
  }
}

fn print_page(result: &CacheResult<Page>) {
  if let Some(error) = &result.error {
    println!("! {}", error);
  }
  let info = &result.data.pagination;
  println!(
    "page {}/{} of {} item(s) ({:?})",
    info.current_page, info.total_pages, info.total_items, result.source
  );
  result.data.items.iter().for_each(print_item);
}

fn print_item(item: &ApprovalItem) {
  println!(
    "  {:<20} {:<18} {}",
    item.id,
    item.status,
    item.display_name
  );
}

fn print_tab(view: &TabView) {
  if let Some(error) = &view.error {
    println!("! {}", error);
  }
  for (group, page) in &view.groups {
    match page {
      GroupPage::Items { items, state } => {
        if state.total_items == 0 {
          continue;
        }
        println!(
          "{} ({} item(s), page {}/{})",
          group.label(),
          state.total_items,
          state.current_page,
          state.total_pages
        );
        items.iter().for_each(print_item);
      }
      GroupPage::OutOfRange {
        requested,
        total_pages,
      } => println!(
        "{}: no items on page {} (last page is {}; back to page 1 with --first)",
        group.label(),
        requested,
        total_pages
      ),
    }
  }
}

async fn finish_mutation(
  dashboard: &Dashboard<HttpTransport>,
  resource: ResourceType,
  ids: &[String],
  outcome: MutationOutcome,
) {
  for (item, error) in &outcome.failures {
    println!("update of {} failed: {}", item, error);
  }
  // Wait for the authoritative refetch before reporting the final state.
  let _ = outcome.reconcile.await;
  for id in ids {
    match dashboard.item(resource, id) {
      Some(item) => println!(
        "{} is now {} ({:?})",
        item.id,
        item.status,
        dashboard.sync_state(resource, id)
      ),
      None => println!("{} not found in {}", id, resource),
    }
  }
}
