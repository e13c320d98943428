//! Wire shapes of the approvals endpoint and their normalization.
//!
//! The upstream store names the same field many ways ("name", "title",
//! "Main Keyword", ...). Everything is mapped onto the canonical types in
//! [`super::types`] here, once, so nothing further in uses raw JSON.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::types::{
  ApprovalItem, ApprovalStatus, ItemCount, ItemDetails, Page, PageInfo, ResourceType,
};
use crate::approvals::client::FetchError;

const NAME_FIELDS: &[&str] = &[
  "displayName",
  "name",
  "title",
  "keyword",
  "Main Keyword",
  "Title",
  "Name",
];
const STATUS_FIELDS: &[&str] = &["status", "Status", "approvalStatus", "Approval Status"];
const UPDATED_FIELDS: &[&str] = &["lastUpdated", "updatedAt", "Last Modified", "lastModified"];
const CLIENT_FIELDS: &[&str] = &["clientIds", "clientId", "clients", "Clients", "client"];

// ============================================================================
// Pagination
// ============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiPagination {
  pub current_page: Option<u32>,
  pub total_pages: Option<u32>,
  pub total_items: Option<u64>,
  pub has_next_page: Option<bool>,
  pub has_prev_page: Option<bool>,
  /// Upstream cursor, present when the store paginates by offset token
  pub next_offset: Option<String>,
  pub is_estimate: Option<bool>,
}

impl ApiPagination {
  fn into_page_info(self, requested_page: u32, item_count: usize) -> PageInfo {
    let current_page = self.current_page.unwrap_or(requested_page).max(1);
    let has_next_page = self.has_next_page.unwrap_or_else(|| {
      self.next_offset.is_some() || self.total_pages.is_some_and(|total| current_page < total)
    });
    let total_pages = self
      .total_pages
      .unwrap_or(current_page.saturating_add(u32::from(has_next_page)))
      .max(current_page);
    let has_prev_page = self.has_prev_page.unwrap_or(current_page > 1);

    // A cursor with more pages behind it means the total is a guess at best.
    let approximate =
      self.is_estimate.unwrap_or(false) || (self.next_offset.is_some() && has_next_page);
    let seen = item_count as u64;
    let total_items = match (self.total_items, approximate) {
      (Some(n), false) => ItemCount::Exact(n),
      (Some(n), true) => ItemCount::AtLeast(n.max(seen)),
      (None, false) if !has_next_page => ItemCount::Exact(seen),
      (None, _) => ItemCount::AtLeast(seen),
    };

    PageInfo {
      current_page,
      total_pages,
      total_items,
      has_next_page,
      has_prev_page,
      next_offset: self.next_offset,
    }
  }
}

/// Validate and normalize a `GET /approvals` body.
///
/// The whole page is rejected if `items` is missing or any item lacks an id;
/// a page is never partially trusted.
pub fn parse_page(
  body: &str,
  resource: ResourceType,
  requested_page: u32,
) -> Result<Page, FetchError> {
  let mut root: Map<String, Value> = serde_json::from_str(body)
    .map_err(|e| FetchError::Validation(format!("response is not a JSON object: {}", e)))?;

  let raw_items = match root.remove("items") {
    Some(Value::Array(items)) => items,
    Some(_) => return Err(FetchError::Validation("`items` is not an array".to_string())),
    None => return Err(FetchError::Validation("response has no `items`".to_string())),
  };

  let items = raw_items
    .into_iter()
    .enumerate()
    .map(|(i, raw)| match raw {
      Value::Object(fields) => normalize_item(&fields, resource)
        .ok_or_else(|| FetchError::Validation(format!("item {} has no id", i))),
      _ => Err(FetchError::Validation(format!("item {} is not an object", i))),
    })
    .collect::<Result<Vec<_>, _>>()?;

  let pagination: ApiPagination = match root.remove("pagination") {
    Some(value) => serde_json::from_value(value)
      .map_err(|e| FetchError::Validation(format!("bad pagination: {}", e)))?,
    None => ApiPagination::default(),
  };

  Ok(Page {
    pagination: pagination.into_page_info(requested_page, items.len()),
    items,
  })
}

/// Body of `POST /approvals`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMutationResponse {
  pub updated_item: Option<Value>,
  pub error: Option<String>,
}

// ============================================================================
// Items
// ============================================================================

/// Map one raw record onto an [`ApprovalItem`]. Returns `None` without an id.
pub fn normalize_item(fields: &Map<String, Value>, resource: ResourceType) -> Option<ApprovalItem> {
  let id = first_string(fields, &["id", "recordId", "ID"])?;
  if id.is_empty() {
    return None;
  }

  let display_name = first_string(fields, NAME_FIELDS).unwrap_or_else(|| id.clone());
  let status = first_string(fields, STATUS_FIELDS)
    .and_then(|label| ApprovalStatus::from_label(&label))
    .unwrap_or(ApprovalStatus::NotStarted);

  Some(ApprovalItem {
    id,
    display_name,
    status,
    last_updated: first_string(fields, UPDATED_FIELDS),
    client_ids: client_ids(fields),
    details: details_for(fields, resource),
  })
}

fn details_for(fields: &Map<String, Value>, resource: ResourceType) -> ItemDetails {
  match resource {
    ResourceType::Keywords => ItemDetails::Keyword {
      volume: first_number(fields, &["volume", "searchVolume", "Search Volume"]),
      difficulty: first_number(fields, &["difficulty", "keywordDifficulty", "KD"]),
    },
    ResourceType::Briefs => ItemDetails::Brief {
      target_keyword: first_string(fields, &["targetKeyword", "Target Keyword", "keyword"]),
      due_date: first_string(fields, &["dueDate", "Due Date", "deadline"]),
    },
    ResourceType::Articles => ItemDetails::Article {
      word_count: first_number(fields, &["wordCount", "Word Count", "words"]),
      url: first_string(fields, &["url", "articleUrl", "Article URL", "documentLink"]),
    },
    ResourceType::Backlinks => ItemDetails::Backlink {
      domain: first_string(fields, &["domain", "sourceDomain", "Source Domain"]),
      domain_rating: first_number(fields, &["domainRating", "DR", "Domain Rating"]),
    },
    ResourceType::QuickWins => ItemDetails::QuickWin {
      page_url: first_string(fields, &["pageUrl", "url", "Page URL"]),
      current_position: first_number(fields, &["currentPosition", "position", "Current Position"]),
    },
    ResourceType::YoutubeTopics => ItemDetails::YoutubeTopic {
      channel: first_string(fields, &["channel", "Channel"]),
    },
    ResourceType::YoutubeThumbnails => ItemDetails::YoutubeThumbnail {
      image_url: first_string(fields, &["imageUrl", "thumbnailUrl", "Thumbnail"]),
    },
    ResourceType::RedditThreads => ItemDetails::RedditThread {
      subreddit: first_string(fields, &["subreddit", "Subreddit"]),
      upvotes: first_number(fields, &["upvotes", "Upvotes", "score"]),
    },
  }
}

fn first_string(fields: &Map<String, Value>, names: &[&str]) -> Option<String> {
  names.iter().find_map(|name| match fields.get(*name)? {
    Value::String(s) => Some(s.trim().to_string()),
    Value::Number(n) => Some(n.to_string()),
    // Lookup fields come back as single-element arrays
    Value::Array(values) => values.first().and_then(Value::as_str).map(String::from),
    _ => None,
  })
}

fn first_number(fields: &Map<String, Value>, names: &[&str]) -> Option<u64> {
  names.iter().find_map(|name| match fields.get(*name)? {
    Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0).round() as u64)),
    Value::String(s) => s.replace(',', "").trim().parse().ok(),
    _ => None,
  })
}

fn client_ids(fields: &Map<String, Value>) -> BTreeSet<String> {
  CLIENT_FIELDS
    .iter()
    .find_map(|name| fields.get(*name))
    .map(|value| match value {
      Value::String(s) if !s.is_empty() => [s.clone()].into_iter().collect(),
      Value::Array(values) => values
        .iter()
        .filter_map(Value::as_str)
        .map(String::from)
        .collect(),
      _ => BTreeSet::new(),
    })
    .unwrap_or_default()
}
