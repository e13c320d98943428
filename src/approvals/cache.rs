//! Cache keys for approvals queries.

use url::form_urlencoded::byte_serialize;

use crate::cache::QueryKey;
use crate::context::ClientFilter;

use super::types::{ApprovalStatus, ResourceType};

/// Parameters of one `GET /approvals` page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
  pub resource: ResourceType,
  pub page: u32,
  pub page_size: u32,
  /// Upstream cursor for cursor-paginated stores
  pub offset: Option<String>,
  pub client: ClientFilter,
  pub status: Option<ApprovalStatus>,
}

impl PageQuery {
  pub fn new(resource: ResourceType, client: ClientFilter) -> Self {
    Self {
      resource,
      page: 1,
      page_size: 10,
      offset: None,
      client,
      status: None,
    }
  }

  pub fn page(mut self, page: u32) -> Self {
    self.page = page.max(1);
    self
  }

  pub fn page_size(mut self, page_size: u32) -> Self {
    self.page_size = page_size.max(1);
    self
  }

  pub fn offset(mut self, offset: Option<String>) -> Self {
    self.offset = offset;
    self
  }

  pub fn status(mut self, status: Option<ApprovalStatus>) -> Self {
    self.status = status;
    self
  }
}

impl QueryKey for PageQuery {
  fn cache_key(&self, namespace: &str) -> String {
    compose_key(
      namespace,
      self.resource,
      self.page,
      self.page_size,
      self.offset.as_deref(),
      &self.client,
      self.status,
    )
  }

  fn description(&self) -> String {
    let mut description = format!(
      "{} page {} (size {}) for client {}",
      self.resource, self.page, self.page_size, self.client
    );
    if let Some(status) = self.status {
      description.push_str(&format!(" with status {}", status));
    }
    description
  }
}

/// Derive the cache key for a page query.
///
/// Fields appear in a fixed order, each tagged with its name, and free-form
/// values are percent-encoded so they can never contain the separator.
/// Optional fields are omitted entirely when absent; the tags keep a key
/// without `offset` from ever equalling one with it.
pub fn compose_key(
  namespace: &str,
  resource: ResourceType,
  page: u32,
  page_size: u32,
  offset: Option<&str>,
  client: &ClientFilter,
  status: Option<ApprovalStatus>,
) -> String {
  let mut key = format!(
    "{}page={}:size={}:client={}",
    type_prefix(namespace, resource),
    page,
    page_size,
    encode(client.as_param())
  );
  if let Some(offset) = offset {
    key.push_str(":offset=");
    key.push_str(&encode(offset));
  }
  if let Some(status) = status {
    key.push_str(":status=");
    key.push_str(status.as_str());
  }
  key
}

/// Prefix shared by every key composed for `resource`.
pub fn type_prefix(namespace: &str, resource: ResourceType) -> String {
  format!("{}:{}:", namespace, resource.as_str())
}

fn encode(value: &str) -> String {
  byte_serialize(value.as_bytes()).collect()
}
