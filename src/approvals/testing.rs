//! Scripted in-memory transport for tests.

use futures::future::BoxFuture;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use super::client::{FetchError, HttpResponse, Transport};
use super::types::{ResourceType, StatusUpdate};

/// Build a `GET /approvals` body with one item per `(id, status label)`.
pub fn page_body(items: &[(&str, &str)]) -> String {
  let items: Vec<_> = items
    .iter()
    .map(|(id, status)| json!({"id": id, "name": format!("Item {}", id), "status": status}))
    .collect();
  json!({
    "items": items,
    "pagination": {
      "currentPage": 1,
      "totalPages": 1,
      "totalItems": items.len(),
      "hasNextPage": false,
      "hasPrevPage": false
    }
  })
  .to_string()
}

/// Transport answering from a table of pages keyed by `(type, clientId)`.
///
/// Queued responses take priority over the table. A client can be "held":
/// its requests then block until the returned semaphore gets a permit.
#[derive(Default)]
pub struct FakeTransport {
  pages: Mutex<HashMap<(String, String), String>>,
  queued: Mutex<VecDeque<Result<HttpResponse, FetchError>>>,
  holds: Mutex<HashMap<String, Arc<Semaphore>>>,
  post_response: Mutex<Option<Result<HttpResponse, FetchError>>>,
  gets: Mutex<Vec<Vec<(String, String)>>>,
  posts: Mutex<Vec<StatusUpdate>>,
  get_count: AtomicUsize,
}

impl FakeTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_page(&self, resource: ResourceType, client: &str, items: &[(&str, &str)]) {
    self.set_raw_page(resource, client, page_body(items));
  }

  pub fn set_raw_page(&self, resource: ResourceType, client: &str, body: String) {
    self
      .pages
      .lock()
      .unwrap()
      .insert((resource.as_str().to_string(), client.to_string()), body);
  }

  pub fn push(&self, response: Result<HttpResponse, FetchError>) {
    self.queued.lock().unwrap().push_back(response);
  }

  /// Block requests for `client` until permits are added to the returned semaphore.
  pub fn hold(&self, client: &str) -> Arc<Semaphore> {
    let gate = Arc::new(Semaphore::new(0));
    self
      .holds
      .lock()
      .unwrap()
      .insert(client.to_string(), gate.clone());
    gate
  }

  pub fn set_post_response(&self, response: Result<HttpResponse, FetchError>) {
    *self.post_response.lock().unwrap() = Some(response);
  }

  pub fn get_count(&self) -> usize {
    self.get_count.load(Ordering::SeqCst)
  }

  pub fn gets(&self) -> Vec<Vec<(String, String)>> {
    self.gets.lock().unwrap().clone()
  }

  pub fn posts(&self) -> Vec<StatusUpdate> {
    self.posts.lock().unwrap().clone()
  }
}

fn param<'a>(query: &'a [(&'static str, String)], name: &str) -> &'a str {
  query
    .iter()
    .find(|(k, _)| *k == name)
    .map(|(_, v)| v.as_str())
    .unwrap_or_default()
}

impl Transport for FakeTransport {
  fn get<'a>(
    &'a self,
    query: &'a [(&'static str, String)],
  ) -> BoxFuture<'a, Result<HttpResponse, FetchError>> {
    Box::pin(async move {
      self.get_count.fetch_add(1, Ordering::SeqCst);
      self.gets.lock().unwrap().push(
        query
          .iter()
          .map(|(k, v)| (k.to_string(), v.clone()))
          .collect(),
      );

      let client = param(query, "clientId").to_string();
      let gate = self.holds.lock().unwrap().get(&client).cloned();
      if let Some(gate) = gate {
        if let Ok(permit) = gate.acquire().await {
          permit.forget();
        }
      }

      if let Some(response) = self.queued.lock().unwrap().pop_front() {
        return response;
      }

      let key = (param(query, "type").to_string(), client);
      let body = self
        .pages
        .lock()
        .unwrap()
        .get(&key)
        .cloned()
        .unwrap_or_else(|| page_body(&[]));
      Ok(HttpResponse::ok(body))
    })
  }

  fn post<'a>(&'a self, body: &'a StatusUpdate) -> BoxFuture<'a, Result<HttpResponse, FetchError>> {
    Box::pin(async move {
      self.posts.lock().unwrap().push(body.clone());
      self
        .post_response
        .lock()
        .unwrap()
        .clone()
        .unwrap_or_else(|| {
          let reply = json!({"updatedItem": {"id": body.item_id}});
          Ok(HttpResponse::ok(reply.to_string()))
        })
    })
  }
}
