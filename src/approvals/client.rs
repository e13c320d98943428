use crate::approvals::api_types::{parse_page, ApiMutationResponse};
use crate::approvals::cache::PageQuery;
use crate::approvals::types::{Page, StatusUpdate};
use crate::cache::Clock;
use crate::config::{ApiConfig, Config};
use crate::context::ContextToken;
use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Why a request to the approvals endpoint failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  #[error("network error: {0}")]
  Network(String),
  #[error("request timed out after {0:?}")]
  Timeout(Duration),
  #[error("request abandoned: client selection changed while it was in flight")]
  Superseded,
  #[error("server responded {code}: {body}")]
  Status { code: u16, body: String },
  #[error("malformed response: {0}")]
  Validation(String),
  #[error("update rejected: {0}")]
  Rejected(String),
}

impl FetchError {
  /// Transient failures worth another attempt.
  pub fn is_retryable(&self) -> bool {
    match self {
      FetchError::Network(_) | FetchError::Timeout(_) => true,
      FetchError::Status { code, .. } => *code >= 500,
      _ => false,
    }
  }
}

/// Raw HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub body: String,
}

impl HttpResponse {
  pub fn ok(body: impl Into<String>) -> Self {
    Self {
      status: 200,
      body: body.into(),
    }
  }
}

/// The wire underneath [`ApprovalsClient`].
pub trait Transport: Send + Sync {
  /// `GET` the approvals endpoint with the given query parameters.
  fn get<'a>(
    &'a self,
    query: &'a [(&'static str, String)],
  ) -> BoxFuture<'a, Result<HttpResponse, FetchError>>;

  /// `POST` a JSON body to the approvals endpoint.
  fn post<'a>(&'a self, body: &'a StatusUpdate) -> BoxFuture<'a, Result<HttpResponse, FetchError>>;
}

/// reqwest-backed transport
pub struct HttpTransport {
  http: reqwest::Client,
  endpoint: Url,
  token: Option<String>,
}

impl HttpTransport {
  pub fn new(api: &ApiConfig) -> Result<Self> {
    let base = Url::parse(&api.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", api.base_url, e))?;
    let endpoint = base
      .join("approvals")
      .map_err(|e| eyre!("Failed to build approvals URL: {}", e))?;

    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      endpoint,
      token: Config::get_api_token(),
    })
  }

  fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  async fn read(response: reqwest::Response) -> Result<HttpResponse, FetchError> {
    let status = response.status().as_u16();
    let body = response
      .text()
      .await
      .map_err(|e| FetchError::Network(e.to_string()))?;
    Ok(HttpResponse { status, body })
  }
}

impl Transport for HttpTransport {
  fn get<'a>(
    &'a self,
    query: &'a [(&'static str, String)],
  ) -> BoxFuture<'a, Result<HttpResponse, FetchError>> {
    Box::pin(async move {
      let request = self
        .http
        .get(self.endpoint.clone())
        .query(query)
        .header(CACHE_CONTROL, "no-store")
        .header(PRAGMA, "no-cache");

      let response = self
        .authorize(request)
        .send()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?;
      Self::read(response).await
    })
  }

  fn post<'a>(&'a self, body: &'a StatusUpdate) -> BoxFuture<'a, Result<HttpResponse, FetchError>> {
    Box::pin(async move {
      let payload =
        serde_json::to_string(body).map_err(|e| FetchError::Validation(e.to_string()))?;
      let request = self
        .http
        .post(self.endpoint.clone())
        .header(CACHE_CONTROL, "no-store")
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(payload);

      let response = self
        .authorize(request)
        .send()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?;
      Self::read(response).await
    })
  }
}

/// Produces a strictly increasing `_` query value so no intermediary cache
/// can ever answer a read.
struct CacheBuster {
  last: AtomicI64,
}

impl CacheBuster {
  fn new() -> Self {
    Self {
      last: AtomicI64::new(0),
    }
  }

  fn next(&self, now_millis: i64) -> i64 {
    let mut last = self.last.load(Ordering::SeqCst);
    loop {
      let next = now_millis.max(last + 1);
      match self
        .last
        .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
      {
        Ok(_) => return next,
        Err(actual) => last = actual,
      }
    }
  }
}

/// Approvals API client: timeouts, retries and response validation.
pub struct ApprovalsClient<T: Transport> {
  transport: T,
  clock: Arc<dyn Clock>,
  buster: CacheBuster,
  timeout: Duration,
  max_retries: u32,
  retry_base_delay: Duration,
}

impl<T: Transport> ApprovalsClient<T> {
  pub fn new(transport: T, clock: Arc<dyn Clock>, api: &ApiConfig) -> Self {
    Self {
      transport,
      clock,
      buster: CacheBuster::new(),
      timeout: Duration::from_secs(api.timeout_secs),
      max_retries: api.max_retries,
      retry_base_delay: Duration::from_millis(api.retry_base_delay_ms),
    }
  }

  #[cfg(test)]
  pub fn transport(&self) -> &T {
    &self.transport
  }

  fn query_params(&self, query: &PageQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
      ("type", query.resource.as_str().to_string()),
      ("page", query.page.to_string()),
      ("pageSize", query.page_size.to_string()),
      ("clientId", query.client.as_param().to_string()),
    ];
    if let Some(status) = query.status {
      params.push(("status", status.as_str().to_string()));
    }
    if let Some(offset) = &query.offset {
      params.push(("offset", offset.clone()));
    }
    params
  }

  /// Fetch and validate one page, retrying transient failures.
  ///
  /// Network errors, timeouts and 5xx responses are retried `max_retries`
  /// times with the delay doubling each time; 4xx and malformed bodies fail
  /// straight away. With a `token`, no retry is sent once the client
  /// context has moved on.
  pub async fn fetch_page(
    &self,
    query: &PageQuery,
    token: Option<&ContextToken>,
  ) -> Result<Page, FetchError> {
    let mut attempt = 0;
    loop {
      if attempt > 0 && !token.map_or(true, ContextToken::is_current) {
        debug!(resource = %query.resource, attempt, "client changed between retries; giving up");
        return Err(FetchError::Superseded);
      }

      let mut params = self.query_params(query);
      let buster = self.buster.next(self.clock.now().timestamp_millis());
      params.push(("_", buster.to_string()));

      let result = self
        .with_timeout(self.transport.get(&params))
        .await
        .and_then(|response| match response.status {
          200..=299 => parse_page(&response.body, query.resource, query.page),
          code => Err(FetchError::Status {
            code,
            body: response.body,
          }),
        });

      match result {
        Ok(page) => {
          debug!(
            resource = %query.resource,
            page = query.page,
            items = page.items.len(),
            "fetched page"
          );
          return Ok(page);
        }
        Err(e) if e.is_retryable() && attempt < self.max_retries => {
          let delay = self.backoff(attempt);
          attempt += 1;
          warn!(
            resource = %query.resource,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "fetch failed; retrying"
          );
          tokio::time::sleep(delay).await;
        }
        Err(e) => return Err(e),
      }
    }
  }

  /// Delay before retry number `attempt + 1`: the base delay doubled per attempt.
  fn backoff(&self, attempt: u32) -> Duration {
    self
      .retry_base_delay
      .saturating_mul(2u32.saturating_pow(attempt))
  }

  /// Send a status change. Not retried.
  pub async fn update_status(&self, update: &StatusUpdate) -> Result<(), FetchError> {
    let response = self.with_timeout(self.transport.post(update)).await?;

    let parsed: Option<ApiMutationResponse> = serde_json::from_str(&response.body).ok();
    match (response.status, parsed) {
      (200..=299, Some(ApiMutationResponse { error: Some(error), .. })) => {
        Err(FetchError::Rejected(error))
      }
      (200..=299, _) => {
        debug!(item = %update.item_id, status = %update.status, "status update accepted");
        Ok(())
      }
      (code, Some(ApiMutationResponse { error: Some(error), .. })) => Err(FetchError::Status {
        code,
        body: error,
      }),
      (code, _) => Err(FetchError::Status {
        code,
        body: response.body,
      }),
    }
  }

  async fn with_timeout<F>(&self, request: F) -> Result<HttpResponse, FetchError>
  where
    F: std::future::Future<Output = Result<HttpResponse, FetchError>>,
  {
    tokio::time::timeout(self.timeout, request)
      .await
      .map_err(|_| FetchError::Timeout(self.timeout))?
  }
}
