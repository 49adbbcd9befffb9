//! Async HTTP client for the GRC system's table API.

use std::time::Duration;

use grcsync_core::remote::{FetchResult, OnPage, PageProgress, RejectedRecord, SourceError};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
  config::{RemoteSchema, SourceConfig},
  retry::{RetryPolicy, classify_status, classify_transport},
};

/// Longest error body kept in a [`SourceError`] message.
const MAX_ERROR_BODY: usize = 512;

/// Response envelope: `{ "result": ... }`.
#[derive(Deserialize)]
struct Envelope<T> {
  result: T,
}

/// Row filter and projection for a paged table read.
#[derive(Debug, Clone, Default)]
pub struct PageQuery {
  /// Encoded query string, sent as `sysparm_query`.
  pub query:  Option<String>,
  /// Fields to return, sent as `sysparm_fields`. Empty means all.
  pub fields: Vec<String>,
}

struct Page {
  rows:        Vec<Value>,
  total_count: Option<u64>,
}

/// Client for the remote GRC system.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct GrcClient {
  client:            Client,
  config:            SourceConfig,
  pub(crate) schema: RemoteSchema,
  policy:            RetryPolicy,
}

impl GrcClient {
  pub fn new(config: SourceConfig, schema: RemoteSchema) -> reqwest::Result<Self> {
    let client = Client::builder().timeout(config.request_timeout()).build()?;
    let policy = RetryPolicy::from_config(&config);
    Ok(Self { client, config, schema, policy })
  }

  pub fn config(&self) -> &SourceConfig { &self.config }

  fn table_url(&self, table: &str) -> String {
    format!(
      "{}{}/{}",
      self.config.base_url.trim_end_matches('/'),
      self.schema.table_path,
      table
    )
  }

  fn record_url(&self, table: &str, id: &str) -> String {
    format!("{}/{}", self.table_url(table), id)
  }

  fn auth(&self, req: RequestBuilder) -> RequestBuilder {
    if let Some(token) = &self.config.bearer_token {
      req.bearer_auth(token)
    } else if let Some(username) = &self.config.username {
      req.basic_auth(username, self.config.password.as_deref())
    } else {
      req
    }
  }

  // ── Transport ─────────────────────────────────────────────────────────────

  /// Send one attempt and classify the outcome.
  async fn attempt(&self, req: RequestBuilder, resource: &str) -> Result<Response, SourceError> {
    let resp = self
      .auth(req)
      .header(reqwest::header::ACCEPT, "application/json")
      .send()
      .await
      .map_err(|e| classify_transport(&e))?;

    let status = resp.status();
    if status.is_success() {
      return Ok(resp);
    }

    let headers = resp.headers().clone();
    let mut body = resp.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
      let mut cut = MAX_ERROR_BODY;
      while !body.is_char_boundary(cut) {
        cut -= 1;
      }
      body.truncate(cut);
    }
    Err(classify_status(
      status,
      &headers,
      body,
      resource,
      self.config.default_retry_after_secs,
    ))
  }

  /// Run a request with retries. `build` is called once per attempt.
  ///
  /// Cancellation is checked before every attempt and interrupts any wait;
  /// an attempt already in flight runs to completion or timeout.
  async fn execute(
    &self,
    resource: &str,
    cancel: &CancellationToken,
    build: impl Fn() -> RequestBuilder,
  ) -> Result<Response, SourceError> {
    let mut state = self.policy.start();
    loop {
      if cancel.is_cancelled() {
        return Err(SourceError::Cancelled);
      }

      let err = match self.attempt(build(), resource).await {
        Ok(resp) => return Ok(resp),
        Err(err) => err,
      };

      let Some(delay) = state.next_delay(&err) else {
        if err.is_transient() {
          warn!(%resource, error = %err, elapsed = ?state.elapsed(), "giving up after retries");
        }
        return Err(err);
      };

      warn!(%resource, error = %err, delay = ?delay, "request failed, retrying");
      if !sleep_or_cancel(delay, cancel).await {
        return Err(SourceError::Cancelled);
      }
    }
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn fetch_page(
    &self,
    table: &str,
    query: &PageQuery,
    offset: u64,
    limit: u32,
    cancel: &CancellationToken,
  ) -> Result<Page, SourceError> {
    let url = self.table_url(table);
    let mut params: Vec<(&str, String)> = vec![
      ("sysparm_offset", offset.to_string()),
      ("sysparm_limit", limit.to_string()),
    ];
    if let Some(q) = &query.query {
      params.push(("sysparm_query", q.clone()));
    }
    if !query.fields.is_empty() {
      params.push(("sysparm_fields", query.fields.join(",")));
    }

    let resp = self
      .execute(table, cancel, || self.client.get(&url).query(&params))
      .await?;

    let total_count = resp
      .headers()
      .get(&self.config.total_count_header)
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.trim().parse::<u64>().ok());

    let envelope: Envelope<Vec<Value>> = resp
      .json()
      .await
      .map_err(|e| SourceError::invalid(format!("{table} page at offset {offset}: {e}")))?;

    Ok(Page { rows: envelope.result, total_count })
  }

  /// Read every page of `table` matching `query`.
  ///
  /// Stops when the advertised total is reached, when a page comes back
  /// shorter than the page size, when `on_page` returns `false`, or on the
  /// first unrecoverable error. Rows that fail to decode into `T` are listed
  /// in `rejected` rather than failing the page.
  pub async fn fetch_all_pages<T: DeserializeOwned>(
    &self,
    table: &str,
    query: &PageQuery,
    cancel: &CancellationToken,
    on_page: OnPage<'_>,
  ) -> FetchResult<T> {
    let limit = self.config.page_size.max(1);
    let mut out = FetchResult::default();
    let mut offset: u64 = 0;

    loop {
      if cancel.is_cancelled() {
        out.error = Some(SourceError::Cancelled);
        break;
      }

      let page = match self.fetch_page(table, query, offset, limit, cancel).await {
        Ok(page) => page,
        Err(err) => {
          out.error = Some(err);
          break;
        }
      };

      out.pages_fetched += 1;
      if page.total_count.is_some() {
        out.total_count = page.total_count;
      }
      let page_len = page.rows.len();
      offset += page_len as u64;

      for row in page.rows {
        let record_id = row
          .get(&self.schema.id_field)
          .and_then(Value::as_str)
          .map(str::to_owned);
        match serde_json::from_value::<T>(row) {
          Ok(record) => out.records.push(record),
          Err(e) => out.rejected.push(RejectedRecord { record_id, reason: e.to_string() }),
        }
      }

      debug!(table, page = out.pages_fetched, rows = page_len, total = ?out.total_count, "fetched page");

      let progress = PageProgress {
        pages_fetched:   out.pages_fetched,
        records_fetched: usize::try_from(offset).unwrap_or(usize::MAX),
        total_count:     out.total_count,
      };
      if !on_page(&progress) {
        debug!(table, "page fetch stopped by caller");
        break;
      }

      let more = match out.total_count {
        Some(total) => offset < total,
        None => page_len == limit as usize,
      };
      if page_len == 0 || !more {
        break;
      }
    }

    out
  }

  /// `GET {table}/{id}`
  pub async fn fetch_record<T: DeserializeOwned>(
    &self,
    table: &str,
    id: &str,
    fields: &[String],
    cancel: &CancellationToken,
  ) -> Result<T, SourceError> {
    let url = self.record_url(table, id);
    let resource = format!("{table}/{id}");
    let fields = fields.join(",");

    let resp = self
      .execute(&resource, cancel, || {
        let req = self.client.get(&url);
        if fields.is_empty() { req } else { req.query(&[("sysparm_fields", &fields)]) }
      })
      .await?;

    let envelope: Envelope<T> = resp
      .json()
      .await
      .map_err(|e| SourceError::invalid(format!("{resource}: {e}")))?;
    Ok(envelope.result)
  }

  // ── Writes ────────────────────────────────────────────────────────────────

  /// `PATCH {table}/{id}` with `body`, returning the updated record.
  pub async fn update_record<T: DeserializeOwned>(
    &self,
    table: &str,
    id: &str,
    body: &Value,
    cancel: &CancellationToken,
  ) -> Result<T, SourceError> {
    let url = self.record_url(table, id);
    let resource = format!("{table}/{id}");

    let resp = self
      .execute(&resource, cancel, || self.client.patch(&url).json(body))
      .await?;

    let envelope: Envelope<T> = resp
      .json()
      .await
      .map_err(|e| SourceError::invalid(format!("{resource}: {e}")))?;
    Ok(envelope.result)
  }
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancellation.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
  tokio::select! {
    _ = cancel.cancelled() => false,
    _ = tokio::time::sleep(delay) => true,
  }
}
