//! The remote side: record shapes, the source error taxonomy and the
//! [`GrcSource`] trait implemented by `grcsync-remote`.
//!
//! The orchestrators depend on this abstraction, never on HTTP types, so they
//! can be exercised against an in-memory source.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// ─── Records ─────────────────────────────────────────────────────────────────

/// A system record as returned by the GRC system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSystem {
  pub external_id: String,
  pub name:        String,
  pub description: Option<String>,
  pub updated_at:  Option<DateTime<Utc>>,
}

/// A control record as returned by the GRC system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteControl {
  pub external_id:        String,
  pub system_external_id: String,
  pub control_number:     String,
  pub title:              String,
  pub family:             Option<String>,
  pub baseline:           Option<String>,
  pub updated_at:         Option<DateTime<Utc>>,
}

/// A statement record as returned by the GRC system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStatement {
  pub external_id:         String,
  pub control_external_id: String,
  pub content:             String,
  pub updated_at:          DateTime<Utc>,
}

/// What the remote acknowledged after a single-record write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReceipt {
  pub external_id: String,
  /// The remote's new modification time, when the response carried one.
  pub updated_at:  Option<DateTime<Utc>>,
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Failures surfaced by a [`GrcSource`]. Callers branch on these variants,
/// never on raw status codes.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceError {
  #[error("authentication failed (HTTP {status})")]
  AuthFailed { status: u16 },

  #[error("remote record not found: {resource}")]
  NotFound { resource: String },

  #[error("rate limited, retry after {retry_after_secs}s")]
  RateLimited { retry_after_secs: u64 },

  #[error("remote server error (HTTP {status}): {message}")]
  ServerError { status: u16, message: String },

  #[error("invalid response: {message}")]
  InvalidResponse { message: String },

  #[error("connection failed: {message}")]
  ConnectionFailed { message: String },

  #[error("request timed out")]
  Timeout,

  /// The remote observed a concurrent modification (HTTP 409).
  #[error("remote reported a conflict: {message}")]
  Conflict { message: String },

  /// Any other 4xx the remote used to refuse the request.
  #[error("remote rejected the request (HTTP {status}): {message}")]
  Rejected { status: u16, message: String },

  #[error("cancelled")]
  Cancelled,
}

impl SourceError {
  /// Kinds the client retries internally before giving up.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      Self::ServerError { .. }
        | Self::ConnectionFailed { .. }
        | Self::Timeout
        | Self::RateLimited { .. }
    )
  }

  /// Whether the remote could not be reached or would not talk to us at all,
  /// as opposed to a failure scoped to one record.
  pub fn is_connectivity(&self) -> bool {
    matches!(
      self,
      Self::AuthFailed { .. }
        | Self::ServerError { .. }
        | Self::ConnectionFailed { .. }
        | Self::Timeout
        | Self::RateLimited { .. }
    )
  }

  pub fn invalid(message: impl Into<String>) -> Self {
    Self::InvalidResponse { message: message.into() }
  }
}

// ─── Paged fetch results ─────────────────────────────────────────────────────

/// Reported to the caller after every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageProgress {
  pub pages_fetched:   u32,
  pub records_fetched: usize,
  /// Total advertised by the server, if it sent one.
  pub total_count:     Option<u64>,
}

/// A record inside an otherwise valid page that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
  pub record_id: Option<String>,
  pub reason:    String,
}

/// Everything a paged fetch produced, including a partial result when it was
/// stopped or failed part-way.
#[derive(Debug, Clone)]
pub struct FetchResult<T> {
  pub records:       Vec<T>,
  pub total_count:   Option<u64>,
  pub pages_fetched: u32,
  /// Rows the fetch skipped past.
  pub rejected:      Vec<RejectedRecord>,
  /// The error that ended the fetch, if any. Records fetched before it are
  /// still in `records`.
  pub error:         Option<SourceError>,
}

impl<T> Default for FetchResult<T> {
  fn default() -> Self {
    Self {
      records:       Vec::new(),
      total_count:   None,
      pages_fetched: 0,
      rejected:      Vec::new(),
      error:         None,
    }
  }
}

impl<T> FetchResult<T> {
  /// A fetch that failed before returning any page.
  pub fn failed(error: SourceError) -> Self {
    Self { error: Some(error), ..Self::default() }
  }

  pub fn was_cancelled(&self) -> bool {
    matches!(self.error, Some(SourceError::Cancelled))
  }

  /// Transform every record, moving the ones `f` refuses into `rejected`.
  pub fn try_map<U>(
    self,
    mut f: impl FnMut(T) -> Result<U, RejectedRecord>,
  ) -> FetchResult<U> {
    let mut rejected = self.rejected;
    let mut records = Vec::with_capacity(self.records.len());
    for record in self.records {
      match f(record) {
        Ok(mapped) => records.push(mapped),
        Err(reject) => rejected.push(reject),
      }
    }
    FetchResult {
      records,
      total_count: self.total_count,
      pages_fetched: self.pages_fetched,
      rejected,
      error: self.error,
    }
  }
}

/// Per-page callback. Returning `false` stops the fetch early, without error.
pub type OnPage<'a> = &'a mut (dyn FnMut(&PageProgress) -> bool + Send);

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the GRC system of record.
///
/// Implementations own pagination, retry and rate-limit handling; the
/// orchestrators only see records and [`SourceError`]s.
pub trait GrcSource: Send + Sync {
  /// Fetch one system by its remote id.
  fn fetch_system<'a>(
    &'a self,
    external_id: &'a str,
    cancel: &'a CancellationToken,
  ) -> impl Future<Output = Result<RemoteSystem, SourceError>> + Send + 'a;

  /// Page through all controls of a system.
  fn fetch_controls<'a>(
    &'a self,
    system_external_id: &'a str,
    cancel: &'a CancellationToken,
    on_page: OnPage<'a>,
  ) -> impl Future<Output = FetchResult<RemoteControl>> + Send + 'a;

  /// Page through all statements of a control.
  fn fetch_statements<'a>(
    &'a self,
    control_external_id: &'a str,
    cancel: &'a CancellationToken,
  ) -> impl Future<Output = FetchResult<RemoteStatement>> + Send + 'a;

  /// Fetch the current remote copy of one statement.
  fn fetch_statement<'a>(
    &'a self,
    external_id: &'a str,
    cancel: &'a CancellationToken,
  ) -> impl Future<Output = Result<RemoteStatement, SourceError>> + Send + 'a;

  /// Write new content to one statement.
  ///
  /// Returns [`SourceError::NotFound`] if the record is gone,
  /// [`SourceError::Conflict`] if the remote saw a concurrent change, and
  /// [`SourceError::Rejected`] for any other refusal.
  fn update_statement<'a>(
    &'a self,
    external_id: &'a str,
    content: &'a str,
    cancel: &'a CancellationToken,
  ) -> impl Future<Output = Result<UpdateReceipt, SourceError>> + Send + 'a;
}
