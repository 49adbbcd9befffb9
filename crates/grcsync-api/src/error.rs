//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use grcsync_core::remote::SourceError;
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("conflict: {0}")]
  Conflict(String),

  /// The GRC system failed or refused a call made on the caller's behalf.
  #[error("remote error: {0}")]
  Remote(#[source] SourceError),

  #[error("internal error: {0}")]
  Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Internal(Box::new(err))
  }
}

impl From<grcsync_engine::Error> for ApiError {
  fn from(err: grcsync_engine::Error) -> Self {
    use grcsync_engine::Error as E;
    match err {
      E::StatementNotFound(_) | E::JobNotFound(_) => Self::NotFound(err.to_string()),
      E::Source(SourceError::NotFound { resource }) => {
        Self::NotFound(format!("remote record {resource}"))
      }
      E::Source(e) => Self::Remote(e),
      E::JobAlreadyRunning { .. }
      | E::StatementHasConflict(_)
      | E::StatementBusy(_)
      | E::JobFinished(_) => Self::Conflict(err.to_string()),
      E::StatementNotModified(_) | E::EmptyRequest(_) => Self::BadRequest(err.to_string()),
      E::Store(_) | E::Export(_) => Self::internal(err),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self {
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Conflict(_) => StatusCode::CONFLICT,
      ApiError::Remote(SourceError::RateLimited { .. }) => StatusCode::SERVICE_UNAVAILABLE,
      ApiError::Remote(SourceError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
      ApiError::Remote(_) => StatusCode::BAD_GATEWAY,
      ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
      tracing::error!(error = %self, "request failed");
    }
    let message = match &self {
      ApiError::NotFound(m) | ApiError::BadRequest(m) | ApiError::Conflict(m) => m.clone(),
      other => other.to_string(),
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
