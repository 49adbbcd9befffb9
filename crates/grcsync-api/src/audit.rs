//! Handlers for `/audit` endpoints.
//!
//! Both endpoints take the same filter parameters. List-valued filters are
//! comma-separated, e.g. `?event_type=push,conflict_detected&status=failure`.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/audit` | Paged with `limit` / `offset`; newest first |
//! | `GET`  | `/audit/export` | `format=csv` (default) or `jsonl`; every match up to the export cap |

use std::str::FromStr;

use axum::{
  Json,
  extract::{Query, State},
  http::header,
  response::IntoResponse,
};
use chrono::{DateTime, Utc};
use grcsync_core::{
  audit::{AuditFilter, AuditPage},
  remote::GrcSource,
  store::{AuditStore, SyncStore},
};
use grcsync_engine::{ExportFormat, SyncEngine};
use serde::Deserialize;

use crate::error::ApiError;

// ─── Filter ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct FilterParams {
  pub event_type:     Option<String>,
  pub entity_type:    Option<String>,
  pub entity_id:      Option<String>,
  pub actor:          Option<String>,
  pub status:         Option<String>,
  pub created_after:  Option<DateTime<Utc>>,
  pub created_before: Option<DateTime<Utc>>,
  /// Substring match over entity id, actor and details.
  pub q:              Option<String>,
}

fn parse_list<T>(param: &str, raw: Option<String>) -> Result<Vec<T>, ApiError>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  let Some(raw) = raw else { return Ok(Vec::new()) };
  raw
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(|s| {
      s.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid {param} {s:?}: {e}")))
    })
    .collect()
}

impl FilterParams {
  pub fn into_filter(self) -> Result<AuditFilter, ApiError> {
    if let (Some(after), Some(before)) = (self.created_after, self.created_before)
      && after > before
    {
      return Err(ApiError::BadRequest("created_after is later than created_before".into()));
    }
    Ok(AuditFilter {
      event_types:    parse_list("event_type", self.event_type)?,
      entity_types:   parse_list("entity_type", self.entity_type)?,
      entity_id:      self.entity_id,
      actor:          self.actor,
      statuses:       parse_list("status", self.status)?,
      created_after:  self.created_after,
      created_before: self.created_before,
      text:           self.q,
    })
  }
}

// ─── Query ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PageParams {
  pub limit:  Option<usize>,
  #[serde(default)]
  pub offset: usize,
}

/// `GET /audit`
pub async fn query<S, R>(
  State(engine): State<SyncEngine<S, R>>,
  Query(filter): Query<FilterParams>,
  Query(page): Query<PageParams>,
) -> Result<Json<AuditPage>, ApiError>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  let filter = filter.into_filter()?;
  Ok(Json(engine.audit().query(&filter, page.limit, page.offset).await?))
}

// ─── Export ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ExportParams {
  #[serde(default)]
  pub format: ExportFormat,
}

/// `GET /audit/export`
pub async fn export<S, R>(
  State(engine): State<SyncEngine<S, R>>,
  Query(filter): Query<FilterParams>,
  Query(params): Query<ExportParams>,
) -> Result<impl IntoResponse, ApiError>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  let filter = filter.into_filter()?;
  let body = engine.audit().export(&filter, params.format).await?;
  let filename = format!(
    "audit-{}.{}",
    Utc::now().format("%Y%m%dT%H%M%SZ"),
    params.format.file_extension()
  );
  Ok((
    [
      (header::CONTENT_TYPE, params.format.content_type().to_owned()),
      (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
    ],
    body,
  ))
}
