//! Handlers for `/jobs` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/jobs` | Optional `kind` (`pull`/`push`) and `limit`; newest first |
//! | `GET`  | `/jobs/{id}` | Poll one job |
//! | `POST` | `/jobs/{id}/cancel` | 202; the job ends `cancelled` once it winds down |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use grcsync_core::{
  job::{Job, JobKind},
  remote::GrcSource,
  store::{AuditStore, SyncStore},
};
use grcsync_engine::SyncEngine;
use serde::Deserialize;
use uuid::Uuid;

use crate::{context::Caller, error::ApiError};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub kind:  Option<JobKind>,
  pub limit: Option<usize>,
}

/// `GET /jobs[?kind=pull|push][&limit=N]`
pub async fn list<S, R>(
  State(engine): State<SyncEngine<S, R>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Job>>, ApiError>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
  Ok(Json(engine.list_jobs(params.kind, limit).await?))
}

/// `GET /jobs/{id}`
pub async fn get_one<S, R>(
  State(engine): State<SyncEngine<S, R>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Job>, ApiError>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  Ok(Json(engine.get_job(id).await?))
}

/// `POST /jobs/{id}/cancel`
pub async fn cancel<S, R>(
  State(engine): State<SyncEngine<S, R>>,
  Path(id): Path<Uuid>,
  Caller(ctx): Caller,
) -> Result<impl IntoResponse, ApiError>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  let job = engine.cancel_job(id, &ctx).await?;
  Ok((StatusCode::ACCEPTED, Json(job)))
}
