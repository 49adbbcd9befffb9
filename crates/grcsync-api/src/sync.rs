//! Handlers that start pulls and pushes or act on conflicts.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/pull` | Body: [`PullBody`]; returns 202 + the queued job |
//! | `POST` | `/push/conflicts` | Body: [`ConflictsBody`]; compares with the remote now |
//! | `POST` | `/push/resolve` | Body: [`ResolveBody`]; applies resolutions without pushing |
//! | `POST` | `/push` | Body: [`PushBody`]; returns 202 + the queued job |

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use grcsync_core::{
  entity::Statement,
  remote::GrcSource,
  store::{AuditStore, SyncStore},
  sync::{ConflictReport, ConflictResolution},
};
use grcsync_engine::SyncEngine;
use serde::Deserialize;
use uuid::Uuid;

use crate::{context::Caller, error::ApiError};

// ─── Pull ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PullBody {
  /// Remote ids of the systems to pull.
  pub system_ids: Vec<String>,
}

/// `POST /pull`
pub async fn start_pull<S, R>(
  State(engine): State<SyncEngine<S, R>>,
  Caller(ctx): Caller,
  Json(body): Json<PullBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  let job = engine.start_pull(body.system_ids, ctx).await?;
  Ok((StatusCode::ACCEPTED, Json(job)))
}

// ─── Conflicts ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ConflictsBody {
  pub statement_ids: Vec<Uuid>,
}

/// `POST /push/conflicts`
pub async fn check_conflicts<S, R>(
  State(engine): State<SyncEngine<S, R>>,
  Caller(ctx): Caller,
  Json(body): Json<ConflictsBody>,
) -> Result<Json<Vec<ConflictReport>>, ApiError>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  Ok(Json(engine.check_conflicts(&body.statement_ids, &ctx).await?))
}

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
  pub resolutions: Vec<ConflictResolution>,
}

/// `POST /push/resolve`: returns the statements as they are afterwards.
pub async fn resolve_conflicts<S, R>(
  State(engine): State<SyncEngine<S, R>>,
  Caller(ctx): Caller,
  Json(body): Json<ResolveBody>,
) -> Result<Json<Vec<Statement>>, ApiError>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  if body.resolutions.is_empty() {
    return Err(ApiError::BadRequest("request names no resolutions".into()));
  }
  Ok(Json(engine.resolve_conflicts(&body.resolutions, &ctx).await?))
}

// ─── Push ─────────────────────────────────────────────────────────────────────

/// JSON body accepted by `POST /push`. Either list may be omitted, not both.
#[derive(Debug, Deserialize)]
pub struct PushBody {
  #[serde(default)]
  pub statement_ids: Vec<Uuid>,
  /// Applied before validation; resolved statements are pushed too unless
  /// resolved with `keep_remote`.
  #[serde(default)]
  pub resolutions:   Vec<ConflictResolution>,
}

/// `POST /push`
pub async fn start_push<S, R>(
  State(engine): State<SyncEngine<S, R>>,
  Caller(ctx): Caller,
  Json(body): Json<PushBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  let job = engine.start_push(body.statement_ids, body.resolutions, ctx).await?;
  Ok((StatusCode::ACCEPTED, Json(job)))
}
