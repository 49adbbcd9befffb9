//! Read access to the local copies, plus the local-edit endpoint.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/systems` | Every pulled system |
//! | `GET`  | `/systems/{id}/controls` | Controls of one system |
//! | `GET`  | `/controls/{id}/statements` | Optional `status` (`synced`/`modified`/`conflict`) |
//! | `GET`  | `/statements` | Optional `status`; every statement |
//! | `GET`  | `/statements/{id}` | Single statement |
//! | `PUT`  | `/statements/{id}/local` | Body: `{"content":"..."}`; records a local edit |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use grcsync_core::{
  entity::{Control, Statement, SyncStatus, System},
  remote::GrcSource,
  store::{AuditStore, SyncStore},
};
use grcsync_engine::SyncEngine;
use serde::Deserialize;
use uuid::Uuid;

use crate::{context::Caller, error::ApiError};

// ─── Systems & controls ───────────────────────────────────────────────────────

/// `GET /systems`
pub async fn list_systems<S, R>(
  State(engine): State<SyncEngine<S, R>>,
) -> Result<Json<Vec<System>>, ApiError>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  let systems = engine.store().list_systems().await.map_err(ApiError::internal)?;
  Ok(Json(systems))
}

/// `GET /systems/{id}/controls`
pub async fn list_controls<S, R>(
  State(engine): State<SyncEngine<S, R>>,
  Path(system_id): Path<Uuid>,
) -> Result<Json<Vec<Control>>, ApiError>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  let store = engine.store();
  store
    .get_system(system_id)
    .await
    .map_err(ApiError::internal)?
    .ok_or_else(|| ApiError::NotFound(format!("system {system_id} not found")))?;
  let controls = store.list_controls(system_id).await.map_err(ApiError::internal)?;
  Ok(Json(controls))
}

// ─── Statements ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StatusParams {
  pub status: Option<SyncStatus>,
}

/// `GET /controls/{id}/statements[?status=...]`
pub async fn list_control_statements<S, R>(
  State(engine): State<SyncEngine<S, R>>,
  Path(control_id): Path<Uuid>,
  Query(params): Query<StatusParams>,
) -> Result<Json<Vec<Statement>>, ApiError>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  let store = engine.store();
  store
    .get_control(control_id)
    .await
    .map_err(ApiError::internal)?
    .ok_or_else(|| ApiError::NotFound(format!("control {control_id} not found")))?;
  let statements = store
    .list_statements(Some(control_id), params.status)
    .await
    .map_err(ApiError::internal)?;
  Ok(Json(statements))
}

/// `GET /statements[?status=...]`
pub async fn list_statements<S, R>(
  State(engine): State<SyncEngine<S, R>>,
  Query(params): Query<StatusParams>,
) -> Result<Json<Vec<Statement>>, ApiError>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  let statements = engine
    .store()
    .list_statements(None, params.status)
    .await
    .map_err(ApiError::internal)?;
  Ok(Json(statements))
}

/// `GET /statements/{id}`
pub async fn get_statement<S, R>(
  State(engine): State<SyncEngine<S, R>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Statement>, ApiError>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  let statement = engine
    .store()
    .get_statement(id)
    .await
    .map_err(ApiError::internal)?
    .ok_or_else(|| ApiError::NotFound(format!("statement {id} not found")))?;
  Ok(Json(statement))
}

#[derive(Debug, Deserialize)]
pub struct LocalEditBody {
  pub content: String,
}

/// `PUT /statements/{id}/local`
pub async fn set_local<S, R>(
  State(engine): State<SyncEngine<S, R>>,
  Path(id): Path<Uuid>,
  Caller(ctx): Caller,
  Json(body): Json<LocalEditBody>,
) -> Result<Json<Statement>, ApiError>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  Ok(Json(engine.set_local_content(id, body.content, &ctx).await?))
}
