//! JSON REST API for grcsync.
//!
//! Exposes an axum [`Router`] over a [`SyncEngine`]. Authentication and TLS
//! are the deployment's responsibility; the caller identity arrives in the
//! `X-Actor` header (see [`context::Caller`]).
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", grcsync_api::api_router(engine.clone()))
//! ```

pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod jobs;
pub mod records;
pub mod sync;

use axum::{
  Router,
  routing::{get, post, put},
};
use grcsync_core::{
  remote::GrcSource,
  store::{AuditStore, SyncStore},
};
use grcsync_engine::SyncEngine;

pub use config::ServerConfig;
pub use error::ApiError;

/// Build a fully-materialised API router for `engine`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, R>(engine: SyncEngine<S, R>) -> Router<()>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  Router::new()
    // Sync
    .route("/pull", post(sync::start_pull::<S, R>))
    .route("/push", post(sync::start_push::<S, R>))
    .route("/push/conflicts", post(sync::check_conflicts::<S, R>))
    .route("/push/resolve", post(sync::resolve_conflicts::<S, R>))
    // Jobs
    .route("/jobs", get(jobs::list::<S, R>))
    .route("/jobs/{id}", get(jobs::get_one::<S, R>))
    .route("/jobs/{id}/cancel", post(jobs::cancel::<S, R>))
    // Audit
    .route("/audit", get(audit::query::<S, R>))
    .route("/audit/export", get(audit::export::<S, R>))
    // Local copies
    .route("/systems", get(records::list_systems::<S, R>))
    .route("/systems/{id}/controls", get(records::list_controls::<S, R>))
    .route("/controls/{id}/statements", get(records::list_control_statements::<S, R>))
    .route("/statements", get(records::list_statements::<S, R>))
    .route("/statements/{id}", get(records::get_statement::<S, R>))
    .route("/statements/{id}/local", put(records::set_local::<S, R>))
    .with_state(engine)
}
