//! The `SyncStore` and `AuditStore` traits.
//!
//! Both are implemented by storage backends (e.g. `grcsync-store-sqlite`).
//! The engine and the HTTP layer depend on these abstractions, not on any
//! concrete backend.
//!
//! Every statement mutation is a single-row compare-and-set on the row
//! `version`, so pulls, pushes and local edits never take a global lock.

use std::future::Future;

use uuid::Uuid;

use crate::{
  audit::{AuditEvent, AuditFilter, AuditPage, NewAuditEvent, Page},
  entity::{Control, Statement, SyncStatus, System},
  job::{Job, JobKind, NewJob},
  remote::{RemoteControl, RemoteSystem},
  sync::StatementState,
};

// ─── Sync store ──────────────────────────────────────────────────────────────

/// Local entity store for systems, controls, statements and job records.
///
/// All methods return `Send` futures so the trait can be used from spawned
/// tokio tasks.
pub trait SyncStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Systems & controls ────────────────────────────────────────────────

  /// Insert or update a system keyed by its remote id.
  fn upsert_system(
    &self,
    remote: RemoteSystem,
  ) -> impl Future<Output = Result<System, Self::Error>> + Send + '_;

  /// Insert or update a control keyed by `(system_id, remote id)`.
  fn upsert_control(
    &self,
    system_id: Uuid,
    remote: RemoteControl,
  ) -> impl Future<Output = Result<Control, Self::Error>> + Send + '_;

  fn get_system(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<System>, Self::Error>> + Send + '_;

  fn list_systems(&self) -> impl Future<Output = Result<Vec<System>, Self::Error>> + Send + '_;

  fn get_control(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Control>, Self::Error>> + Send + '_;

  fn list_controls(
    &self,
    system_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Control>, Self::Error>> + Send + '_;

  // ── Statements ────────────────────────────────────────────────────────

  fn get_statement(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Statement>, Self::Error>> + Send + '_;

  fn get_statement_for_control(
    &self,
    control_id: Uuid,
  ) -> impl Future<Output = Result<Option<Statement>, Self::Error>> + Send + '_;

  /// List statements, optionally restricted to one control and/or status.
  fn list_statements(
    &self,
    control_id: Option<Uuid>,
    status: Option<SyncStatus>,
  ) -> impl Future<Output = Result<Vec<Statement>, Self::Error>> + Send + '_;

  /// Insert the statement for a control. Returns `None` if the control
  /// already has one.
  fn insert_statement(
    &self,
    control_id: Uuid,
    external_id: String,
    state: StatementState,
  ) -> impl Future<Output = Result<Option<Statement>, Self::Error>> + Send + '_;

  /// Replace a statement's sync columns if its row is still at
  /// `expected_version`. Returns `None` when another writer got there first.
  fn update_statement(
    &self,
    id: Uuid,
    expected_version: i64,
    state: StatementState,
  ) -> impl Future<Output = Result<Option<Statement>, Self::Error>> + Send + '_;

  /// [`update_statement`](Self::update_statement) that also points the row
  /// at a different remote record.
  fn relink_statement(
    &self,
    id: Uuid,
    expected_version: i64,
    external_id: String,
    state: StatementState,
  ) -> impl Future<Output = Result<Option<Statement>, Self::Error>> + Send + '_;

  // ── Jobs ──────────────────────────────────────────────────────────────

  /// Persist a new job in `pending` status.
  fn create_job(&self, input: NewJob) -> impl Future<Output = Result<Job, Self::Error>> + Send + '_;

  /// Overwrite the mutable columns (status, progress, results, error,
  /// timestamps) of an existing job.
  fn save_job<'a>(&'a self, job: &'a Job) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn get_job(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Job>, Self::Error>> + Send + '_;

  /// Most recent jobs first.
  fn list_jobs(
    &self,
    kind: Option<JobKind>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Job>, Self::Error>> + Send + '_;

  /// Mark jobs left `pending`/`running` by a previous process as failed.
  /// Returns how many were updated.
  fn abandon_active_jobs<'a>(
    &'a self,
    reason: &'a str,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;
}

// ─── Audit store ─────────────────────────────────────────────────────────────

/// Append-only audit event storage.
///
/// There is no update or delete method.
pub trait AuditStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Persist an event; the store assigns `event_id` and `created_at`.
  fn append_event(
    &self,
    event: NewAuditEvent,
  ) -> impl Future<Output = Result<AuditEvent, Self::Error>> + Send + '_;

  /// Matching events newest first, paginated, with the overall match count.
  fn query_events<'a>(
    &'a self,
    filter: &'a AuditFilter,
    page: Page,
  ) -> impl Future<Output = Result<AuditPage, Self::Error>> + Send + 'a;

  /// Matching events newest first, at most `max_rows` of them.
  fn export_events<'a>(
    &'a self,
    filter: &'a AuditFilter,
    max_rows: usize,
  ) -> impl Future<Output = Result<Vec<AuditEvent>, Self::Error>> + Send + 'a;
}
