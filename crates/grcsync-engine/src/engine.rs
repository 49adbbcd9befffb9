//! [`SyncEngine`], the entry point the HTTP layer talks to.

use std::sync::Arc;

use grcsync_core::{
  audit::{AuditEventType, AuditStatus, EntityType, NewAuditEvent, RequestContext},
  entity::Statement,
  job::{Job, JobKind, JobStatus},
  remote::GrcSource,
  store::{AuditStore, SyncStore},
};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
  audit::AuditLog,
  config::{AuditConfig, EngineConfig},
  error::{Error, Result},
  jobs::JobRegistry,
  statements,
};

pub(crate) struct Inner<S, R> {
  pub store:  Arc<S>,
  pub source: R,
  pub audit:  AuditLog<S>,
  pub config: EngineConfig,
  pub jobs:   Arc<JobRegistry>,
}

impl<S: SyncStore, R> Inner<S, R> {
  /// Persist a job snapshot from inside a running job. There is no caller to
  /// hand the error to, so it is logged.
  pub async fn persist(&self, job: &Job) {
    if let Err(e) = self.store.save_job(job).await {
      warn!(job_id = %job.job_id, error = %e, "failed to persist job state");
    }
  }
}

/// The synchronisation engine. Cheap to clone.
pub struct SyncEngine<S, R> {
  pub(crate) inner: Arc<Inner<S, R>>,
}

impl<S, R> Clone for SyncEngine<S, R> {
  fn clone(&self) -> Self { Self { inner: Arc::clone(&self.inner) } }
}

pub(crate) fn job_entity(kind: JobKind) -> EntityType {
  match kind {
    JobKind::Pull => EntityType::PullJob,
    JobKind::Push => EntityType::PushJob,
  }
}

pub(crate) fn job_audit_status(status: JobStatus) -> AuditStatus {
  match status {
    JobStatus::Pending | JobStatus::Running => AuditStatus::Started,
    JobStatus::Completed => AuditStatus::Success,
    JobStatus::Partial => AuditStatus::Partial,
    JobStatus::Failed => AuditStatus::Failure,
    JobStatus::Cancelled => AuditStatus::Cancelled,
  }
}

impl<S, R> SyncEngine<S, R>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  pub fn new(store: Arc<S>, source: R, config: EngineConfig, audit: AuditConfig) -> Self {
    let audit = AuditLog::new(Arc::clone(&store), audit);
    Self {
      inner: Arc::new(Inner {
        store,
        source,
        audit,
        config,
        jobs: Arc::new(JobRegistry::default()),
      }),
    }
  }

  pub fn store(&self) -> &S { &self.inner.store }

  pub fn audit(&self) -> &AuditLog<S> { &self.inner.audit }

  pub fn config(&self) -> &EngineConfig { &self.inner.config }

  // ── Local edits ───────────────────────────────────────────────────────────

  /// Record a local edit to a statement's text.
  pub async fn set_local_content(
    &self,
    statement_id: Uuid,
    content: String,
    ctx: &RequestContext,
  ) -> Result<Statement> {
    let (before, after) = statements::apply(&*self.inner.store, statement_id, |s| {
      Ok(s.state().with_local_edit(content.clone()))
    })
    .await?;

    self
      .inner
      .audit
      .record(
        ctx,
        NewAuditEvent::new(
          AuditEventType::StatementEdited,
          EntityType::Statement,
          statement_id.to_string(),
          AuditStatus::Success,
        )
        .with_details(json!({
          "previous_status": before.sync_status,
          "sync_status": after.sync_status,
          "length": content.chars().count(),
        })),
      )
      .await;
    Ok(after)
  }

  // ── Jobs ──────────────────────────────────────────────────────────────────

  pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
    self
      .inner
      .store
      .get_job(job_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::JobNotFound(job_id))
  }

  pub async fn list_jobs(&self, kind: Option<JobKind>, limit: usize) -> Result<Vec<Job>> {
    self.inner.store.list_jobs(kind, limit).await.map_err(Error::store)
  }

  /// Ask a running job to stop. The job itself records the final
  /// `cancelled` status once it has wound down.
  pub async fn cancel_job(&self, job_id: Uuid, ctx: &RequestContext) -> Result<Job> {
    let job = self.get_job(job_id).await?;
    if !job.is_active() {
      return Err(Error::JobFinished(job_id));
    }

    if self.inner.jobs.cancel(job_id) {
      info!(%job_id, actor = %ctx.actor, "cancellation requested");
    } else {
      warn!(%job_id, "job is active in the store but not running in this process");
    }

    self
      .inner
      .audit
      .record(
        ctx,
        NewAuditEvent::new(
          AuditEventType::JobCancelled,
          job_entity(job.kind),
          job_id.to_string(),
          AuditStatus::Cancelled,
        ),
      )
      .await;
    Ok(job)
  }

  /// Mark jobs a previous process left active as failed. Run once at start.
  pub async fn recover_abandoned_jobs(&self) -> Result<u64> {
    let n = self
      .inner
      .store
      .abandon_active_jobs("interrupted by a server restart")
      .await
      .map_err(Error::store)?;
    if n > 0 {
      warn!(jobs = n, "marked abandoned jobs as failed");
    }
    Ok(n)
  }
}
