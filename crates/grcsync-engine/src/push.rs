//! The push orchestrator.
//!
//! Validation happens up front so a bad request never creates a job. The
//! job then pushes statements through a semaphore-bounded pool; each item
//! re-checks the remote timestamp right before writing and backs off into a
//! conflict instead of overwriting a foreign change.

use std::sync::Arc;

use chrono::Utc;
use grcsync_core::{
  audit::{AuditEventType, AuditStatus, EntityType, NewAuditEvent, RequestContext},
  entity::SyncStatus,
  job::{ErrorCategory, ItemOutcome, ItemResult, Job, JobKind, JobProgress, JobStatus, NewJob, PushProgress},
  remote::{GrcSource, RemoteStatement, SourceError},
  store::{AuditStore, SyncStore},
  sync::ConflictResolution,
};
use serde_json::json;
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
  engine::{Inner, SyncEngine, job_audit_status},
  error::{Error, Result},
  jobs::JobClaim,
  statements,
};

impl<S, R> SyncEngine<S, R>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  /// Apply `resolutions`, validate, then push the statements in the
  /// background.
  ///
  /// Statements resolved with `keep_remote` are counted as skipped. Any
  /// other target must be modified and free of conflicts, otherwise the
  /// request fails and no job is created.
  pub async fn start_push(
    &self,
    statement_ids: Vec<Uuid>,
    resolutions: Vec<ConflictResolution>,
    ctx: RequestContext,
  ) -> Result<Job> {
    if statement_ids.is_empty() && resolutions.is_empty() {
      return Err(Error::EmptyRequest("statements"));
    }
    let mut claim = self
      .inner
      .jobs
      .claim(JobKind::Push, std::slice::from_ref(&ctx.actor))?;

    self.resolve_conflicts(&resolutions, &ctx).await?;

    let mut targets: Vec<Uuid> = Vec::new();
    for id in statement_ids.iter().chain(resolutions.iter().map(|r| &r.statement_id)) {
      if !targets.contains(id) {
        targets.push(*id);
      }
    }
    let kept_remote: Vec<Uuid> = resolutions
      .iter()
      .filter(|r| !r.resolution.proceeds_to_push())
      .map(|r| r.statement_id)
      .collect();

    let mut to_push = Vec::with_capacity(targets.len());
    for &id in &targets {
      if kept_remote.contains(&id) {
        continue;
      }
      let statement = self
        .inner
        .store
        .get_statement(id)
        .await
        .map_err(Error::store)?
        .ok_or(Error::StatementNotFound(id))?;
      if statement.sync_status == SyncStatus::Conflict {
        return Err(Error::StatementHasConflict(id));
      }
      if !statement.is_modified {
        return Err(Error::StatementNotModified(id));
      }
      to_push.push(id);
    }

    let mut job = self
      .inner
      .store
      .create_job(NewJob {
        kind:       JobKind::Push,
        actor:      ctx.actor.clone(),
        target_ids: targets.iter().map(Uuid::to_string).collect(),
      })
      .await
      .map_err(Error::store)?;
    claim.attach(job.job_id);

    let progress = PushProgress {
      total:   targets.len(),
      skipped: kept_remote.len(),
      ..PushProgress::default()
    };
    job.results = kept_remote
      .iter()
      .map(|id| {
        ItemResult::skipped(EntityType::Statement, id.to_string(), "resolved by keeping the remote copy")
      })
      .collect();
    job.progress = JobProgress::Push(progress.clone());
    self.inner.store.save_job(&job).await.map_err(Error::store)?;

    info!(job_id = %job.job_id, statements = to_push.len(), actor = %ctx.actor, "push queued");

    let run = PushRun {
      inner:  Arc::clone(&self.inner),
      cancel: claim.token(),
      job:    job.clone(),
      progress,
      ctx,
      claim:  Some(claim),
    };
    tokio::spawn(run.run(to_push));
    Ok(job)
  }
}

// ─── Per-statement work ──────────────────────────────────────────────────────

/// Store the remote copy through the merge rule; a newer remote leaves the
/// statement in conflict.
async fn record_remote<S: SyncStore, R>(inner: &Inner<S, R>, id: Uuid, remote: &RemoteStatement) {
  if let Err(e) = statements::apply(&*inner.store, id, |s| {
    Ok(s.state().with_remote(remote.content.clone(), remote.updated_at))
  })
  .await
  {
    warn!(statement_id = %id, error = %e, "failed to record remote change");
  }
}

async fn push_one<S, R>(inner: &Inner<S, R>, id: Uuid, cancel: &CancellationToken) -> ItemResult
where
  S: SyncStore,
  R: GrcSource,
{
  let statement = match inner.store.get_statement(id).await {
    Ok(Some(statement)) => statement,
    Ok(None) => {
      return ItemResult::failed_with(EntityType::Statement, id.to_string(), "statement no longer exists");
    }
    Err(e) => return ItemResult::failed_with(EntityType::Statement, id.to_string(), e.to_string()),
  };
  if statement.sync_status == SyncStatus::Conflict {
    return ItemResult::conflict(EntityType::Statement, id.to_string());
  }
  if !statement.is_modified {
    return ItemResult::skipped(EntityType::Statement, id.to_string(), "no local changes");
  }
  let content = statement.effective_content().to_owned();
  let external_id = statement.external_id.as_str();

  let remote = match inner.source.fetch_statement(external_id, cancel).await {
    Ok(remote) => remote,
    Err(e) => return ItemResult::failed(EntityType::Statement, id.to_string(), &e),
  };
  if remote.updated_at > statement.local_baseline_at {
    record_remote(inner, id, &remote).await;
    return ItemResult::conflict(EntityType::Statement, id.to_string());
  }

  let receipt = match inner.source.update_statement(external_id, &content, cancel).await {
    Ok(receipt) => receipt,
    // The remote changed between our check and the write.
    Err(err @ SourceError::Conflict { .. }) => {
      match inner.source.fetch_statement(external_id, cancel).await {
        Ok(remote) => record_remote(inner, id, &remote).await,
        Err(e) => warn!(statement_id = %id, error = %e, "could not re-read the remote after a conflict"),
      }
      return ItemResult {
        message: Some(format!("{} ({err})", ErrorCategory::Conflict.user_message())),
        ..ItemResult::conflict(EntityType::Statement, id.to_string())
      };
    }
    Err(e) => return ItemResult::failed(EntityType::Statement, id.to_string(), &e),
  };

  let updated_at = match receipt.updated_at {
    Some(at) => at,
    None => match inner.source.fetch_statement(external_id, cancel).await {
      Ok(fresh) => fresh.updated_at,
      Err(e) => {
        warn!(statement_id = %id, error = %e, "pushed, but could not read back the remote timestamp");
        Utc::now()
      }
    },
  };

  match statements::apply(&*inner.store, id, |s| Ok(s.state().after_push(&content, updated_at))).await {
    Ok(_) => ItemResult::succeeded(EntityType::Statement, id.to_string()),
    Err(e) => ItemResult::failed_with(
      EntityType::Statement,
      id.to_string(),
      format!("pushed, but recording the push locally failed: {e}"),
    ),
  }
}

// ─── Job ─────────────────────────────────────────────────────────────────────

struct PushRun<S, R> {
  inner:    Arc<Inner<S, R>>,
  cancel:   CancellationToken,
  job:      Job,
  progress: PushProgress,
  ctx:      RequestContext,
  claim:    Option<JobClaim>,
}

impl<S, R> PushRun<S, R>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  async fn run(mut self, to_push: Vec<Uuid>) {
    self.job.mark_running();
    self.inner.persist(&self.job).await;
    self
      .inner
      .audit
      .record(
        &self.ctx,
        NewAuditEvent::new(
          AuditEventType::Push,
          EntityType::PushJob,
          self.job.job_id.to_string(),
          AuditStatus::Started,
        )
        .with_details(json!({ "statements": to_push.len() })),
      )
      .await;

    let permits = Arc::new(Semaphore::new(self.inner.config.push_concurrency.max(1)));
    let item_timeout = self.inner.config.push_item_timeout();
    let mut tasks = JoinSet::new();

    for id in to_push {
      let inner = Arc::clone(&self.inner);
      let cancel = self.cancel.clone();
      let permits = Arc::clone(&permits);
      tasks.spawn(async move {
        let Ok(_permit) = permits.acquire_owned().await else {
          return ItemResult::failed(EntityType::Statement, id.to_string(), &SourceError::Cancelled);
        };
        if cancel.is_cancelled() {
          return ItemResult::failed(EntityType::Statement, id.to_string(), &SourceError::Cancelled);
        }
        match tokio::time::timeout(item_timeout, push_one(&inner, id, &cancel)).await {
          Ok(result) => result,
          Err(_) => ItemResult::failed(EntityType::Statement, id.to_string(), &SourceError::Timeout),
        }
      });
    }

    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok(result) => self.absorb(result).await,
        Err(e) => {
          warn!(job_id = %self.job.job_id, error = %e, "push task aborted");
          self.progress.failed += 1;
        }
      }
    }

    let status = if self.cancel.is_cancelled() {
      JobStatus::Cancelled
    } else if self.progress.failed == 0 && self.progress.conflicts == 0 {
      JobStatus::Completed
    } else {
      JobStatus::Partial
    };
    self.finish(status).await;
  }

  /// Count one finished item, audit it and persist progress.
  async fn absorb(&mut self, result: ItemResult) {
    match result.outcome {
      ItemOutcome::Succeeded => {
        self.progress.succeeded += 1;
        self.audit_item(AuditEventType::Push, AuditStatus::Success, &result).await;
      }
      ItemOutcome::Failed => {
        self.progress.failed += 1;
        warn!(
          job_id = %self.job.job_id,
          statement_id = %result.entity_id,
          message = result.message.as_deref().unwrap_or_default(),
          "push item failed"
        );
        self.audit_item(AuditEventType::Push, AuditStatus::Failure, &result).await;
      }
      ItemOutcome::Skipped => self.progress.skipped += 1,
      ItemOutcome::Conflict => {
        self.progress.conflicts += 1;
        self
          .audit_item(AuditEventType::ConflictDetected, AuditStatus::Conflict, &result)
          .await;
      }
    }

    self.job.results.push(result);
    self.job.progress = JobProgress::Push(self.progress.clone());
    self.inner.persist(&self.job).await;
  }

  async fn audit_item(&self, event_type: AuditEventType, status: AuditStatus, result: &ItemResult) {
    let event = NewAuditEvent::new(event_type, EntityType::Statement, result.entity_id.clone(), status)
      .with_details(json!({
        "job_id": self.job.job_id,
        "category": result.category,
        "message": result.message,
      }));
    self.inner.audit.record(&self.ctx, event).await;
  }

  async fn finish(&mut self, status: JobStatus) {
    self.job.progress = JobProgress::Push(self.progress.clone());
    self.job.finish(status);

    self
      .inner
      .audit
      .record(
        &self.ctx,
        NewAuditEvent::new(
          AuditEventType::Push,
          EntityType::PushJob,
          self.job.job_id.to_string(),
          job_audit_status(status),
        )
        .with_details(json!({ "progress": self.progress })),
      )
      .await;

    // Once the terminal state is visible the actor must be free to push again.
    drop(self.claim.take());
    self.inner.persist(&self.job).await;

    info!(
      job_id = %self.job.job_id,
      %status,
      succeeded = self.progress.succeeded,
      failed = self.progress.failed,
      skipped = self.progress.skipped,
      conflicts = self.progress.conflicts,
      "push finished"
    );
  }
}
