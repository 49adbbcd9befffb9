//! The pull orchestrator.
//!
//! For each requested system: fetch and upsert the system, page through and
//! upsert its controls, then fetch each control's statements with bounded
//! parallelism and merge them with [`grcsync_core::sync::merge_remote`].
//! Item failures are recorded and skipped; only an unreachable remote on the
//! very first call fails the whole job.

use std::{cmp::Reverse, sync::Arc};

use grcsync_core::{
  audit::{AuditEventType, AuditStatus, EntityType, NewAuditEvent, RequestContext},
  entity::{Control, Statement},
  job::{ItemResult, Job, JobKind, JobProgress, JobStatus, NewJob, PullProgress},
  remote::{GrcSource, PageProgress, SourceError},
  store::{AuditStore, SyncStore},
};
use serde_json::json;
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  conflict::conflict_event,
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
  /// Start pulling the given remote systems in the background.
  ///
  /// Fails with [`Error::JobAlreadyRunning`] if any of the systems is
  /// already being pulled.
  pub async fn start_pull(&self, system_ids: Vec<String>, ctx: RequestContext) -> Result<Job> {
    let mut targets: Vec<String> = Vec::with_capacity(system_ids.len());
    for id in system_ids {
      let id = id.trim();
      if !id.is_empty() && !targets.iter().any(|t| t == id) {
        targets.push(id.to_owned());
      }
    }
    if targets.is_empty() {
      return Err(Error::EmptyRequest("systems"));
    }

    let mut claim = self.inner.jobs.claim(JobKind::Pull, &targets)?;
    let job = self
      .inner
      .store
      .create_job(NewJob {
        kind:       JobKind::Pull,
        actor:      ctx.actor.clone(),
        target_ids: targets,
      })
      .await
      .map_err(Error::store)?;
    claim.attach(job.job_id);

    info!(job_id = %job.job_id, systems = job.target_ids.len(), actor = %ctx.actor, "pull queued");

    let run = PullRun {
      inner:       Arc::clone(&self.inner),
      cancel:      claim.token(),
      progress:    PullProgress { systems_total: job.target_ids.len(), ..PullProgress::default() },
      job:         job.clone(),
      ctx,
      saved_items: 0,
      claim:       Some(claim),
    };
    tokio::spawn(run.run());
    Ok(job)
  }
}

// ─── Per-control work ────────────────────────────────────────────────────────

/// What fetching and merging one control's statements produced.
struct ControlPull {
  statements: usize,
  /// Statements this pull turned into conflicts.
  conflicts:  Vec<Statement>,
  failures:   Vec<ItemResult>,
  skipped:    Vec<ItemResult>,
  cancelled:  bool,
}

impl ControlPull {
  fn empty() -> Self {
    Self {
      statements: 0,
      conflicts:  Vec::new(),
      failures:   Vec::new(),
      skipped:    Vec::new(),
      cancelled:  false,
    }
  }

  fn cancelled() -> Self { Self { cancelled: true, ..Self::empty() } }
}

async fn pull_control<S, R>(
  inner: &Inner<S, R>,
  control: &Control,
  cancel: &CancellationToken,
) -> ControlPull
where
  S: SyncStore,
  R: GrcSource,
{
  let mut out = ControlPull::empty();
  let fetched = inner.source.fetch_statements(&control.external_id, cancel).await;

  for reject in &fetched.rejected {
    out.failures.push(ItemResult::failed_with(
      EntityType::Statement,
      reject.record_id.clone().unwrap_or_default(),
      format!("undecodable record: {}", reject.reason),
    ));
  }
  match &fetched.error {
    Some(SourceError::Cancelled) => out.cancelled = true,
    Some(e) => out
      .failures
      .push(ItemResult::failed(EntityType::Control, &control.external_id, e)),
    None => {}
  }

  // A control holds one statement; the newest remote record wins.
  let mut records = fetched.records;
  records.sort_by_key(|s| Reverse(s.updated_at));
  let mut records = records.into_iter();

  if let Some(latest) = records.next() {
    match statements::merge_pulled(&*inner.store, control.control_id, &latest).await {
      Ok(merged) => {
        out.statements += 1;
        if merged.became_conflict {
          out.conflicts.push(merged.statement);
        }
      }
      Err(e) => out.failures.push(ItemResult::failed_with(
        EntityType::Statement,
        &latest.external_id,
        e.to_string(),
      )),
    }
  }
  for extra in records {
    out.skipped.push(ItemResult::skipped(
      EntityType::Statement,
      extra.external_id,
      format!("control {} already has a newer statement", control.external_id),
    ));
  }
  out
}

// ─── Job ─────────────────────────────────────────────────────────────────────

enum SystemOutcome {
  Done,
  Cancelled,
  /// The remote could not be reached at all.
  Unreachable(SourceError),
}

struct PullRun<S, R> {
  inner:       Arc<Inner<S, R>>,
  cancel:      CancellationToken,
  job:         Job,
  progress:    PullProgress,
  ctx:         RequestContext,
  /// `progress.items()` at the last persisted snapshot.
  saved_items: usize,
  /// Released just before the final state is persisted.
  claim:       Option<JobClaim>,
}

impl<S, R> PullRun<S, R>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  async fn run(mut self) {
    self.job.mark_running();
    self.checkpoint(true).await;
    self
      .audit(
        NewAuditEvent::new(
          AuditEventType::Pull,
          EntityType::PullJob,
          self.job.job_id.to_string(),
          AuditStatus::Started,
        )
        .with_details(json!({ "systems": self.job.target_ids })),
      )
      .await;

    let targets = self.job.target_ids.clone();
    let mut status = None;
    for (i, external_id) in targets.iter().enumerate() {
      if self.cancel.is_cancelled() {
        status = Some(JobStatus::Cancelled);
        break;
      }
      match self.pull_system(i == 0, external_id).await {
        SystemOutcome::Done => {}
        SystemOutcome::Cancelled => {
          status = Some(JobStatus::Cancelled);
          break;
        }
        SystemOutcome::Unreachable(e) => {
          self.job.error = Some(format!("remote system unreachable: {e}"));
          self.progress.items_failed += 1;
          self
            .job
            .results
            .push(ItemResult::failed(EntityType::System, external_id, &e));
          status = Some(JobStatus::Failed);
          break;
        }
      }
    }

    let status = status.unwrap_or(if self.cancel.is_cancelled() {
      JobStatus::Cancelled
    } else if self.progress.items_failed > 0 {
      JobStatus::Partial
    } else {
      JobStatus::Completed
    });
    self.finish(status).await;
  }

  async fn pull_system(&mut self, first: bool, external_id: &str) -> SystemOutcome {
    let inner = Arc::clone(&self.inner);

    let remote = match inner.source.fetch_system(external_id, &self.cancel).await {
      Ok(remote) => remote,
      Err(SourceError::Cancelled) => return SystemOutcome::Cancelled,
      Err(e) if first && e.is_connectivity() => return SystemOutcome::Unreachable(e),
      Err(e) => {
        self
          .fail(ItemResult::failed(EntityType::System, external_id, &e))
          .await;
        return SystemOutcome::Done;
      }
    };
    let system = match inner.store.upsert_system(remote).await {
      Ok(system) => system,
      Err(e) => {
        self
          .fail(ItemResult::failed_with(EntityType::System, external_id, e.to_string()))
          .await;
        return SystemOutcome::Done;
      }
    };

    let mut on_page = |p: &PageProgress| {
      debug!(
        system = external_id,
        pages = p.pages_fetched,
        records = p.records_fetched,
        total = ?p.total_count,
        "control page fetched"
      );
      true
    };
    let fetched = inner
      .source
      .fetch_controls(external_id, &self.cancel, &mut on_page)
      .await;

    for reject in &fetched.rejected {
      self
        .fail(ItemResult::failed_with(
          EntityType::Control,
          reject.record_id.clone().unwrap_or_default(),
          format!("undecodable record: {}", reject.reason),
        ))
        .await;
    }

    // Controls from every page that arrived are committed, even when the
    // fetch stopped early.
    let mut controls = Vec::with_capacity(fetched.records.len());
    for remote in fetched.records {
      let control_ext = remote.external_id.clone();
      match inner.store.upsert_control(system.system_id, remote).await {
        Ok(control) => {
          self.progress.controls_processed += 1;
          controls.push(control);
        }
        Err(e) => {
          self
            .fail(ItemResult::failed_with(EntityType::Control, control_ext, e.to_string()))
            .await;
        }
      }
    }
    self.checkpoint(false).await;

    match fetched.error {
      Some(SourceError::Cancelled) => return SystemOutcome::Cancelled,
      Some(e) => {
        self
          .fail(ItemResult::failed(EntityType::System, external_id, &e))
          .await;
      }
      None => {}
    }

    if self.pull_statements(controls).await {
      return SystemOutcome::Cancelled;
    }
    self.progress.systems_processed += 1;
    self.checkpoint(false).await;
    SystemOutcome::Done
  }

  /// Fetch and merge statements for `controls`. Returns `true` if the run
  /// was cancelled meanwhile.
  async fn pull_statements(&mut self, controls: Vec<Control>) -> bool {
    let permits = Arc::new(Semaphore::new(self.inner.config.pull_concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for control in controls {
      let inner = Arc::clone(&self.inner);
      let cancel = self.cancel.clone();
      let permits = Arc::clone(&permits);
      tasks.spawn(async move {
        let Ok(_permit) = permits.acquire_owned().await else {
          return ControlPull::cancelled();
        };
        if cancel.is_cancelled() {
          return ControlPull::cancelled();
        }
        pull_control(&inner, &control, &cancel).await
      });
    }

    let mut cancelled = false;
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok(outcome) => {
          cancelled |= outcome.cancelled;
          self.absorb(outcome).await;
        }
        Err(e) => {
          warn!(job_id = %self.job.job_id, error = %e, "statement task aborted");
          self.progress.items_failed += 1;
        }
      }
    }
    cancelled || self.cancel.is_cancelled()
  }

  async fn absorb(&mut self, outcome: ControlPull) {
    self.progress.statements_processed += outcome.statements;
    self.progress.conflicts_detected += outcome.conflicts.len();

    for statement in &outcome.conflicts {
      self.audit(conflict_event(statement)).await;
    }
    for failure in outcome.failures {
      self.fail(failure).await;
    }
    self.job.results.extend(outcome.skipped);
    self.checkpoint(false).await;
  }

  /// Record a failed item: count it, keep its result, audit it.
  async fn fail(&mut self, result: ItemResult) {
    warn!(
      job_id = %self.job.job_id,
      entity = %result.entity_type,
      id = %result.entity_id,
      message = result.message.as_deref().unwrap_or_default(),
      "pull item failed"
    );
    self.progress.items_failed += 1;
    self
      .audit(
        NewAuditEvent::new(
          AuditEventType::Pull,
          result.entity_type,
          result.entity_id.clone(),
          AuditStatus::Failure,
        )
        .with_details(json!({
          "job_id": self.job.job_id,
          "category": result.category,
          "message": result.message,
        })),
      )
      .await;
    self.job.results.push(result);
  }

  /// Persist progress if enough items passed since the last snapshot.
  async fn checkpoint(&mut self, force: bool) {
    let items = self.progress.items();
    if !force && items < self.saved_items + self.inner.config.progress_every.max(1) {
      return;
    }
    self.job.progress = JobProgress::Pull(self.progress.clone());
    self.inner.persist(&self.job).await;
    self.saved_items = items;
  }

  async fn audit(&self, event: NewAuditEvent) { self.inner.audit.record(&self.ctx, event).await }

  async fn finish(&mut self, status: JobStatus) {
    self.job.progress = JobProgress::Pull(self.progress.clone());
    self.job.finish(status);

    self
      .audit(
        NewAuditEvent::new(
          AuditEventType::Pull,
          EntityType::PullJob,
          self.job.job_id.to_string(),
          job_audit_status(status),
        )
        .with_details(json!({
          "progress": self.progress,
          "error": self.job.error,
        })),
      )
      .await;

    // Once the terminal state is visible the scopes must already be free.
    drop(self.claim.take());
    self.inner.persist(&self.job).await;

    info!(
      job_id = %self.job.job_id,
      %status,
      systems = self.progress.systems_processed,
      controls = self.progress.controls_processed,
      statements = self.progress.statements_processed,
      conflicts = self.progress.conflicts_detected,
      failed = self.progress.items_failed,
      "pull finished"
    );
  }
}
