//! Orchestrator tests against an in-memory remote and an in-memory SQLite
//! store.

use std::{
  collections::HashMap,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};
use grcsync_core::{
  audit::{AuditEventType, AuditFilter, AuditStatus, EntityType, Page, RequestContext},
  entity::{Statement, SyncStatus},
  job::{ErrorCategory, ItemOutcome, Job, JobKind, JobProgress, JobStatus, PullProgress, PushProgress},
  remote::{
    FetchResult, GrcSource, OnPage, PageProgress, RemoteControl, RemoteStatement, RemoteSystem,
    SourceError, UpdateReceipt,
  },
  store::{AuditStore, SyncStore},
  sync::{ConflictResolution, Resolution},
};
use grcsync_store_sqlite::SqliteStore;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
  AuditConfig, EngineConfig, Error, ExportFormat, SyncEngine,
  export::render_csv,
  jobs::JobRegistry,
};

// ─── Fake remote ─────────────────────────────────────────────────────────────

fn t(hours: i64) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::hours(hours)
}

#[derive(Default)]
struct Remote {
  systems:         HashMap<String, RemoteSystem>,
  controls:        Vec<RemoteControl>,
  statements:      HashMap<String, RemoteStatement>,
  update_failures: HashMap<String, SourceError>,
  /// Per-record latency of writes; 25ms when absent.
  update_delays:   HashMap<String, Duration>,
  /// Another editor saves this content just before our write lands, so the
  /// write is refused with a conflict.
  races:           HashMap<String, (String, DateTime<Utc>)>,
  unreachable:     bool,
  omit_timestamp:  bool,
  /// Hours past `t(0)` stamped on the next accepted write.
  clock:           i64,
  updates:         usize,
}

struct Pause {
  after_pages: u32,
  reached:     Arc<Notify>,
}

#[derive(Clone)]
struct FakeSource {
  remote:        Arc<Mutex<Remote>>,
  page_size:     usize,
  pause:         Option<Arc<Pause>>,
  in_flight:     Arc<AtomicUsize>,
  max_in_flight: Arc<AtomicUsize>,
}

impl FakeSource {
  /// `controls` controls under `sys-1`, each with one statement at `t(0)`.
  fn seeded(controls: usize) -> Self {
    let mut remote = Remote { clock: 10, ..Remote::default() };
    remote.systems.insert("sys-1".into(), RemoteSystem {
      external_id: "sys-1".into(),
      name:        "Payroll".into(),
      description: Some("HR payroll platform".into()),
      updated_at:  Some(t(0)),
    });
    for n in 0..controls {
      remote.controls.push(RemoteControl {
        external_id:        format!("ctl-{n}"),
        system_external_id: "sys-1".into(),
        control_number:     format!("AC-{n}"),
        title:              format!("Control {n}"),
        family:             Some("Access Control".into()),
        baseline:           Some("moderate".into()),
        updated_at:         Some(t(0)),
      });
      remote.statements.insert(format!("st-{n}"), RemoteStatement {
        external_id:         format!("st-{n}"),
        control_external_id: format!("ctl-{n}"),
        content:             format!("remote {n}"),
        updated_at:          t(0),
      });
    }
    Self {
      remote:        Arc::new(Mutex::new(remote)),
      page_size:     100,
      pause:         None,
      in_flight:     Arc::default(),
      max_in_flight: Arc::default(),
    }
  }

  fn paused(mut self, page_size: usize, after_pages: u32) -> (Self, Arc<Notify>) {
    let reached = Arc::new(Notify::new());
    self.page_size = page_size;
    self.pause = Some(Arc::new(Pause { after_pages, reached: Arc::clone(&reached) }));
    (self, reached)
  }

  fn with<T>(&self, f: impl FnOnce(&mut Remote) -> T) -> T { f(&mut *self.remote.lock().unwrap()) }

  /// Simulate someone editing the statement directly in the GRC system.
  fn edit_remotely(&self, external_id: &str, content: &str, at: DateTime<Utc>) {
    self.with(|r| {
      let st = r.statements.get_mut(external_id).unwrap();
      st.content = content.into();
      st.updated_at = at;
    });
  }

  fn remote_content(&self, external_id: &str) -> String {
    self.with(|r| r.statements[external_id].content.clone())
  }
}

impl GrcSource for FakeSource {
  async fn fetch_system<'a>(
    &'a self,
    external_id: &'a str,
    _cancel: &'a CancellationToken,
  ) -> Result<RemoteSystem, SourceError> {
    self.with(|r| {
      if r.unreachable {
        return Err(SourceError::ConnectionFailed { message: "connection refused".into() });
      }
      r.systems
        .get(external_id)
        .cloned()
        .ok_or_else(|| SourceError::NotFound { resource: external_id.into() })
    })
  }

  async fn fetch_controls<'a>(
    &'a self,
    system_external_id: &'a str,
    cancel: &'a CancellationToken,
    on_page: OnPage<'a>,
  ) -> FetchResult<RemoteControl> {
    let all: Vec<RemoteControl> = self.with(|r| {
      r.controls
        .iter()
        .filter(|c| c.system_external_id == system_external_id)
        .cloned()
        .collect()
    });

    let mut out = FetchResult { total_count: Some(all.len() as u64), ..FetchResult::default() };
    for chunk in all.chunks(self.page_size) {
      if cancel.is_cancelled() {
        out.error = Some(SourceError::Cancelled);
        break;
      }
      out.records.extend(chunk.iter().cloned());
      out.pages_fetched += 1;
      let progress = PageProgress {
        pages_fetched:   out.pages_fetched,
        records_fetched: out.records.len(),
        total_count:     out.total_count,
      };
      if !on_page(&progress) {
        break;
      }
      if let Some(pause) = &self.pause {
        if out.pages_fetched == pause.after_pages {
          pause.reached.notify_one();
          cancel.cancelled().await;
        }
      }
    }
    out
  }

  async fn fetch_statements<'a>(
    &'a self,
    control_external_id: &'a str,
    _cancel: &'a CancellationToken,
  ) -> FetchResult<RemoteStatement> {
    self.with(|r| {
      if r.unreachable {
        return FetchResult::failed(SourceError::Timeout);
      }
      let records: Vec<RemoteStatement> = r
        .statements
        .values()
        .filter(|s| s.control_external_id == control_external_id)
        .cloned()
        .collect();
      FetchResult {
        total_count: Some(records.len() as u64),
        pages_fetched: 1,
        records,
        ..FetchResult::default()
      }
    })
  }

  async fn fetch_statement<'a>(
    &'a self,
    external_id: &'a str,
    _cancel: &'a CancellationToken,
  ) -> Result<RemoteStatement, SourceError> {
    self.with(|r| {
      r.statements
        .get(external_id)
        .cloned()
        .ok_or_else(|| SourceError::NotFound { resource: external_id.into() })
    })
  }

  async fn update_statement<'a>(
    &'a self,
    external_id: &'a str,
    content: &'a str,
    _cancel: &'a CancellationToken,
  ) -> Result<UpdateReceipt, SourceError> {
    let delay = self
      .with(|r| r.update_delays.get(external_id).copied())
      .unwrap_or(Duration::from_millis(25));
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    tokio::time::sleep(delay).await;
    self.in_flight.fetch_sub(1, Ordering::SeqCst);

    self.with(|r| {
      if let Some(err) = r.update_failures.get(external_id) {
        return Err(err.clone());
      }
      if let Some((content, at)) = r.races.remove(external_id) {
        if let Some(st) = r.statements.get_mut(external_id) {
          st.content = content;
          st.updated_at = at;
        }
        return Err(SourceError::Conflict { message: "record was modified by another user".into() });
      }
      r.clock += 1;
      let at = t(r.clock);
      let omit = r.omit_timestamp;
      let st = r
        .statements
        .get_mut(external_id)
        .ok_or_else(|| SourceError::NotFound { resource: external_id.into() })?;
      st.content = content.into();
      st.updated_at = at;
      r.updates += 1;
      Ok(UpdateReceipt {
        external_id: external_id.into(),
        updated_at:  if omit { None } else { Some(at) },
      })
    })
  }
}

// ─── Harness ─────────────────────────────────────────────────────────────────

type Engine = SyncEngine<SqliteStore, FakeSource>;

fn test_config() -> EngineConfig {
  EngineConfig {
    push_concurrency:       3,
    push_item_timeout_secs: 5,
    pull_concurrency:       2,
    progress_every:         1,
  }
}

async fn engine_with(source: FakeSource, config: EngineConfig) -> Engine {
  let store = Arc::new(SqliteStore::open_in_memory().await.expect("in-memory store"));
  SyncEngine::new(store, source, config, AuditConfig::default())
}

async fn engine(source: FakeSource) -> Engine { engine_with(source, test_config()).await }

fn alice() -> RequestContext { RequestContext::new("alice").with_request_id("req-1") }

async fn wait_for(engine: &Engine, job_id: Uuid) -> Job {
  tokio::time::timeout(Duration::from_secs(10), async {
    loop {
      let job = engine.get_job(job_id).await.unwrap();
      if !job.is_active() {
        return job;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .expect("job did not finish in time")
}

async fn pull_all(engine: &Engine) -> Job {
  let job = engine.start_pull(vec!["sys-1".into()], alice()).await.unwrap();
  wait_for(engine, job.job_id).await
}

async fn statement(engine: &Engine, external_id: &str) -> Statement {
  engine
    .store()
    .list_statements(None, None)
    .await
    .unwrap()
    .into_iter()
    .find(|s| s.external_id == external_id)
    .unwrap_or_else(|| panic!("statement {external_id} not imported"))
}

async fn edit(engine: &Engine, external_id: &str, content: &str) -> Statement {
  let id = statement(engine, external_id).await.statement_id;
  engine.set_local_content(id, content.into(), &alice()).await.unwrap()
}

async fn events(engine: &Engine, event_type: AuditEventType) -> Vec<grcsync_core::audit::AuditEvent> {
  let filter = AuditFilter { event_types: vec![event_type], ..AuditFilter::default() };
  engine.store().query_events(&filter, Page::new(500, 0)).await.unwrap().events
}

fn pull_progress(job: &Job) -> &PullProgress {
  match &job.progress {
    JobProgress::Pull(p) => p,
    other => panic!("expected pull progress, got {other:?}"),
  }
}

fn push_progress(job: &Job) -> &PushProgress {
  match &job.progress {
    JobProgress::Push(p) => p,
    other => panic!("expected push progress, got {other:?}"),
  }
}

// ─── Pull ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pull_imports_systems_controls_and_statements() {
  let e = engine(FakeSource::seeded(5)).await;

  let job = pull_all(&e).await;

  assert_eq!(job.status, JobStatus::Completed);
  assert_eq!(job.actor, "alice");
  let p = pull_progress(&job);
  assert_eq!(p.systems_processed, 1);
  assert_eq!(p.controls_processed, 5);
  assert_eq!(p.statements_processed, 5);
  assert_eq!(p.items_failed, 0);

  let systems = e.store().list_systems().await.unwrap();
  assert_eq!(systems.len(), 1);
  assert_eq!(e.store().list_controls(systems[0].system_id).await.unwrap().len(), 5);
  let st = statement(&e, "st-3").await;
  assert_eq!(st.remote_content, "remote 3");
  assert_eq!(st.sync_status, SyncStatus::Synced);

  let pulls = events(&e, AuditEventType::Pull).await;
  let statuses: Vec<_> = pulls.iter().map(|ev| ev.status).collect();
  assert_eq!(statuses, vec![AuditStatus::Success, AuditStatus::Started]);
  assert!(pulls.iter().all(|ev| ev.actor == "alice"));
  assert_eq!(pulls[0].details["request_id"], "req-1");
}

#[tokio::test]
async fn repeated_pull_is_idempotent() {
  let e = engine(FakeSource::seeded(3)).await;

  pull_all(&e).await;
  let before = statement(&e, "st-0").await;
  let job = pull_all(&e).await;
  let after = statement(&e, "st-0").await;

  assert_eq!(job.status, JobStatus::Completed);
  assert_eq!(e.store().list_statements(None, None).await.unwrap().len(), 3);
  assert_eq!(before.statement_id, after.statement_id);
  assert_eq!(before.version, after.version);
}

#[tokio::test]
async fn pull_keeps_local_edit_and_flags_newer_remote_as_conflict() {
  let source = FakeSource::seeded(2);
  let e = engine(source.clone()).await;
  pull_all(&e).await;
  edit(&e, "st-0", "local rewrite").await;
  edit(&e, "st-1", "another local rewrite").await;
  source.edit_remotely("st-0", "remote rewrite", t(1));

  let job = pull_all(&e).await;

  assert_eq!(pull_progress(&job).conflicts_detected, 1);
  let conflicted = statement(&e, "st-0").await;
  assert_eq!(conflicted.sync_status, SyncStatus::Conflict);
  assert_eq!(conflicted.local_content.as_deref(), Some("local rewrite"));
  assert_eq!(conflicted.remote_content, "remote rewrite");
  assert_eq!(conflicted.local_baseline_at, t(0));
  assert_eq!(conflicted.remote_updated_at, t(1));

  let untouched = statement(&e, "st-1").await;
  assert_eq!(untouched.sync_status, SyncStatus::Modified);
  assert_eq!(untouched.local_content.as_deref(), Some("another local rewrite"));

  let detected = events(&e, AuditEventType::ConflictDetected).await;
  assert_eq!(detected.len(), 1);
  assert_eq!(detected[0].entity_id, conflicted.statement_id.to_string());
}

#[tokio::test]
async fn pull_follows_a_replaced_remote_statement_record() {
  let source = FakeSource::seeded(1);
  let e = engine(source.clone()).await;
  pull_all(&e).await;
  let before = statement(&e, "st-0").await;
  source.with(|r| {
    r.statements.remove("st-0");
    r.statements.insert("st-0b".into(), RemoteStatement {
      external_id:         "st-0b".into(),
      control_external_id: "ctl-0".into(),
      content:             "rewritten".into(),
      updated_at:          t(1),
    });
  });

  let job = pull_all(&e).await;

  assert_eq!(job.status, JobStatus::Completed);
  let after = statement(&e, "st-0b").await;
  assert_eq!(after.statement_id, before.statement_id);
  assert_eq!(after.remote_content, "rewritten");
  assert_eq!(after.sync_status, SyncStatus::Synced);

  // Pushes now go to the record the remote actually holds.
  let st = edit(&e, "st-0b", "ours").await;
  let job = e.start_push(vec![st.statement_id], Vec::new(), alice()).await.unwrap();
  let job = wait_for(&e, job.job_id).await;
  assert_eq!(job.status, JobStatus::Completed);
  assert_eq!(source.remote_content("st-0b"), "ours");
}

#[tokio::test]
async fn unreachable_remote_fails_the_pull() {
  let source = FakeSource::seeded(2);
  source.with(|r| r.unreachable = true);
  let e = engine(source).await;

  let job = pull_all(&e).await;

  assert_eq!(job.status, JobStatus::Failed);
  assert!(job.error.as_deref().unwrap().contains("connection refused"));
  assert!(e.store().list_systems().await.unwrap().is_empty());
  let pulls = events(&e, AuditEventType::Pull).await;
  assert_eq!(pulls[0].status, AuditStatus::Failure);
}

#[tokio::test]
async fn missing_system_makes_the_pull_partial() {
  let e = engine(FakeSource::seeded(2)).await;

  let job = e
    .start_pull(vec!["sys-1".into(), "sys-gone".into(), "sys-1".into()], alice())
    .await
    .unwrap();
  assert_eq!(job.target_ids, vec!["sys-1", "sys-gone"]);
  let job = wait_for(&e, job.job_id).await;

  assert_eq!(job.status, JobStatus::Partial);
  let p = pull_progress(&job);
  assert_eq!(p.systems_processed, 1);
  assert_eq!(p.items_failed, 1);
  let failure = job
    .results
    .iter()
    .find(|r| r.outcome == ItemOutcome::Failed)
    .unwrap();
  assert_eq!(failure.entity_id, "sys-gone");
  assert_eq!(failure.category, Some(ErrorCategory::NotFound));
  assert_eq!(e.store().list_statements(None, None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn empty_pull_request_is_rejected() {
  let e = engine(FakeSource::seeded(1)).await;
  let err = e.start_pull(vec!["  ".into()], alice()).await.unwrap_err();
  assert!(matches!(err, Error::EmptyRequest(_)));
}

#[tokio::test]
async fn second_pull_of_the_same_system_is_rejected() {
  let (source, reached) = FakeSource::seeded(6).paused(2, 1);
  let e = engine(source).await;

  let first = e.start_pull(vec!["sys-1".into()], alice()).await.unwrap();
  reached.notified().await;

  let err = e.start_pull(vec!["sys-1".into()], alice()).await.unwrap_err();
  assert!(matches!(err, Error::JobAlreadyRunning { kind: JobKind::Pull, .. }));

  e.cancel_job(first.job_id, &alice()).await.unwrap();
  let first = wait_for(&e, first.job_id).await;
  assert_eq!(first.status, JobStatus::Cancelled);

  // The scope is free again once the job is over.
  let again = e.start_pull(vec!["sys-1".into()], alice()).await;
  assert!(again.is_ok());
}

#[tokio::test]
async fn cancelling_a_pull_keeps_the_pages_already_fetched() {
  let (source, reached) = FakeSource::seeded(7).paused(2, 2);
  let e = engine(source).await;

  let job = e.start_pull(vec!["sys-1".into()], alice()).await.unwrap();
  reached.notified().await;
  e.cancel_job(job.job_id, &RequestContext::new("bob")).await.unwrap();
  let job = wait_for(&e, job.job_id).await;

  assert_eq!(job.status, JobStatus::Cancelled);
  let systems = e.store().list_systems().await.unwrap();
  assert_eq!(e.store().list_controls(systems[0].system_id).await.unwrap().len(), 4);
  assert_eq!(pull_progress(&job).controls_processed, 4);

  let cancelled = events(&e, AuditEventType::JobCancelled).await;
  assert_eq!(cancelled.len(), 1);
  assert_eq!(cancelled[0].actor, "bob");
  assert_eq!(cancelled[0].entity_type, EntityType::PullJob);
  let pulls = events(&e, AuditEventType::Pull).await;
  assert_eq!(pulls[0].status, AuditStatus::Cancelled);

  let err = e.cancel_job(job.job_id, &alice()).await.unwrap_err();
  assert!(matches!(err, Error::JobFinished(_)));
}

// ─── Conflicts ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn check_conflicts_reports_both_versions() {
  let source = FakeSource::seeded(1);
  let e = engine(source.clone()).await;
  pull_all(&e).await;
  let edited = edit(&e, "st-0", "local text").await;
  source.edit_remotely("st-0", "remote text", t(1));

  let reports = e.check_conflicts(&[edited.statement_id], &alice()).await.unwrap();

  assert_eq!(reports.len(), 1);
  let report = &reports[0];
  assert!(report.has_conflict);
  assert_eq!(report.local_content.as_deref(), Some("local text"));
  assert_eq!(report.remote_content, "remote text");
  assert_eq!(report.local_baseline, t(0));
  assert_eq!(report.remote_updated_at, t(1));

  // The observation is persisted.
  assert_eq!(statement(&e, "st-0").await.sync_status, SyncStatus::Conflict);
  assert_eq!(events(&e, AuditEventType::ConflictDetected).await.len(), 1);

  // Checking again does not log a second detection.
  e.check_conflicts(&[edited.statement_id], &alice()).await.unwrap();
  assert_eq!(events(&e, AuditEventType::ConflictDetected).await.len(), 1);
}

#[tokio::test]
async fn unchanged_remote_is_not_a_conflict() {
  let e = engine(FakeSource::seeded(1)).await;
  pull_all(&e).await;
  let edited = edit(&e, "st-0", "local text").await;

  let reports = e.check_conflicts(&[edited.statement_id], &alice()).await.unwrap();

  assert!(!reports[0].has_conflict);
  assert_eq!(statement(&e, "st-0").await.sync_status, SyncStatus::Modified);
}

#[tokio::test]
async fn sub_microsecond_remote_timestamps_compare_exactly() {
  let source = FakeSource::seeded(1);
  let at = t(0) + chrono::Duration::nanoseconds(123_456_789);
  source.edit_remotely("st-0", "remote 0", at);
  let e = engine(source.clone()).await;
  pull_all(&e).await;
  let pulled = statement(&e, "st-0").await;
  assert_eq!(pulled.remote_updated_at, at);

  pull_all(&e).await;
  assert_eq!(statement(&e, "st-0").await.version, pulled.version);

  let edited = edit(&e, "st-0", "local text").await;
  let reports = e.check_conflicts(&[edited.statement_id], &alice()).await.unwrap();
  assert!(!reports[0].has_conflict);
  assert_eq!(reports[0].local_baseline, at);

  let job = e.start_push(vec![edited.statement_id], Vec::new(), alice()).await.unwrap();
  let job = wait_for(&e, job.job_id).await;
  assert_eq!(job.status, JobStatus::Completed);
  assert_eq!(source.remote_content("st-0"), "local text");
}

#[tokio::test]
async fn conflict_check_reports_a_failed_fetch_and_checks_the_rest() {
  let source = FakeSource::seeded(2);
  let e = engine(source.clone()).await;
  pull_all(&e).await;
  let gone = edit(&e, "st-0", "local 0").await;
  let changed = edit(&e, "st-1", "local 1").await;
  source.with(|r| r.statements.remove("st-0"));
  source.edit_remotely("st-1", "theirs", t(1));

  let reports = e
    .check_conflicts(&[gone.statement_id, changed.statement_id], &alice())
    .await
    .unwrap();

  assert_eq!(reports.len(), 2);
  assert_eq!(reports[0].statement_id, gone.statement_id);
  assert!(!reports[0].has_conflict);
  assert!(reports[0].error.as_deref().unwrap().contains("st-0"));
  assert_eq!(reports[0].local_content.as_deref(), Some("local 0"));
  assert!(reports[1].has_conflict);
  assert!(reports[1].error.is_none());

  let detected = events(&e, AuditEventType::ConflictDetected).await;
  assert_eq!(detected.len(), 2);
  let failed = detected.iter().find(|ev| ev.status == AuditStatus::Failure).unwrap();
  assert_eq!(failed.entity_id, gone.statement_id.to_string());
  assert_eq!(failed.details["category"], "not_found");
  let conflict = detected.iter().find(|ev| ev.status == AuditStatus::Conflict).unwrap();
  assert_eq!(conflict.entity_id, changed.statement_id.to_string());
  assert_eq!(statement(&e, "st-0").await.version, gone.version);
}

#[tokio::test]
async fn merge_resolution_adopts_the_remote_baseline() {
  let source = FakeSource::seeded(1);
  let e = engine(source.clone()).await;
  pull_all(&e).await;
  let edited = edit(&e, "st-0", "local text").await;
  source.edit_remotely("st-0", "remote text", t(1));
  e.check_conflicts(&[edited.statement_id], &alice()).await.unwrap();

  let resolved = e
    .resolve_conflicts(
      &[ConflictResolution {
        statement_id: edited.statement_id,
        resolution:   Resolution::Merge { content: "merged text".into() },
      }],
      &alice(),
    )
    .await
    .unwrap();

  let st = &resolved[0];
  assert_eq!(st.sync_status, SyncStatus::Modified);
  assert_eq!(st.local_content.as_deref(), Some("merged text"));
  assert_eq!(st.local_baseline_at, t(1));
  let logged = events(&e, AuditEventType::ConflictResolved).await;
  assert_eq!(logged[0].details["strategy"], "merge");
}

// ─── Push ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn push_of_five_statements_through_a_pool_of_three() {
  let source = FakeSource::seeded(5);
  let e = engine(source.clone()).await;
  pull_all(&e).await;
  let mut ids = Vec::new();
  for n in 0..5 {
    ids.push(edit(&e, &format!("st-{n}"), &format!("local {n}")).await.statement_id);
  }

  let job = e.start_push(ids, Vec::new(), alice()).await.unwrap();
  let job = wait_for(&e, job.job_id).await;

  assert_eq!(job.status, JobStatus::Completed);
  let p = push_progress(&job);
  assert_eq!((p.total, p.succeeded, p.failed), (5, 5, 0));
  assert!(source.max_in_flight.load(Ordering::SeqCst) <= 3);
  for n in 0..5 {
    let st = statement(&e, &format!("st-{n}")).await;
    assert!(!st.is_modified);
    assert_eq!(st.sync_status, SyncStatus::Synced);
    assert_eq!(st.remote_content, format!("local {n}"));
    assert_eq!(st.local_baseline_at, st.remote_updated_at);
    assert_eq!(source.remote_content(&format!("st-{n}")), format!("local {n}"));
  }
  let pushes = events(&e, AuditEventType::Push).await;
  assert_eq!(pushes.iter().filter(|ev| ev.entity_type == EntityType::Statement).count(), 5);
}

#[tokio::test]
async fn failed_push_leaves_the_statement_untouched() {
  let source = FakeSource::seeded(2);
  source.with(|r| {
    r.update_failures.insert("st-0".into(), SourceError::Rejected {
      status:  422,
      message: "statement too long".into(),
    });
  });
  let e = engine(source.clone()).await;
  pull_all(&e).await;
  let a = edit(&e, "st-0", "local 0").await;
  let b = edit(&e, "st-1", "local 1").await;

  let job = e
    .start_push(vec![a.statement_id, b.statement_id], Vec::new(), alice())
    .await
    .unwrap();
  let job = wait_for(&e, job.job_id).await;

  assert_eq!(job.status, JobStatus::Partial);
  let p = push_progress(&job);
  assert_eq!((p.succeeded, p.failed), (1, 1));

  let failed = statement(&e, "st-0").await;
  assert!(failed.is_modified);
  assert_eq!(failed.sync_status, SyncStatus::Modified);
  assert_eq!(failed.local_content.as_deref(), Some("local 0"));
  assert_eq!(failed.version, a.version);
  assert_eq!(source.remote_content("st-0"), "remote 0");

  let result = job
    .results
    .iter()
    .find(|r| r.entity_id == a.statement_id.to_string())
    .unwrap();
  assert_eq!(result.category, Some(ErrorCategory::Failed));
  assert!(result.message.as_deref().unwrap().contains("statement too long"));

  let failures = e
    .audit()
    .query(
      &AuditFilter {
        event_types: vec![AuditEventType::Push],
        statuses: vec![AuditStatus::Failure],
        ..AuditFilter::default()
      },
      None,
      0,
    )
    .await
    .unwrap();
  assert_eq!(failures.total_count, 1);
  assert_eq!(failures.events[0].entity_id, a.statement_id.to_string());
}

#[tokio::test]
async fn push_validation_rejects_bad_targets_without_creating_a_job() {
  let source = FakeSource::seeded(3);
  let e = engine(source.clone()).await;
  pull_all(&e).await;
  let conflicted = edit(&e, "st-0", "local 0").await;
  source.edit_remotely("st-0", "remote rewrite", t(1));
  e.check_conflicts(&[conflicted.statement_id], &alice()).await.unwrap();
  let unmodified = statement(&e, "st-1").await;

  let err = e
    .start_push(vec![conflicted.statement_id], Vec::new(), alice())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::StatementHasConflict(id) if id == conflicted.statement_id));

  let err = e
    .start_push(vec![unmodified.statement_id], Vec::new(), alice())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::StatementNotModified(_)));

  let err = e.start_push(vec![Uuid::new_v4()], Vec::new(), alice()).await.unwrap_err();
  assert!(matches!(err, Error::StatementNotFound(_)));

  let err = e.start_push(Vec::new(), Vec::new(), alice()).await.unwrap_err();
  assert!(matches!(err, Error::EmptyRequest(_)));

  assert!(e.list_jobs(Some(JobKind::Push), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn keep_local_resolution_lets_the_push_through() {
  let source = FakeSource::seeded(1);
  let e = engine(source.clone()).await;
  pull_all(&e).await;
  let st = edit(&e, "st-0", "ours").await;
  source.edit_remotely("st-0", "theirs", t(1));
  e.check_conflicts(&[st.statement_id], &alice()).await.unwrap();

  let job = e
    .start_push(
      vec![st.statement_id],
      vec![ConflictResolution { statement_id: st.statement_id, resolution: Resolution::KeepLocal }],
      alice(),
    )
    .await
    .unwrap();
  let job = wait_for(&e, job.job_id).await;

  assert_eq!(job.status, JobStatus::Completed);
  assert_eq!(push_progress(&job).succeeded, 1);
  assert_eq!(source.remote_content("st-0"), "ours");
  assert_eq!(statement(&e, "st-0").await.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn keep_remote_resolution_is_skipped() {
  let source = FakeSource::seeded(1);
  let e = engine(source.clone()).await;
  pull_all(&e).await;
  let st = edit(&e, "st-0", "ours").await;
  source.edit_remotely("st-0", "theirs", t(1));
  e.check_conflicts(&[st.statement_id], &alice()).await.unwrap();

  let job = e
    .start_push(
      Vec::new(),
      vec![ConflictResolution { statement_id: st.statement_id, resolution: Resolution::KeepRemote }],
      alice(),
    )
    .await
    .unwrap();
  let job = wait_for(&e, job.job_id).await;

  assert_eq!(job.status, JobStatus::Completed);
  let p = push_progress(&job);
  assert_eq!((p.total, p.skipped, p.succeeded), (1, 1, 0));
  let after = statement(&e, "st-0").await;
  assert!(!after.is_modified);
  assert_eq!(after.remote_content, "theirs");
  assert_eq!(source.with(|r| r.updates), 0);
}

#[tokio::test]
async fn push_rechecks_the_remote_before_writing() {
  let source = FakeSource::seeded(1);
  let e = engine(source.clone()).await;
  pull_all(&e).await;
  let st = edit(&e, "st-0", "ours").await;
  // Changed remotely after validation would have passed.
  source.edit_remotely("st-0", "theirs", t(2));

  let job = e.start_push(vec![st.statement_id], Vec::new(), alice()).await.unwrap();
  let job = wait_for(&e, job.job_id).await;

  assert_eq!(job.status, JobStatus::Partial);
  assert_eq!(push_progress(&job).conflicts, 1);
  assert_eq!(job.results[0].outcome, ItemOutcome::Conflict);
  assert_eq!(source.remote_content("st-0"), "theirs");
  let after = statement(&e, "st-0").await;
  assert_eq!(after.sync_status, SyncStatus::Conflict);
  assert_eq!(after.local_content.as_deref(), Some("ours"));
}

#[tokio::test]
async fn remote_refusing_the_write_as_a_conflict_leaves_it_resolvable() {
  let source = FakeSource::seeded(2);
  source.with(|r| {
    r.races.insert("st-0".into(), ("theirs".into(), t(3)));
  });
  let e = engine(source.clone()).await;
  pull_all(&e).await;
  let a = edit(&e, "st-0", "local 0").await;
  let b = edit(&e, "st-1", "local 1").await;

  let job = e
    .start_push(vec![a.statement_id, b.statement_id], Vec::new(), alice())
    .await
    .unwrap();
  let job = wait_for(&e, job.job_id).await;

  assert_eq!(job.status, JobStatus::Partial);
  let p = push_progress(&job);
  assert_eq!((p.succeeded, p.failed, p.conflicts), (1, 0, 1));
  let result = job
    .results
    .iter()
    .find(|r| r.entity_id == a.statement_id.to_string())
    .unwrap();
  assert_eq!(result.outcome, ItemOutcome::Conflict);
  assert_eq!(result.category, Some(ErrorCategory::Conflict));
  assert!(result.message.as_deref().unwrap().contains("modified by another user"));

  let after = statement(&e, "st-0").await;
  assert_eq!(after.sync_status, SyncStatus::Conflict);
  assert_eq!(after.remote_content, "theirs");
  assert_eq!(after.local_content.as_deref(), Some("local 0"));
  let detected = events(&e, AuditEventType::ConflictDetected).await;
  assert_eq!(detected.len(), 1);
  assert_eq!(detected[0].entity_id, a.statement_id.to_string());

  let job = e
    .start_push(
      Vec::new(),
      vec![ConflictResolution { statement_id: a.statement_id, resolution: Resolution::KeepLocal }],
      alice(),
    )
    .await
    .unwrap();
  let job = wait_for(&e, job.job_id).await;
  assert_eq!(job.status, JobStatus::Completed);
  assert_eq!(source.remote_content("st-0"), "local 0");
}

#[tokio::test]
async fn slow_write_times_out_without_touching_the_statement() {
  let source = FakeSource::seeded(3);
  source.with(|r| {
    r.update_delays.insert("st-0".into(), Duration::from_secs(3));
  });
  let e = engine_with(source.clone(), EngineConfig {
    push_item_timeout_secs: 1,
    ..test_config()
  })
  .await;
  pull_all(&e).await;
  let mut ids = Vec::new();
  for n in 0..3 {
    ids.push(edit(&e, &format!("st-{n}"), &format!("local {n}")).await);
  }

  let job = e
    .start_push(ids.iter().map(|s| s.statement_id).collect(), Vec::new(), alice())
    .await
    .unwrap();
  let job = wait_for(&e, job.job_id).await;

  assert_eq!(job.status, JobStatus::Partial);
  let p = push_progress(&job);
  assert_eq!((p.succeeded, p.failed), (2, 1));
  let slow = &ids[0];
  let result = job
    .results
    .iter()
    .find(|r| r.entity_id == slow.statement_id.to_string())
    .unwrap();
  assert_eq!(result.outcome, ItemOutcome::Failed);
  assert_eq!(result.category, Some(ErrorCategory::Timeout));

  let after = statement(&e, "st-0").await;
  assert!(after.is_modified);
  assert_eq!(after.version, slow.version);
  assert_eq!(after.local_content.as_deref(), Some("local 0"));
  assert_eq!(source.remote_content("st-0"), "remote 0");
  for n in 1..3 {
    assert_eq!(statement(&e, &format!("st-{n}")).await.sync_status, SyncStatus::Synced);
  }
}

#[tokio::test]
async fn cancelling_a_push_keeps_the_writes_already_made() {
  let source = FakeSource::seeded(4);
  source.with(|r| {
    for n in 0..4 {
      r.update_delays.insert(format!("st-{n}"), Duration::from_millis(200));
    }
  });
  let e = engine_with(source.clone(), EngineConfig { push_concurrency: 1, ..test_config() }).await;
  pull_all(&e).await;
  let mut ids = Vec::new();
  for n in 0..4 {
    ids.push(edit(&e, &format!("st-{n}"), &format!("local {n}")).await.statement_id);
  }

  let job = e.start_push(ids, Vec::new(), alice()).await.unwrap();
  tokio::time::timeout(Duration::from_secs(5), async {
    while source.with(|r| r.updates) == 0 {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  })
  .await
  .expect("first write did not land");
  e.cancel_job(job.job_id, &alice()).await.unwrap();
  let job = wait_for(&e, job.job_id).await;

  assert_eq!(job.status, JobStatus::Cancelled);
  let p = push_progress(&job);
  assert!(p.succeeded >= 1 && p.succeeded < 4, "succeeded {}", p.succeeded);
  assert_eq!(p.succeeded + p.failed, 4);

  for result in &job.results {
    let id: Uuid = result.entity_id.parse().unwrap();
    let st = e.store().get_statement(id).await.unwrap().unwrap();
    match result.outcome {
      ItemOutcome::Succeeded => {
        assert_eq!(st.sync_status, SyncStatus::Synced);
        assert_eq!(source.remote_content(&st.external_id), st.remote_content);
      }
      ItemOutcome::Failed => {
        assert_eq!(result.category, Some(ErrorCategory::Cancelled));
        assert_eq!(st.sync_status, SyncStatus::Modified);
        assert_ne!(source.remote_content(&st.external_id), st.effective_content());
      }
      other => panic!("unexpected outcome {other:?}"),
    }
  }
}

#[tokio::test]
async fn push_reads_back_the_timestamp_when_the_response_lacks_one() {
  let source = FakeSource::seeded(1);
  source.with(|r| r.omit_timestamp = true);
  let e = engine(source.clone()).await;
  pull_all(&e).await;
  let st = edit(&e, "st-0", "ours").await;

  let job = e.start_push(vec![st.statement_id], Vec::new(), alice()).await.unwrap();
  wait_for(&e, job.job_id).await;

  let after = statement(&e, "st-0").await;
  assert_eq!(after.sync_status, SyncStatus::Synced);
  assert_eq!(after.remote_updated_at, t(11));
  assert_eq!(after.local_baseline_at, t(11));
}

#[tokio::test]
async fn edit_after_push_is_not_a_conflict() {
  let source = FakeSource::seeded(1);
  let e = engine(source.clone()).await;
  pull_all(&e).await;
  let st = edit(&e, "st-0", "first").await;
  let job = e.start_push(vec![st.statement_id], Vec::new(), alice()).await.unwrap();
  wait_for(&e, job.job_id).await;

  edit(&e, "st-0", "second").await;
  let reports = e.check_conflicts(&[st.statement_id], &alice()).await.unwrap();

  assert!(!reports[0].has_conflict);
  let job = e.start_push(vec![st.statement_id], Vec::new(), alice()).await.unwrap();
  let job = wait_for(&e, job.job_id).await;
  assert_eq!(job.status, JobStatus::Completed);
  assert_eq!(source.remote_content("st-0"), "second");
}

// ─── Edits & audit ───────────────────────────────────────────────────────────

#[tokio::test]
async fn local_edit_is_audited_with_the_actor() {
  let e = engine(FakeSource::seeded(1)).await;
  pull_all(&e).await;

  let st = edit(&e, "st-0", "local").await;

  assert_eq!(st.sync_status, SyncStatus::Modified);
  let edits = events(&e, AuditEventType::StatementEdited).await;
  assert_eq!(edits.len(), 1);
  assert_eq!(edits[0].actor, "alice");
  assert_eq!(edits[0].entity_id, st.statement_id.to_string());

  let err = e
    .set_local_content(Uuid::new_v4(), "x".into(), &alice())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::StatementNotFound(_)));
}

#[tokio::test]
async fn audit_query_clamps_the_page_size() {
  let e = engine(FakeSource::seeded(3)).await;
  pull_all(&e).await;
  for n in 0..3 {
    edit(&e, &format!("st-{n}"), "local").await;
  }

  let filter = AuditFilter::default();
  let page = e.audit().query(&filter, Some(2), 0).await.unwrap();
  assert_eq!(page.events.len(), 2);
  assert_eq!(page.total_count, 5);

  let page = e.audit().query(&filter, Some(0), 0).await.unwrap();
  assert_eq!(page.events.len(), 1);
}

#[tokio::test]
async fn audit_export_renders_every_match() {
  let e = engine(FakeSource::seeded(2)).await;
  pull_all(&e).await;
  let filter = AuditFilter { actor: Some("alice".into()), ..AuditFilter::default() };

  let csv = e.audit().export(&filter, ExportFormat::Csv).await.unwrap();
  let lines: Vec<&str> = csv.lines().collect();
  assert_eq!(
    lines[0],
    "event_id,created_at,event_type,entity_type,entity_id,actor,status,details"
  );
  assert_eq!(lines.len(), 3);

  let jsonl = e.audit().export(&filter, ExportFormat::Jsonl).await.unwrap();
  let first: serde_json::Value = serde_json::from_str(jsonl.lines().next().unwrap()).unwrap();
  assert_eq!(first["event_type"], "pull");
  assert_eq!(first["status"], "success");
}

#[test]
fn csv_quotes_fields_that_need_it() {
  let event = grcsync_core::audit::AuditEvent {
    event_id:    Uuid::nil(),
    event_type:  AuditEventType::Push,
    entity_type: EntityType::Statement,
    entity_id:   "st, 1".into(),
    actor:       "o\"brien".into(),
    status:      AuditStatus::Failure,
    details:     serde_json::json!({ "message": "a,b" }),
    created_at:  t(0),
  };

  let csv = render_csv(&[event]);
  let row = csv.split("\r\n").nth(1).unwrap();

  assert!(row.contains(",\"st, 1\","));
  assert!(row.contains(",\"o\"\"brien\","));
  assert!(row.ends_with(",\"{\"\"message\"\":\"\"a,b\"\"}\""));
}

// ─── Job registry ────────────────────────────────────────────────────────────

#[test]
fn claims_are_exclusive_per_kind_and_scope() {
  let registry = Arc::new(JobRegistry::default());

  let mut claim = registry.claim(JobKind::Pull, &["sys-1".to_owned(), "sys-2".to_owned()]).unwrap();
  assert!(registry.claim(JobKind::Pull, &["sys-2".to_owned()]).is_err());
  assert!(registry.claim(JobKind::Push, &["sys-2".to_owned()]).is_ok());

  let job_id = Uuid::new_v4();
  claim.attach(job_id);
  let token = claim.token();
  assert!(registry.cancel(job_id));
  assert!(token.is_cancelled());

  drop(claim);
  assert!(!registry.is_running(job_id));
  assert!(!registry.cancel(job_id));
  assert!(registry.claim(JobKind::Pull, &["sys-1".to_owned(), "sys-2".to_owned()]).is_ok());
}
