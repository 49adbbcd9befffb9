//! [`SqliteStore`], the SQLite implementation of [`SyncStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use grcsync_core::{
  entity::{Control, Statement, SyncStatus, System},
  job::{Job, JobKind, JobProgress, JobStatus, NewJob},
  remote::{RemoteControl, RemoteSystem},
  store::SyncStore,
  sync::StatementState,
};

use crate::{
  Error, Result,
  encode::{
    CONTROL_COLUMNS, JOB_COLUMNS, RawControl, RawJob, RawStatement, RawSystem,
    STATEMENT_COLUMNS, SYSTEM_COLUMNS, encode_dt, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A sync store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mainly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn fetch_statement(&self, column: &'static str, id: Uuid) -> Result<Option<Statement>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawStatement> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {STATEMENT_COLUMNS} FROM statements WHERE {column} = ?1");
        Ok(
          conn
            .query_row(&sql, rusqlite::params![id_str], RawStatement::from_row)
            .optional()?,
        )
      })
      .await?;
    raw.map(RawStatement::into_statement).transpose()
  }

  /// Version-checked write of a statement's sync columns. `external_id`
  /// replaces the stored remote id when given.
  async fn write_statement(
    &self,
    id: Uuid,
    expected_version: i64,
    external_id: Option<String>,
    state: StatementState,
  ) -> Result<Option<Statement>> {
    let id_str        = encode_uuid(id);
    let remote_at_str = encode_dt(state.remote_updated_at);
    let baseline_str  = encode_dt(state.local_baseline_at);
    let status_str    = state.sync_status.to_string();
    let now_str       = encode_dt(Utc::now());

    let raw: Option<RawStatement> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "UPDATE statements SET
             remote_content    = ?1,
             remote_updated_at = ?2,
             local_content     = ?3,
             local_baseline_at = ?4,
             is_modified       = ?5,
             sync_status       = ?6,
             updated_at        = ?7,
             external_id       = COALESCE(?10, external_id),
             version           = version + 1
           WHERE statement_id = ?8 AND version = ?9
           RETURNING {STATEMENT_COLUMNS}"
        );
        Ok(
          conn
            .query_row(
              &sql,
              rusqlite::params![
                state.remote_content,
                remote_at_str,
                state.local_content,
                baseline_str,
                state.is_modified,
                status_str,
                now_str,
                id_str,
                expected_version,
                external_id,
              ],
              RawStatement::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawStatement::into_statement).transpose()
  }
}

// ─── SyncStore impl ──────────────────────────────────────────────────────────

impl SyncStore for SqliteStore {
  type Error = Error;

  // ── Systems & controls ────────────────────────────────────────────────────

  async fn upsert_system(&self, remote: RemoteSystem) -> Result<System> {
    let id_str      = encode_uuid(Uuid::new_v4());
    let updated_str = remote.updated_at.map(encode_dt);
    let pulled_str  = encode_dt(Utc::now());

    let raw: RawSystem = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "INSERT INTO systems ({SYSTEM_COLUMNS})
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT (external_id) DO UPDATE SET
             name              = excluded.name,
             description       = excluded.description,
             remote_updated_at = excluded.remote_updated_at,
             last_pulled_at    = excluded.last_pulled_at
           RETURNING {SYSTEM_COLUMNS}"
        );
        Ok(conn.query_row(
          &sql,
          rusqlite::params![
            id_str,
            remote.external_id,
            remote.name,
            remote.description,
            updated_str,
            pulled_str,
          ],
          RawSystem::from_row,
        )?)
      })
      .await?;

    raw.into_system()
  }

  async fn upsert_control(&self, system_id: Uuid, remote: RemoteControl) -> Result<Control> {
    if self.get_system(system_id).await?.is_none() {
      return Err(Error::SystemNotFound(system_id));
    }

    let id_str        = encode_uuid(Uuid::new_v4());
    let system_id_str = encode_uuid(system_id);
    let updated_str   = remote.updated_at.map(encode_dt);
    let pulled_str    = encode_dt(Utc::now());

    let raw: RawControl = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "INSERT INTO controls ({CONTROL_COLUMNS})
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
           ON CONFLICT (system_id, external_id) DO UPDATE SET
             control_number    = excluded.control_number,
             title             = excluded.title,
             family            = excluded.family,
             baseline          = excluded.baseline,
             remote_updated_at = excluded.remote_updated_at,
             last_pulled_at    = excluded.last_pulled_at
           RETURNING {CONTROL_COLUMNS}"
        );
        Ok(conn.query_row(
          &sql,
          rusqlite::params![
            id_str,
            system_id_str,
            remote.external_id,
            remote.control_number,
            remote.title,
            remote.family,
            remote.baseline,
            updated_str,
            pulled_str,
          ],
          RawControl::from_row,
        )?)
      })
      .await?;

    raw.into_control()
  }

  async fn get_system(&self, id: Uuid) -> Result<Option<System>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawSystem> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {SYSTEM_COLUMNS} FROM systems WHERE system_id = ?1");
        Ok(
          conn
            .query_row(&sql, rusqlite::params![id_str], RawSystem::from_row)
            .optional()?,
        )
      })
      .await?;
    raw.map(RawSystem::into_system).transpose()
  }

  async fn list_systems(&self) -> Result<Vec<System>> {
    let raws: Vec<RawSystem> = self
      .conn
      .call(|conn| {
        let sql = format!("SELECT {SYSTEM_COLUMNS} FROM systems ORDER BY name");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], RawSystem::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawSystem::into_system).collect()
  }

  async fn get_control(&self, id: Uuid) -> Result<Option<Control>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawControl> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {CONTROL_COLUMNS} FROM controls WHERE control_id = ?1");
        Ok(
          conn
            .query_row(&sql, rusqlite::params![id_str], RawControl::from_row)
            .optional()?,
        )
      })
      .await?;
    raw.map(RawControl::into_control).transpose()
  }

  async fn list_controls(&self, system_id: Uuid) -> Result<Vec<Control>> {
    let id_str = encode_uuid(system_id);
    let raws: Vec<RawControl> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {CONTROL_COLUMNS} FROM controls WHERE system_id = ?1 ORDER BY control_number"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], RawControl::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawControl::into_control).collect()
  }

  // ── Statements ────────────────────────────────────────────────────────────

  async fn get_statement(&self, id: Uuid) -> Result<Option<Statement>> {
    self.fetch_statement("statement_id", id).await
  }

  async fn get_statement_for_control(&self, control_id: Uuid) -> Result<Option<Statement>> {
    self.fetch_statement("control_id", control_id).await
  }

  async fn list_statements(
    &self,
    control_id: Option<Uuid>,
    status: Option<SyncStatus>,
  ) -> Result<Vec<Statement>> {
    let control_str = control_id.map(encode_uuid);
    let status_str  = status.map(|s| s.to_string());

    let raws: Vec<RawStatement> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {STATEMENT_COLUMNS} FROM statements
           WHERE (?1 IS NULL OR control_id = ?1)
             AND (?2 IS NULL OR sync_status = ?2)
           ORDER BY updated_at DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![control_str, status_str], RawStatement::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawStatement::into_statement).collect()
  }

  async fn insert_statement(
    &self,
    control_id: Uuid,
    external_id: String,
    state: StatementState,
  ) -> Result<Option<Statement>> {
    if self.get_control(control_id).await?.is_none() {
      return Err(Error::ControlNotFound(control_id));
    }

    let id_str         = encode_uuid(Uuid::new_v4());
    let control_id_str = encode_uuid(control_id);
    let remote_at_str  = encode_dt(state.remote_updated_at);
    let baseline_str   = encode_dt(state.local_baseline_at);
    let status_str     = state.sync_status.to_string();
    let now_str        = encode_dt(Utc::now());

    let raw: Option<RawStatement> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "INSERT INTO statements ({STATEMENT_COLUMNS})
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10)
           ON CONFLICT (control_id) DO NOTHING
           RETURNING {STATEMENT_COLUMNS}"
        );
        Ok(
          conn
            .query_row(
              &sql,
              rusqlite::params![
                id_str,
                control_id_str,
                external_id,
                state.remote_content,
                remote_at_str,
                state.local_content,
                baseline_str,
                state.is_modified,
                status_str,
                now_str,
              ],
              RawStatement::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawStatement::into_statement).transpose()
  }

  async fn update_statement(
    &self,
    id: Uuid,
    expected_version: i64,
    state: StatementState,
  ) -> Result<Option<Statement>> {
    self.write_statement(id, expected_version, None, state).await
  }

  async fn relink_statement(
    &self,
    id: Uuid,
    expected_version: i64,
    external_id: String,
    state: StatementState,
  ) -> Result<Option<Statement>> {
    self.write_statement(id, expected_version, Some(external_id), state).await
  }

  // ── Jobs ──────────────────────────────────────────────────────────────────

  async fn create_job(&self, input: NewJob) -> Result<Job> {
    let job = Job {
      job_id:      Uuid::new_v4(),
      kind:        input.kind,
      status:      JobStatus::Pending,
      actor:       input.actor,
      target_ids:  input.target_ids,
      progress:    JobProgress::empty(input.kind),
      results:     Vec::new(),
      error:       None,
      created_at:  Utc::now(),
      started_at:  None,
      finished_at: None,
    };

    let id_str       = encode_uuid(job.job_id);
    let kind_str     = job.kind.to_string();
    let status_str   = job.status.to_string();
    let actor        = job.actor.clone();
    let targets_str  = serde_json::to_string(&job.target_ids)?;
    let progress_str = serde_json::to_string(&job.progress)?;
    let created_str  = encode_dt(job.created_at);

    self
      .conn
      .call(move |conn| {
        let sql = format!(
          "INSERT INTO sync_jobs ({JOB_COLUMNS})
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, '[]', NULL, ?7, NULL, NULL)"
        );
        conn.execute(
          &sql,
          rusqlite::params![
            id_str,
            kind_str,
            status_str,
            actor,
            targets_str,
            progress_str,
            created_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(job)
  }

  async fn save_job(&self, job: &Job) -> Result<()> {
    let job_id       = job.job_id;
    let id_str       = encode_uuid(job.job_id);
    let status_str   = job.status.to_string();
    let progress_str = serde_json::to_string(&job.progress)?;
    let results_str  = serde_json::to_string(&job.results)?;
    let error        = job.error.clone();
    let started_str  = job.started_at.map(encode_dt);
    let finished_str = job.finished_at.map(encode_dt);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE sync_jobs SET
             status      = ?1,
             progress    = ?2,
             results     = ?3,
             error       = ?4,
             started_at  = ?5,
             finished_at = ?6
           WHERE job_id = ?7",
          rusqlite::params![
            status_str,
            progress_str,
            results_str,
            error,
            started_str,
            finished_str,
            id_str,
          ],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::JobNotFound(job_id));
    }
    Ok(())
  }

  async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawJob> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {JOB_COLUMNS} FROM sync_jobs WHERE job_id = ?1");
        Ok(
          conn
            .query_row(&sql, rusqlite::params![id_str], RawJob::from_row)
            .optional()?,
        )
      })
      .await?;
    raw.map(RawJob::into_job).transpose()
  }

  async fn list_jobs(&self, kind: Option<JobKind>, limit: usize) -> Result<Vec<Job>> {
    let kind_str  = kind.map(|k| k.to_string());
    let limit_val = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawJob> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {JOB_COLUMNS} FROM sync_jobs
           WHERE (?1 IS NULL OR kind = ?1)
           ORDER BY created_at DESC
           LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![kind_str, limit_val], RawJob::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawJob::into_job).collect()
  }

  async fn abandon_active_jobs(&self, reason: &str) -> Result<u64> {
    let reason      = reason.to_owned();
    let failed_str  = JobStatus::Failed.to_string();
    let pending_str = JobStatus::Pending.to_string();
    let running_str = JobStatus::Running.to_string();
    let now_str     = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE sync_jobs SET status = ?1, error = ?2, finished_at = ?3
           WHERE status IN (?4, ?5)",
          rusqlite::params![failed_str, reason, now_str, pending_str, running_str],
        )?)
      })
      .await?;

    if changed > 0 {
      tracing::warn!(count = changed, "marked interrupted jobs as failed");
    }
    Ok(changed as u64)
  }
}
