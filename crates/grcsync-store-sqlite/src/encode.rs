//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (nanoseconds, `Z`)
//! so text ordering matches time ordering and values read back compare equal
//! to what the remote reported. Enum discriminants are stored as
//! their snake_case names. Structured fields (job progress, results, audit
//! details) are stored as compact JSON. UUIDs are stored as hyphenated
//! lowercase strings.

use chrono::{DateTime, SecondsFormat, Utc};
use grcsync_core::{
  audit::AuditEvent,
  entity::{Control, Statement, System, parse_discriminant},
  job::Job,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  s.map(decode_dt).transpose()
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const SYSTEM_COLUMNS: &str =
  "system_id, external_id, name, description, remote_updated_at, last_pulled_at";

/// Raw strings read directly from a `systems` row.
pub struct RawSystem {
  pub system_id:         String,
  pub external_id:       String,
  pub name:              String,
  pub description:       Option<String>,
  pub remote_updated_at: Option<String>,
  pub last_pulled_at:    String,
}

impl RawSystem {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      system_id:         row.get(0)?,
      external_id:       row.get(1)?,
      name:              row.get(2)?,
      description:       row.get(3)?,
      remote_updated_at: row.get(4)?,
      last_pulled_at:    row.get(5)?,
    })
  }

  pub fn into_system(self) -> Result<System> {
    Ok(System {
      system_id:         decode_uuid(&self.system_id)?,
      external_id:       self.external_id,
      name:              self.name,
      description:       self.description,
      remote_updated_at: decode_opt_dt(self.remote_updated_at.as_deref())?,
      last_pulled_at:    decode_dt(&self.last_pulled_at)?,
    })
  }
}

pub const CONTROL_COLUMNS: &str = "control_id, system_id, external_id, control_number, title, \
                                   family, baseline, remote_updated_at, last_pulled_at";

/// Raw strings read directly from a `controls` row.
pub struct RawControl {
  pub control_id:        String,
  pub system_id:         String,
  pub external_id:       String,
  pub control_number:    String,
  pub title:             String,
  pub family:            Option<String>,
  pub baseline:          Option<String>,
  pub remote_updated_at: Option<String>,
  pub last_pulled_at:    String,
}

impl RawControl {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      control_id:        row.get(0)?,
      system_id:         row.get(1)?,
      external_id:       row.get(2)?,
      control_number:    row.get(3)?,
      title:             row.get(4)?,
      family:            row.get(5)?,
      baseline:          row.get(6)?,
      remote_updated_at: row.get(7)?,
      last_pulled_at:    row.get(8)?,
    })
  }

  pub fn into_control(self) -> Result<Control> {
    Ok(Control {
      control_id:        decode_uuid(&self.control_id)?,
      system_id:         decode_uuid(&self.system_id)?,
      external_id:       self.external_id,
      control_number:    self.control_number,
      title:             self.title,
      family:            self.family,
      baseline:          self.baseline,
      remote_updated_at: decode_opt_dt(self.remote_updated_at.as_deref())?,
      last_pulled_at:    decode_dt(&self.last_pulled_at)?,
    })
  }
}

pub const STATEMENT_COLUMNS: &str = "statement_id, control_id, external_id, remote_content, \
                                     remote_updated_at, local_content, local_baseline_at, \
                                     is_modified, sync_status, version, updated_at";

/// Raw values read directly from a `statements` row.
pub struct RawStatement {
  pub statement_id:      String,
  pub control_id:        String,
  pub external_id:       String,
  pub remote_content:    String,
  pub remote_updated_at: String,
  pub local_content:     Option<String>,
  pub local_baseline_at: String,
  pub is_modified:       bool,
  pub sync_status:       String,
  pub version:           i64,
  pub updated_at:        String,
}

impl RawStatement {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      statement_id:      row.get(0)?,
      control_id:        row.get(1)?,
      external_id:       row.get(2)?,
      remote_content:    row.get(3)?,
      remote_updated_at: row.get(4)?,
      local_content:     row.get(5)?,
      local_baseline_at: row.get(6)?,
      is_modified:       row.get(7)?,
      sync_status:       row.get(8)?,
      version:           row.get(9)?,
      updated_at:        row.get(10)?,
    })
  }

  pub fn into_statement(self) -> Result<Statement> {
    Ok(Statement {
      statement_id:      decode_uuid(&self.statement_id)?,
      control_id:        decode_uuid(&self.control_id)?,
      external_id:       self.external_id,
      remote_content:    self.remote_content,
      remote_updated_at: decode_dt(&self.remote_updated_at)?,
      local_content:     self.local_content,
      local_baseline_at: decode_dt(&self.local_baseline_at)?,
      is_modified:       self.is_modified,
      sync_status:       parse_discriminant("sync status", &self.sync_status)?,
      version:           self.version,
      updated_at:        decode_dt(&self.updated_at)?,
    })
  }
}

pub const JOB_COLUMNS: &str = "job_id, kind, status, actor, target_ids, progress, results, \
                               error, created_at, started_at, finished_at";

/// Raw strings read directly from a `sync_jobs` row.
pub struct RawJob {
  pub job_id:      String,
  pub kind:        String,
  pub status:      String,
  pub actor:       String,
  pub target_ids:  String,
  pub progress:    String,
  pub results:     String,
  pub error:       Option<String>,
  pub created_at:  String,
  pub started_at:  Option<String>,
  pub finished_at: Option<String>,
}

impl RawJob {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      job_id:      row.get(0)?,
      kind:        row.get(1)?,
      status:      row.get(2)?,
      actor:       row.get(3)?,
      target_ids:  row.get(4)?,
      progress:    row.get(5)?,
      results:     row.get(6)?,
      error:       row.get(7)?,
      created_at:  row.get(8)?,
      started_at:  row.get(9)?,
      finished_at: row.get(10)?,
    })
  }

  pub fn into_job(self) -> Result<Job> {
    Ok(Job {
      job_id:      decode_uuid(&self.job_id)?,
      kind:        parse_discriminant("job kind", &self.kind)?,
      status:      parse_discriminant("job status", &self.status)?,
      actor:       self.actor,
      target_ids:  serde_json::from_str(&self.target_ids)?,
      progress:    serde_json::from_str(&self.progress)?,
      results:     serde_json::from_str(&self.results)?,
      error:       self.error,
      created_at:  decode_dt(&self.created_at)?,
      started_at:  decode_opt_dt(self.started_at.as_deref())?,
      finished_at: decode_opt_dt(self.finished_at.as_deref())?,
    })
  }
}

pub const AUDIT_COLUMNS: &str =
  "event_id, event_type, entity_type, entity_id, actor, status, details, created_at";

/// Raw strings read directly from an `audit_events` row.
pub struct RawAuditEvent {
  pub event_id:    String,
  pub event_type:  String,
  pub entity_type: String,
  pub entity_id:   String,
  pub actor:       String,
  pub status:      String,
  pub details:     String,
  pub created_at:  String,
}

impl RawAuditEvent {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      event_id:    row.get(0)?,
      event_type:  row.get(1)?,
      entity_type: row.get(2)?,
      entity_id:   row.get(3)?,
      actor:       row.get(4)?,
      status:      row.get(5)?,
      details:     row.get(6)?,
      created_at:  row.get(7)?,
    })
  }

  pub fn into_event(self) -> Result<AuditEvent> {
    Ok(AuditEvent {
      event_id:    decode_uuid(&self.event_id)?,
      event_type:  parse_discriminant("audit event type", &self.event_type)?,
      entity_type: parse_discriminant("entity type", &self.entity_type)?,
      entity_id:   self.entity_id,
      actor:       self.actor,
      status:      parse_discriminant("audit status", &self.status)?,
      details:     serde_json::from_str(&self.details)?,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}
