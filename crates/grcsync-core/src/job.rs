//! Background job records for pulls and pushes.
//!
//! A job is created when a pull or push starts, mutated only by the
//! orchestrator that owns it, and frozen once it reaches a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::{audit::EntityType, remote::SourceError};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
  Pull,
  Push,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
  Pending,
  Running,
  Completed,
  Failed,
  /// Finished, but at least one item failed.
  Partial,
  /// Stopped on request; work committed before the stop is kept.
  Cancelled,
}

impl JobStatus {
  pub fn is_terminal(self) -> bool {
    !matches!(self, Self::Pending | Self::Running)
  }
}

// ─── Progress ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullProgress {
  pub systems_total:        usize,
  pub systems_processed:    usize,
  pub controls_processed:   usize,
  pub statements_processed: usize,
  pub conflicts_detected:   usize,
  pub items_failed:         usize,
}

impl PullProgress {
  /// Items processed so far; drives the persistence cadence.
  pub fn items(&self) -> usize {
    self.systems_processed + self.controls_processed + self.statements_processed
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushProgress {
  pub total:     usize,
  pub succeeded: usize,
  pub failed:    usize,
  pub skipped:   usize,
  pub conflicts: usize,
}

impl PushProgress {
  pub fn finished(&self) -> usize {
    self.succeeded + self.failed + self.skipped + self.conflicts
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobProgress {
  Pull(PullProgress),
  Push(PushProgress),
}

impl JobProgress {
  pub fn empty(kind: JobKind) -> Self {
    match kind {
      JobKind::Pull => Self::Pull(PullProgress::default()),
      JobKind::Push => Self::Push(PushProgress::default()),
    }
  }
}

// ─── Per-item results ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
  Succeeded,
  Failed,
  Skipped,
  /// The remote changed underneath the item; it needs a resolution.
  Conflict,
}

/// Coarse failure category shown to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
  RateLimited,
  NotFound,
  Conflict,
  Timeout,
  Cancelled,
  Failed,
}

impl ErrorCategory {
  /// Whether trying the same item again later may succeed.
  pub fn is_retryable(self) -> bool {
    matches!(self, Self::RateLimited | Self::Timeout | Self::Cancelled)
  }

  /// Short message suitable for a UI.
  pub fn user_message(self) -> &'static str {
    match self {
      Self::RateLimited => "The remote system is rate limiting requests; try again later.",
      Self::NotFound => "The record no longer exists in the remote system.",
      Self::Conflict => "The remote record changed; resolve the conflict before pushing.",
      Self::Timeout => "The remote system did not respond in time; try again later.",
      Self::Cancelled => "The job was cancelled before this item finished.",
      Self::Failed => "The remote system refused the change.",
    }
  }
}

impl From<&SourceError> for ErrorCategory {
  fn from(err: &SourceError) -> Self {
    match err {
      SourceError::RateLimited { .. } => Self::RateLimited,
      SourceError::NotFound { .. } => Self::NotFound,
      SourceError::Conflict { .. } => Self::Conflict,
      SourceError::Timeout => Self::Timeout,
      SourceError::Cancelled => Self::Cancelled,
      _ => Self::Failed,
    }
  }
}

/// What happened to one item of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
  pub entity_type: EntityType,
  /// Local id for statements; remote id for pulled records.
  pub entity_id:   String,
  pub outcome:     ItemOutcome,
  pub category:    Option<ErrorCategory>,
  pub message:     Option<String>,
}

impl ItemResult {
  pub fn succeeded(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
    Self {
      entity_type,
      entity_id: entity_id.into(),
      outcome: ItemOutcome::Succeeded,
      category: None,
      message: None,
    }
  }

  pub fn skipped(
    entity_type: EntityType,
    entity_id: impl Into<String>,
    message: impl Into<String>,
  ) -> Self {
    Self {
      entity_type,
      entity_id: entity_id.into(),
      outcome: ItemOutcome::Skipped,
      category: None,
      message: Some(message.into()),
    }
  }

  pub fn conflict(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
    Self {
      entity_type,
      entity_id: entity_id.into(),
      outcome: ItemOutcome::Conflict,
      category: Some(ErrorCategory::Conflict),
      message: Some(ErrorCategory::Conflict.user_message().to_owned()),
    }
  }

  /// A failure with a category derived from `err` and a message that pairs
  /// the operator-facing text with the underlying detail.
  pub fn failed(
    entity_type: EntityType,
    entity_id: impl Into<String>,
    err: &SourceError,
  ) -> Self {
    let category = ErrorCategory::from(err);
    Self {
      entity_type,
      entity_id: entity_id.into(),
      outcome: ItemOutcome::Failed,
      category: Some(category),
      message: Some(format!("{} ({err})", category.user_message())),
    }
  }

  /// A failure that did not come from the remote (decode, storage).
  pub fn failed_with(
    entity_type: EntityType,
    entity_id: impl Into<String>,
    message: impl Into<String>,
  ) -> Self {
    Self {
      entity_type,
      entity_id: entity_id.into(),
      outcome: ItemOutcome::Failed,
      category: Some(ErrorCategory::Failed),
      message: Some(message.into()),
    }
  }
}

// ─── Job ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
  pub job_id:      Uuid,
  pub kind:        JobKind,
  pub status:      JobStatus,
  pub actor:       String,
  /// Remote system ids for a pull, local statement ids for a push.
  pub target_ids:  Vec<String>,
  pub progress:    JobProgress,
  pub results:     Vec<ItemResult>,
  /// Job-level failure, when the job as a whole could not run.
  pub error:       Option<String>,
  pub created_at:  DateTime<Utc>,
  pub started_at:  Option<DateTime<Utc>>,
  pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
  pub fn is_active(&self) -> bool { !self.status.is_terminal() }

  pub fn mark_running(&mut self) {
    self.status = JobStatus::Running;
    self.started_at = Some(Utc::now());
  }

  pub fn finish(&mut self, status: JobStatus) {
    self.status = status;
    self.finished_at = Some(Utc::now());
  }
}

/// Input to [`crate::store::SyncStore::create_job`].
#[derive(Debug, Clone)]
pub struct NewJob {
  pub kind:       JobKind,
  pub actor:      String,
  pub target_ids: Vec<String>,
}
