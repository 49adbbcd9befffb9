//! Pure synchronisation rules.
//!
//! Nothing in this module performs I/O. The pull orchestrator, the conflict
//! detector and the push orchestrator all funnel statement changes through
//! [`StatementState`] so the conflict invariant is computed in one place:
//!
//! `sync_status == Conflict` iff `is_modified` and the remote timestamp is
//! strictly newer than the local baseline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{Statement, SyncStatus};

/// Classify a statement from its modification flag and timestamps.
pub fn derive_status(
  is_modified: bool,
  remote_updated_at: DateTime<Utc>,
  local_baseline_at: DateTime<Utc>,
) -> SyncStatus {
  match (is_modified, remote_updated_at > local_baseline_at) {
    (false, _) => SyncStatus::Synced,
    (true, false) => SyncStatus::Modified,
    (true, true) => SyncStatus::Conflict,
  }
}

// ─── State ───────────────────────────────────────────────────────────────────

/// The sync-relevant columns of a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementState {
  pub remote_content:    String,
  pub remote_updated_at: DateTime<Utc>,
  pub local_content:     Option<String>,
  pub local_baseline_at: DateTime<Utc>,
  pub is_modified:       bool,
  pub sync_status:       SyncStatus,
}

impl StatementState {
  /// A freshly imported statement with no local edit.
  pub fn from_remote(content: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
    Self {
      remote_content:    content.into(),
      remote_updated_at: updated_at,
      local_content:     None,
      local_baseline_at: updated_at,
      is_modified:       false,
      sync_status:       SyncStatus::Synced,
    }
  }

  fn recompute(mut self) -> Self {
    self.sync_status =
      derive_status(self.is_modified, self.remote_updated_at, self.local_baseline_at);
    self
  }

  /// Apply a local edit. The baseline stays where it is, so an edit made on
  /// top of an already-conflicted statement stays conflicted.
  pub fn with_local_edit(self, content: impl Into<String>) -> Self {
    Self {
      local_content: Some(content.into()),
      is_modified: true,
      ..self
    }
    .recompute()
  }

  /// Fold a freshly observed remote copy into this state.
  ///
  /// Unmodified statements simply adopt the remote copy. Modified statements
  /// keep their local content and baseline; the remote fields are
  /// overwritten and the status becomes `Conflict` when the observed
  /// timestamp is newer than the baseline.
  pub fn with_remote(self, content: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
    if !self.is_modified {
      return Self::from_remote(content, updated_at);
    }
    Self {
      remote_content: content.into(),
      remote_updated_at: updated_at,
      ..self
    }
    .recompute()
  }

  /// Apply an operator's conflict resolution.
  pub fn resolve(self, resolution: &Resolution) -> Self {
    match resolution {
      Resolution::KeepLocal if self.is_modified => Self {
        local_baseline_at: self.remote_updated_at,
        ..self
      }
      .recompute(),
      Resolution::KeepLocal => self,
      Resolution::KeepRemote => {
        Self::from_remote(self.remote_content, self.remote_updated_at)
      }
      Resolution::Merge { content } => Self {
        local_content: Some(content.clone()),
        is_modified: true,
        local_baseline_at: self.remote_updated_at,
        ..self
      }
      .recompute(),
    }
  }

  /// Record a successful push of `pushed` that the remote stamped with
  /// `updated_at`.
  ///
  /// When the local content changed again while the push was in flight, the
  /// newer edit is kept as a modification on top of the pushed baseline.
  pub fn after_push(self, pushed: &str, updated_at: DateTime<Utc>) -> Self {
    if self.local_content.as_deref() == Some(pushed) {
      return Self::from_remote(pushed, updated_at);
    }
    Self {
      remote_content: pushed.to_owned(),
      remote_updated_at: updated_at,
      local_baseline_at: updated_at,
      ..self
    }
    .recompute()
  }
}

/// Merge a fetched remote copy into the (possibly absent) local state.
///
/// This is the pull-time rule: local edits are never discarded, and the
/// conflict flag is recomputed from timestamps alone.
pub fn merge_remote(
  local: Option<&StatementState>,
  remote_content: &str,
  remote_updated_at: DateTime<Utc>,
) -> StatementState {
  match local {
    Some(state) => state.clone().with_remote(remote_content, remote_updated_at),
    None => StatementState::from_remote(remote_content, remote_updated_at),
  }
}

// ─── Conflicts ───────────────────────────────────────────────────────────────

/// How an operator chose to settle a conflicted statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Resolution {
  /// Discard the remote change; the local edit will be pushed.
  KeepLocal,
  /// Discard the local edit; nothing is pushed.
  KeepRemote,
  /// Replace the local edit with caller-merged text, then push it.
  Merge { content: String },
}

impl Resolution {
  /// Whether a statement resolved this way should still be pushed.
  pub fn proceeds_to_push(&self) -> bool { !matches!(self, Self::KeepRemote) }
}

/// A resolution addressed to one statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResolution {
  pub statement_id: Uuid,
  #[serde(flatten)]
  pub resolution:   Resolution,
}

/// Result of comparing one statement with the current remote copy.
///
/// When the remote copy could not be fetched, `error` says why and the other
/// fields describe the statement as last recorded locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictReport {
  pub statement_id:      Uuid,
  pub has_conflict:      bool,
  pub local_content:     Option<String>,
  pub remote_content:    String,
  pub local_baseline:    DateTime<Utc>,
  pub remote_updated_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error:             Option<String>,
}

impl ConflictReport {
  pub fn of(statement: &Statement) -> Self {
    Self {
      statement_id:      statement.statement_id,
      has_conflict:      statement.sync_status == SyncStatus::Conflict,
      local_content:     statement.local_content.clone(),
      remote_content:    statement.remote_content.clone(),
      local_baseline:    statement.local_baseline_at,
      remote_updated_at: statement.remote_updated_at,
      error:             None,
    }
  }
}
