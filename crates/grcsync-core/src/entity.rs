//! Local entities mirrored from the GRC system: systems, controls and
//! implementation statements.
//!
//! Systems and controls are owned by the pull orchestrator. Statements carry
//! two copies of their content (the last-known remote text and an optional
//! local edit) and a derived [`SyncStatus`].

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result, sync::StatementState};

// ─── Discriminants ───────────────────────────────────────────────────────────

/// Parse a snake_case discriminant stored as text (database column, query
/// parameter) into its enum.
pub fn parse_discriminant<T: FromStr>(kind: &'static str, value: &str) -> Result<T> {
  value.parse().map_err(|_| Error::UnknownDiscriminant {
    kind,
    value: value.to_owned(),
  })
}

// ─── System ──────────────────────────────────────────────────────────────────

/// An external compliance scope. Created and updated only by a pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct System {
  pub system_id:         Uuid,
  /// Record id in the GRC system; unique.
  pub external_id:       String,
  pub name:              String,
  pub description:       Option<String>,
  pub remote_updated_at: Option<DateTime<Utc>>,
  pub last_pulled_at:    DateTime<Utc>,
}

// ─── Control ─────────────────────────────────────────────────────────────────

/// A requirement record belonging to a [`System`].
/// Unique per `(system_id, external_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Control {
  pub control_id:        Uuid,
  pub system_id:         Uuid,
  pub external_id:       String,
  /// Catalogue number, e.g. `AC-2(1)`.
  pub control_number:    String,
  pub title:             String,
  /// Control family, e.g. `Access Control`.
  pub family:            Option<String>,
  /// Baseline the control belongs to, e.g. `moderate`.
  pub baseline:          Option<String>,
  pub remote_updated_at: Option<DateTime<Utc>>,
  pub last_pulled_at:    DateTime<Utc>,
}

// ─── Statement ───────────────────────────────────────────────────────────────

/// Where a statement stands relative to its remote copy.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncStatus {
  /// No local edit; local view equals the last-known remote content.
  Synced,
  /// Local edit based on the current remote baseline.
  Modified,
  /// Local edit whose baseline is older than the remote copy.
  Conflict,
}

/// Implementation text for a [`Control`]. Unique per control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
  pub statement_id:      Uuid,
  pub control_id:        Uuid,
  pub external_id:       String,
  pub remote_content:    String,
  /// Last-known remote modification time.
  pub remote_updated_at: DateTime<Utc>,
  pub local_content:     Option<String>,
  /// Remote timestamp the local edit is based on.
  pub local_baseline_at: DateTime<Utc>,
  pub is_modified:       bool,
  pub sync_status:       SyncStatus,
  /// Row version; every write bumps it and compares against it.
  pub version:           i64,
  pub updated_at:        DateTime<Utc>,
}

impl Statement {
  /// The sync-relevant columns, for feeding the pure rules in
  /// [`crate::sync`].
  pub fn state(&self) -> StatementState {
    StatementState {
      remote_content:    self.remote_content.clone(),
      remote_updated_at: self.remote_updated_at,
      local_content:     self.local_content.clone(),
      local_baseline_at: self.local_baseline_at,
      is_modified:       self.is_modified,
      sync_status:       self.sync_status,
    }
  }

  /// The text a reader should see: the local edit if any, else remote.
  pub fn effective_content(&self) -> &str {
    self.local_content.as_deref().unwrap_or(&self.remote_content)
  }
}
