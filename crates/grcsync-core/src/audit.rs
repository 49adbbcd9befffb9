//! Audit events: the append-only record of every sync-relevant action.
//!
//! Events are written once and never updated or deleted. The store contract
//! ([`crate::store::AuditStore`]) has no mutation path beyond insertion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

// ─── Discriminants ───────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditEventType {
  Pull,
  Push,
  ConflictDetected,
  ConflictResolved,
  StatementEdited,
  JobCancelled,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityType {
  System,
  Control,
  Statement,
  PullJob,
  PushJob,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditStatus {
  Started,
  Success,
  Partial,
  Failure,
  Conflict,
  Cancelled,
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// A persisted audit event. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
  pub event_id:    Uuid,
  pub event_type:  AuditEventType,
  pub entity_type: EntityType,
  pub entity_id:   String,
  pub actor:       String,
  pub status:      AuditStatus,
  pub details:     serde_json::Value,
  /// Store-assigned; never changes.
  pub created_at:  DateTime<Utc>,
}

/// Input to [`crate::store::AuditStore::append_event`].
/// `event_id` and `created_at` are always assigned by the store.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
  pub event_type:  AuditEventType,
  pub entity_type: EntityType,
  pub entity_id:   String,
  pub actor:       String,
  pub status:      AuditStatus,
  pub details:     serde_json::Value,
}

impl NewAuditEvent {
  /// An event with no details and the `system` actor; the audit recorder
  /// overwrites the actor from the request context.
  pub fn new(
    event_type: AuditEventType,
    entity_type: EntityType,
    entity_id: impl Into<String>,
    status: AuditStatus,
  ) -> Self {
    Self {
      event_type,
      entity_type,
      entity_id: entity_id.into(),
      actor: RequestContext::SYSTEM_ACTOR.to_owned(),
      status,
      details: serde_json::Value::Null,
    }
  }

  pub fn with_details(mut self, details: serde_json::Value) -> Self {
    self.details = details;
    self
  }
}

/// Who triggered an operation, carried from the HTTP layer into jobs and
/// audit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
  pub actor:      String,
  pub request_id: Option<String>,
}

impl RequestContext {
  pub const SYSTEM_ACTOR: &'static str = "system";

  pub fn new(actor: impl Into<String>) -> Self {
    Self { actor: actor.into(), request_id: None }
  }

  pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
    self.request_id = Some(request_id.into());
    self
  }
}

impl Default for RequestContext {
  fn default() -> Self { Self::new(Self::SYSTEM_ACTOR) }
}

// ─── Queries ─────────────────────────────────────────────────────────────────

/// Filters for [`crate::store::AuditStore::query_events`]. Empty fields do
/// not constrain; populated fields are AND-ed together. Lists match any of
/// their members.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
  pub event_types:    Vec<AuditEventType>,
  pub entity_types:   Vec<EntityType>,
  pub entity_id:      Option<String>,
  pub actor:          Option<String>,
  pub statuses:       Vec<AuditStatus>,
  pub created_after:  Option<DateTime<Utc>>,
  pub created_before: Option<DateTime<Utc>>,
  /// Substring match over entity id, actor and serialised details.
  pub text:           Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
  pub limit:  usize,
  pub offset: usize,
}

impl Page {
  pub fn new(limit: usize, offset: usize) -> Self { Self { limit, offset } }
}

/// One page of events, newest first, plus the number of matches overall.
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
  pub events:      Vec<AuditEvent>,
  pub total_count: u64,
}
