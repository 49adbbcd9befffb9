//! Conflict detection and resolution.

use grcsync_core::{
  audit::{AuditEventType, AuditStatus, EntityType, NewAuditEvent, RequestContext},
  entity::{Statement, SyncStatus},
  job::ErrorCategory,
  remote::{GrcSource, SourceError},
  store::{AuditStore, SyncStore},
  sync::{ConflictReport, ConflictResolution, Resolution},
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::{
  engine::SyncEngine,
  error::{Error, Result},
  statements,
};

fn strategy_name(resolution: &Resolution) -> &'static str {
  match resolution {
    Resolution::KeepLocal => "keep_local",
    Resolution::KeepRemote => "keep_remote",
    Resolution::Merge { .. } => "merge",
  }
}

pub(crate) fn conflict_event(statement: &Statement) -> NewAuditEvent {
  NewAuditEvent::new(
    AuditEventType::ConflictDetected,
    EntityType::Statement,
    statement.statement_id.to_string(),
    AuditStatus::Conflict,
  )
  .with_details(json!({
    "external_id": statement.external_id,
    "remote_updated_at": statement.remote_updated_at,
    "local_baseline_at": statement.local_baseline_at,
  }))
}

fn check_failed_event(statement: &Statement, err: &SourceError) -> NewAuditEvent {
  NewAuditEvent::new(
    AuditEventType::ConflictDetected,
    EntityType::Statement,
    statement.statement_id.to_string(),
    AuditStatus::Failure,
  )
  .with_details(json!({
    "external_id": statement.external_id,
    "category": ErrorCategory::from(err),
    "message": err.to_string(),
  }))
}

impl<S, R> SyncEngine<S, R>
where
  S: SyncStore + AuditStore + 'static,
  R: GrcSource + 'static,
{
  /// Compare each statement with its current remote copy.
  ///
  /// The observed remote state is stored through the merge rule, so a
  /// statement found to be in conflict stays `conflict` until resolved. A
  /// statement whose remote copy cannot be fetched gets a report carrying the
  /// error and a failed `conflict_detected` audit event; the rest of the batch
  /// is still checked.
  pub async fn check_conflicts(
    &self,
    statement_ids: &[Uuid],
    ctx: &RequestContext,
  ) -> Result<Vec<ConflictReport>> {
    if statement_ids.is_empty() {
      return Err(Error::EmptyRequest("statements"));
    }
    let cancel = CancellationToken::new();
    let store = &*self.inner.store;

    let mut reports = Vec::with_capacity(statement_ids.len());
    for &id in statement_ids {
      let statement = store
        .get_statement(id)
        .await
        .map_err(Error::store)?
        .ok_or(Error::StatementNotFound(id))?;
      let remote = match self.inner.source.fetch_statement(&statement.external_id, &cancel).await {
        Ok(remote) => remote,
        Err(e) => {
          warn!(statement_id = %id, error = %e, "conflict check could not fetch the remote copy");
          self.inner.audit.record(ctx, check_failed_event(&statement, &e)).await;
          reports.push(ConflictReport {
            error: Some(e.to_string()),
            ..ConflictReport::of(&statement)
          });
          continue;
        }
      };

      let (before, after) = statements::apply(store, id, |s| {
        Ok(s.state().with_remote(remote.content.clone(), remote.updated_at))
      })
      .await?;

      if after.sync_status == SyncStatus::Conflict && before.sync_status != SyncStatus::Conflict {
        self.inner.audit.record(ctx, conflict_event(&after)).await;
      }
      reports.push(ConflictReport::of(&after));
    }
    Ok(reports)
  }

  /// Apply operator resolutions without pushing.
  pub async fn resolve_conflicts(
    &self,
    resolutions: &[ConflictResolution],
    ctx: &RequestContext,
  ) -> Result<Vec<Statement>> {
    let mut resolved = Vec::with_capacity(resolutions.len());
    for r in resolutions {
      let (before, after) = statements::apply(&*self.inner.store, r.statement_id, |s| {
        Ok(s.state().resolve(&r.resolution))
      })
      .await?;

      self
        .inner
        .audit
        .record(
          ctx,
          NewAuditEvent::new(
            AuditEventType::ConflictResolved,
            EntityType::Statement,
            r.statement_id.to_string(),
            AuditStatus::Success,
          )
          .with_details(json!({
            "strategy": strategy_name(&r.resolution),
            "previous_status": before.sync_status,
            "sync_status": after.sync_status,
          })),
        )
        .await;
      resolved.push(after);
    }
    Ok(resolved)
  }
}
