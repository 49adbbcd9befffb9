//! Optimistic read-modify-write of statements.
//!
//! Every change goes through the row-version compare-and-set in
//! [`SyncStore::update_statement`]; a lost race re-reads and recomputes.

use grcsync_core::{
  entity::{Statement, SyncStatus},
  remote::RemoteStatement,
  store::SyncStore,
  sync::{StatementState, merge_remote},
};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};

const CAS_ATTEMPTS: usize = 5;

/// Re-derive a statement's state with `f` and store it, retrying when a
/// concurrent writer bumps the version first. Returns the statement as it
/// was before and after the change.
pub async fn apply<S, F>(store: &S, id: Uuid, mut f: F) -> Result<(Statement, Statement)>
where
  S: SyncStore,
  F: FnMut(&Statement) -> Result<StatementState>,
{
  for _ in 0..CAS_ATTEMPTS {
    let current = store
      .get_statement(id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::StatementNotFound(id))?;

    let next = f(&current)?;
    if next == current.state() {
      return Ok((current.clone(), current));
    }
    if let Some(updated) = store
      .update_statement(id, current.version, next)
      .await
      .map_err(Error::store)?
    {
      return Ok((current, updated));
    }
  }
  Err(Error::StatementBusy(id))
}

/// Outcome of merging one pulled statement.
pub struct Merged {
  pub statement: Statement,
  /// The merge turned a non-conflicted statement into a conflicted one.
  pub became_conflict: bool,
}

/// Fold a pulled remote statement into the control's local statement,
/// creating it on first sight. When the remote now holds the control's
/// statement under a different record, the local row follows it.
pub async fn merge_pulled<S: SyncStore>(
  store: &S,
  control_id: Uuid,
  remote: &RemoteStatement,
) -> Result<Merged> {
  for _ in 0..CAS_ATTEMPTS {
    let existing = store
      .get_statement_for_control(control_id)
      .await
      .map_err(Error::store)?;

    let Some(current) = existing else {
      let state = StatementState::from_remote(remote.content.clone(), remote.updated_at);
      if let Some(statement) = store
        .insert_statement(control_id, remote.external_id.clone(), state)
        .await
        .map_err(Error::store)?
      {
        return Ok(Merged { statement, became_conflict: false });
      }
      continue;
    };

    let before = current.sync_status;
    let next = merge_remote(Some(&current.state()), &remote.content, remote.updated_at);
    let became_conflict =
      before != SyncStatus::Conflict && next.sync_status == SyncStatus::Conflict;
    let relinked = current.external_id != remote.external_id;
    if next == current.state() && !relinked {
      return Ok(Merged { statement: current, became_conflict });
    }
    let written = if relinked {
      info!(
        statement_id = %current.statement_id,
        from = %current.external_id,
        to = %remote.external_id,
        "remote statement record replaced",
      );
      store
        .relink_statement(current.statement_id, current.version, remote.external_id.clone(), next)
        .await
    } else {
      store
        .update_statement(current.statement_id, current.version, next)
        .await
    };
    if let Some(statement) = written.map_err(Error::store)? {
      return Ok(Merged { statement, became_conflict });
    }
  }
  Err(Error::StatementBusy(control_id))
}
