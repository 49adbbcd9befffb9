use grcsync_core::{job::JobKind, remote::SourceError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("storage error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error(transparent)]
  Source(#[from] SourceError),

  #[error("a {kind} job is already running for {scope}")]
  JobAlreadyRunning { kind: JobKind, scope: String },

  #[error("statement {0} has an unresolved conflict")]
  StatementHasConflict(Uuid),

  #[error("statement {0} has no local changes to push")]
  StatementNotModified(Uuid),

  #[error("statement not found: {0}")]
  StatementNotFound(Uuid),

  /// Optimistic updates kept losing to other writers.
  #[error("statement {0} is being modified concurrently")]
  StatementBusy(Uuid),

  #[error("job not found: {0}")]
  JobNotFound(Uuid),

  #[error("job {0} has already finished")]
  JobFinished(Uuid),

  #[error("request names no {0}")]
  EmptyRequest(&'static str),

  #[error("export failed: {0}")]
  Export(#[from] serde_json::Error),
}

impl Error {
  pub fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
