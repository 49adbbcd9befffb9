//! Error type for `grcsync-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] grcsync_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("control not found: {0}")]
  ControlNotFound(uuid::Uuid),

  #[error("system not found: {0}")]
  SystemNotFound(uuid::Uuid),

  #[error("job not found: {0}")]
  JobNotFound(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
