//! The synchronisation engine: pull and push orchestration, conflict
//! detection and resolution, the job registry and the audit recorder.
//!
//! [`SyncEngine`] is generic over a store implementing both
//! [`SyncStore`](grcsync_core::store::SyncStore) and
//! [`AuditStore`](grcsync_core::store::AuditStore), and over a
//! [`GrcSource`](grcsync_core::remote::GrcSource). Pulls and pushes run as
//! spawned tasks; callers get the job record back immediately and poll it.

mod audit;
mod config;
mod conflict;
mod engine;
mod error;
mod export;
mod jobs;
mod pull;
mod push;
mod statements;

pub use audit::AuditLog;
pub use config::{AuditConfig, EngineConfig};
pub use engine::SyncEngine;
pub use error::{Error, Result};
pub use export::ExportFormat;

#[cfg(test)]
mod tests;
