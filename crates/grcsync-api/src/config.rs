//! Server configuration, deserialised from `config.toml` layered with
//! `GRCSYNC__*` environment variables.

use std::path::PathBuf;

use grcsync_engine::{AuditConfig, EngineConfig};
use grcsync_remote::{RemoteSchema, SourceConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
  pub remote:     SourceConfig,
  pub schema:     RemoteSchema,
  pub engine:     EngineConfig,
  pub audit:      AuditConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:       "127.0.0.1".into(),
      port:       8750,
      store_path: PathBuf::from("grcsync.db"),
      remote:     SourceConfig::default(),
      schema:     RemoteSchema::default(),
      engine:     EngineConfig::default(),
      audit:      AuditConfig::default(),
    }
  }
}
