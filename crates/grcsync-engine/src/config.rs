use std::time::Duration;

use serde::Deserialize;

/// Orchestrator tuning, the `[engine]` configuration section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Statements pushed at once.
  pub push_concurrency:       usize,
  /// Budget for one statement's re-check, update and write-back.
  pub push_item_timeout_secs: u64,
  /// Controls whose statements are fetched at once during a pull.
  pub pull_concurrency:       usize,
  /// Job progress is persisted after this many processed items.
  pub progress_every:         usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      push_concurrency:       3,
      push_item_timeout_secs: 120,
      pull_concurrency:       4,
      progress_every:         25,
    }
  }
}

impl EngineConfig {
  pub fn push_item_timeout(&self) -> Duration { Duration::from_secs(self.push_item_timeout_secs) }
}

/// Audit query and export limits, the `[audit]` configuration section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
  pub default_page_size: usize,
  pub max_page_size:     usize,
  pub max_export_rows:   usize,
}

impl Default for AuditConfig {
  fn default() -> Self {
    Self {
      default_page_size: 50,
      max_page_size:     500,
      max_export_rows:   50_000,
    }
  }
}
