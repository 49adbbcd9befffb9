//! Connection and schema settings, deserialised from the `[remote]` and
//! `[schema]` sections of the server configuration.

use std::time::Duration;

use serde::Deserialize;

/// How to reach the GRC system and how hard to try.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
  pub base_url:                 String,
  pub username:                 Option<String>,
  pub password:                 Option<String>,
  /// Used instead of basic auth when set.
  pub bearer_token:             Option<String>,
  pub page_size:                u32,
  pub request_timeout_secs:     u64,
  /// Attempts per request for transient failures, including the first.
  pub max_attempts:             u32,
  pub initial_backoff_ms:       u64,
  pub max_backoff_ms:           u64,
  /// Wait applied to a 429 without a usable `Retry-After` header.
  pub default_retry_after_secs: u64,
  /// Rate-limit waits allowed per request before giving up.
  pub max_rate_limit_waits:     u32,
  /// Ceiling on the total time one request may spend waiting between
  /// attempts, across backoff and rate-limit waits.
  pub max_retry_elapsed_secs:   u64,
  pub total_count_header:       String,
}

impl Default for SourceConfig {
  fn default() -> Self {
    Self {
      base_url:                 "http://localhost:8080".into(),
      username:                 None,
      password:                 None,
      bearer_token:             None,
      page_size:                100,
      request_timeout_secs:     30,
      max_attempts:             4,
      initial_backoff_ms:       500,
      max_backoff_ms:           30_000,
      default_retry_after_secs: 60,
      max_rate_limit_waits:     10,
      max_retry_elapsed_secs:   300,
      total_count_header:       "X-Total-Count".into(),
    }
  }
}

impl SourceConfig {
  pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }
}

/// Table and field names of the remote's generic tabular API.
///
/// Defaults follow the common `sys_id` / `sys_updated_on` conventions; any
/// deployment-specific naming is configured here rather than in code.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteSchema {
  /// Path prefix in front of `/{table}`.
  pub table_path:               String,
  pub systems_table:            String,
  pub controls_table:           String,
  pub statements_table:         String,
  pub id_field:                 String,
  pub updated_field:            String,
  pub system_name_field:        String,
  pub system_description_field: String,
  /// Reference from a control row to its system.
  pub control_system_field:     String,
  pub control_number_field:     String,
  pub control_title_field:      String,
  pub control_family_field:     String,
  pub control_baseline_field:   String,
  /// Reference from a statement row to its control.
  pub statement_control_field:  String,
  pub statement_content_field:  String,
}

impl Default for RemoteSchema {
  fn default() -> Self {
    Self {
      table_path:               "/api/now/table".into(),
      systems_table:            "grc_system".into(),
      controls_table:           "grc_control".into(),
      statements_table:         "grc_control_statement".into(),
      id_field:                 "sys_id".into(),
      updated_field:            "sys_updated_on".into(),
      system_name_field:        "name".into(),
      system_description_field: "description".into(),
      control_system_field:     "system".into(),
      control_number_field:     "number".into(),
      control_title_field:      "name".into(),
      control_family_field:     "family".into(),
      control_baseline_field:   "baseline".into(),
      statement_control_field:  "control".into(),
      statement_content_field:  "statement".into(),
    }
  }
}

impl RemoteSchema {
  pub fn system_fields(&self) -> Vec<String> {
    vec![
      self.id_field.clone(),
      self.updated_field.clone(),
      self.system_name_field.clone(),
      self.system_description_field.clone(),
    ]
  }

  pub fn control_fields(&self) -> Vec<String> {
    vec![
      self.id_field.clone(),
      self.updated_field.clone(),
      self.control_system_field.clone(),
      self.control_number_field.clone(),
      self.control_title_field.clone(),
      self.control_family_field.clone(),
      self.control_baseline_field.clone(),
    ]
  }

  pub fn statement_fields(&self) -> Vec<String> {
    vec![
      self.id_field.clone(),
      self.updated_field.clone(),
      self.statement_control_field.clone(),
      self.statement_content_field.clone(),
    ]
  }
}
