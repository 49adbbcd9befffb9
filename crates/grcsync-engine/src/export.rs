//! Bulk audit export renderers.

use grcsync_core::audit::AuditEvent;
use serde::Deserialize;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExportFormat {
  #[default]
  Csv,
  Jsonl,
}

impl ExportFormat {
  pub fn content_type(self) -> &'static str {
    match self {
      Self::Csv => "text/csv; charset=utf-8",
      Self::Jsonl => "application/x-ndjson",
    }
  }

  pub fn file_extension(self) -> &'static str {
    match self {
      Self::Csv => "csv",
      Self::Jsonl => "jsonl",
    }
  }
}

const CSV_HEADER: [&str; 8] = [
  "event_id",
  "created_at",
  "event_type",
  "entity_type",
  "entity_id",
  "actor",
  "status",
  "details",
];

/// Quote a field per RFC 4180 when it contains a separator, quote or line
/// break.
fn csv_field(out: &mut String, value: &str) {
  if value.contains([',', '"', '\n', '\r']) {
    out.push('"');
    out.push_str(&value.replace('"', "\"\""));
    out.push('"');
  } else {
    out.push_str(value);
  }
}

fn csv_record<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
  for (i, field) in fields.into_iter().enumerate() {
    if i > 0 {
      out.push(',');
    }
    csv_field(out, field);
  }
  out.push_str("\r\n");
}

pub fn render_csv(events: &[AuditEvent]) -> String {
  let mut out = String::new();
  csv_record(&mut out, CSV_HEADER);
  for event in events {
    let details = if event.details.is_null() {
      String::new()
    } else {
      event.details.to_string()
    };
    csv_record(&mut out, [
      event.event_id.to_string().as_str(),
      event.created_at.to_rfc3339().as_str(),
      event.event_type.to_string().as_str(),
      event.entity_type.to_string().as_str(),
      event.entity_id.as_str(),
      event.actor.as_str(),
      event.status.to_string().as_str(),
      details.as_str(),
    ]);
  }
  out
}

/// One JSON object per line.
pub fn render_jsonl(events: &[AuditEvent]) -> serde_json::Result<String> {
  let mut out = String::new();
  for event in events {
    out.push_str(&serde_json::to_string(event)?);
    out.push('\n');
  }
  Ok(out)
}
