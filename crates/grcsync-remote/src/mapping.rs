//! Raw table rows → domain records, driven by [`RemoteSchema`].

use chrono::{DateTime, NaiveDateTime, Utc};
use grcsync_core::remote::{RejectedRecord, RemoteControl, RemoteStatement, RemoteSystem};
use serde_json::{Map, Value};

use crate::config::RemoteSchema;

pub type Row = Map<String, Value>;

/// Timestamp layout the table API uses when it does not emit RFC 3339.
const TABLE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

/// Accepts RFC 3339 or the table API's `YYYY-MM-DD HH:MM:SS`, read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
  let raw = raw.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Some(dt.with_timezone(&Utc));
  }
  NaiveDateTime::parse_from_str(raw, TABLE_DATETIME)
    .ok()
    .map(|naive| naive.and_utc())
}

/// A field as a string. Reference fields may come back either as the bare id
/// or as `{ "value": "<id>", "link": ... }`.
fn text(row: &Row, field: &str) -> Option<String> {
  match row.get(field)? {
    Value::String(s) => Some(s.clone()),
    Value::Object(obj) => obj.get("value").and_then(Value::as_str).map(str::to_owned),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

/// Like [`text`], but empty strings count as absent.
fn non_empty(row: &Row, field: &str) -> Option<String> {
  text(row, field).filter(|s| !s.is_empty())
}

struct Mapper<'a> {
  schema: &'a RemoteSchema,
  row:    &'a Row,
}

impl Mapper<'_> {
  fn id(&self) -> Option<String> { non_empty(self.row, &self.schema.id_field) }

  fn reject(&self, reason: impl Into<String>) -> RejectedRecord {
    RejectedRecord { record_id: self.id(), reason: reason.into() }
  }

  fn required(&self, field: &str) -> Result<String, RejectedRecord> {
    non_empty(self.row, field).ok_or_else(|| self.reject(format!("missing field `{field}`")))
  }

  fn updated_at(&self) -> Result<Option<DateTime<Utc>>, RejectedRecord> {
    match non_empty(self.row, &self.schema.updated_field) {
      None => Ok(None),
      Some(raw) => parse_timestamp(&raw)
        .map(Some)
        .ok_or_else(|| self.reject(format!("unparseable timestamp {raw:?}"))),
    }
  }
}

pub fn map_system(schema: &RemoteSchema, row: &Row) -> Result<RemoteSystem, RejectedRecord> {
  let m = Mapper { schema, row };
  Ok(RemoteSystem {
    external_id: m.required(&schema.id_field)?,
    name:        m.required(&schema.system_name_field)?,
    description: non_empty(row, &schema.system_description_field),
    updated_at:  m.updated_at()?,
  })
}

pub fn map_control(schema: &RemoteSchema, row: &Row) -> Result<RemoteControl, RejectedRecord> {
  let m = Mapper { schema, row };
  Ok(RemoteControl {
    external_id:        m.required(&schema.id_field)?,
    system_external_id: m.required(&schema.control_system_field)?,
    control_number:     m.required(&schema.control_number_field)?,
    title:              non_empty(row, &schema.control_title_field).unwrap_or_default(),
    family:             non_empty(row, &schema.control_family_field),
    baseline:           non_empty(row, &schema.control_baseline_field),
    updated_at:         m.updated_at()?,
  })
}

/// Statements must carry a modification time: it drives conflict detection.
pub fn map_statement(schema: &RemoteSchema, row: &Row) -> Result<RemoteStatement, RejectedRecord> {
  let m = Mapper { schema, row };
  let updated_at = m
    .updated_at()?
    .ok_or_else(|| m.reject(format!("missing field `{}`", schema.updated_field)))?;
  Ok(RemoteStatement {
    external_id:         m.required(&schema.id_field)?,
    control_external_id: m.required(&schema.statement_control_field)?,
    content:             text(row, &schema.statement_content_field).unwrap_or_default(),
    updated_at,
  })
}

/// The modification time in a write response, if it has a usable one.
pub fn receipt_timestamp(schema: &RemoteSchema, row: &Row) -> Option<DateTime<Utc>> {
  non_empty(row, &schema.updated_field).and_then(|raw| parse_timestamp(&raw))
}
