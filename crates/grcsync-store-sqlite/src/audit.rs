//! [`AuditStore`] for [`SqliteStore`].
//!
//! Inserts only. Queries compose their `WHERE` clause from whichever
//! [`AuditFilter`] fields are set and bind every value as a parameter.

use chrono::Utc;
use rusqlite::types::Value;
use uuid::Uuid;

use grcsync_core::{
  audit::{AuditEvent, AuditFilter, AuditPage, NewAuditEvent, Page},
  store::AuditStore,
};

use crate::{
  Error, Result,
  encode::{AUDIT_COLUMNS, RawAuditEvent, encode_dt, encode_uuid},
  store::SqliteStore,
};

/// A `WHERE` clause and its positional parameters.
struct Clause {
  sql:    String,
  params: Vec<Value>,
}

fn in_list<T: ToString>(column: &str, values: &[T], clause: &mut Vec<String>, params: &mut Vec<Value>) {
  if values.is_empty() {
    return;
  }
  let placeholders = vec!["?"; values.len()].join(", ");
  clause.push(format!("{column} IN ({placeholders})"));
  params.extend(values.iter().map(|v| Value::Text(v.to_string())));
}

/// Makes `%` and `_` in user text match literally, with `\` as the escape.
fn escape_like(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  for c in text.chars() {
    if matches!(c, '\\' | '%' | '_') {
      out.push('\\');
    }
    out.push(c);
  }
  out
}

fn build_clause(filter: &AuditFilter) -> Clause {
  let mut conds: Vec<String> = Vec::new();
  let mut params: Vec<Value> = Vec::new();

  in_list("event_type", &filter.event_types, &mut conds, &mut params);
  in_list("entity_type", &filter.entity_types, &mut conds, &mut params);
  in_list("status", &filter.statuses, &mut conds, &mut params);

  if let Some(entity_id) = &filter.entity_id {
    conds.push("entity_id = ?".into());
    params.push(Value::Text(entity_id.clone()));
  }
  if let Some(actor) = &filter.actor {
    conds.push("actor = ?".into());
    params.push(Value::Text(actor.clone()));
  }
  if let Some(after) = filter.created_after {
    conds.push("created_at >= ?".into());
    params.push(Value::Text(encode_dt(after)));
  }
  if let Some(before) = filter.created_before {
    conds.push("created_at <= ?".into());
    params.push(Value::Text(encode_dt(before)));
  }
  if let Some(text) = filter.text.as_deref().filter(|t| !t.is_empty()) {
    conds.push(
      "(entity_id LIKE ? ESCAPE '\\' OR actor LIKE ? ESCAPE '\\' OR details LIKE ? ESCAPE '\\')"
        .into(),
    );
    let pattern = format!("%{}%", escape_like(text));
    params.extend(std::iter::repeat_n(Value::Text(pattern), 3));
  }

  let sql = if conds.is_empty() {
    String::new()
  } else {
    format!("WHERE {}", conds.join(" AND "))
  };
  Clause { sql, params }
}

fn to_i64(n: usize) -> i64 { i64::try_from(n).unwrap_or(i64::MAX) }

impl SqliteStore {
  async fn select_events(&self, clause: Clause, limit: usize, offset: usize) -> Result<Vec<AuditEvent>> {
    let raws: Vec<RawAuditEvent> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {AUDIT_COLUMNS} FROM audit_events
           {where_clause}
           ORDER BY created_at DESC, rowid DESC
           LIMIT ? OFFSET ?",
          where_clause = clause.sql,
        );
        let mut params = clause.params;
        params.push(Value::Integer(to_i64(limit)));
        params.push(Value::Integer(to_i64(offset)));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawAuditEvent::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawAuditEvent::into_event).collect()
  }

  async fn count_events(&self, clause: Clause) -> Result<u64> {
    let count: i64 = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT COUNT(*) FROM audit_events {}", clause.sql);
        Ok(conn.query_row(&sql, rusqlite::params_from_iter(clause.params), |r| r.get(0))?)
      })
      .await?;
    Ok(u64::try_from(count).unwrap_or_default())
  }
}

impl AuditStore for SqliteStore {
  type Error = Error;

  async fn append_event(&self, event: NewAuditEvent) -> Result<AuditEvent> {
    let event = AuditEvent {
      event_id:    Uuid::new_v4(),
      event_type:  event.event_type,
      entity_type: event.entity_type,
      entity_id:   event.entity_id,
      actor:       event.actor,
      status:      event.status,
      details:     event.details,
      created_at:  Utc::now(),
    };

    let id_str      = encode_uuid(event.event_id);
    let type_str    = event.event_type.to_string();
    let entity_str  = event.entity_type.to_string();
    let entity_id   = event.entity_id.clone();
    let actor       = event.actor.clone();
    let status_str  = event.status.to_string();
    let details_str = serde_json::to_string(&event.details)?;
    let created_str = encode_dt(event.created_at);

    self
      .conn
      .call(move |conn| {
        let sql = format!(
          "INSERT INTO audit_events ({AUDIT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        );
        conn.execute(
          &sql,
          rusqlite::params![
            id_str,
            type_str,
            entity_str,
            entity_id,
            actor,
            status_str,
            details_str,
            created_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(event)
  }

  async fn query_events(&self, filter: &AuditFilter, page: Page) -> Result<AuditPage> {
    let total_count = self.count_events(build_clause(filter)).await?;
    let events = self
      .select_events(build_clause(filter), page.limit, page.offset)
      .await?;
    Ok(AuditPage { events, total_count })
  }

  async fn export_events(&self, filter: &AuditFilter, max_rows: usize) -> Result<Vec<AuditEvent>> {
    self.select_events(build_clause(filter), max_rows, 0).await
  }
}
