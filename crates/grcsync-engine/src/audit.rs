//! The audit recorder: enrich, append, query, export.

use std::sync::Arc;

use grcsync_core::{
  audit::{AuditFilter, AuditPage, NewAuditEvent, Page, RequestContext},
  store::AuditStore,
};
use serde_json::Value;
use tracing::warn;

use crate::{
  config::AuditConfig,
  error::{Error, Result},
  export::{ExportFormat, render_csv, render_jsonl},
};

pub struct AuditLog<A> {
  store:  Arc<A>,
  config: AuditConfig,
}

impl<A> Clone for AuditLog<A> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), config: self.config.clone() }
  }
}

/// Stamp the request id into the event details.
fn with_request_id(details: Value, request_id: &str) -> Value {
  match details {
    Value::Object(mut map) => {
      map.insert("request_id".into(), Value::String(request_id.to_owned()));
      Value::Object(map)
    }
    Value::Null => serde_json::json!({ "request_id": request_id }),
    other => serde_json::json!({ "request_id": request_id, "value": other }),
  }
}

impl<A: AuditStore> AuditLog<A> {
  pub fn new(store: Arc<A>, config: AuditConfig) -> Self { Self { store, config } }

  pub fn config(&self) -> &AuditConfig { &self.config }

  /// Append an event attributed to `ctx`. A failed write is logged and
  /// swallowed; auditing never fails the operation being audited.
  pub async fn record(&self, ctx: &RequestContext, mut event: NewAuditEvent) {
    event.actor = ctx.actor.clone();
    if let Some(request_id) = &ctx.request_id {
      event.details = with_request_id(event.details, request_id);
    }

    let (event_type, entity_id) = (event.event_type, event.entity_id.clone());
    if let Err(e) = self.store.append_event(event).await {
      warn!(%event_type, %entity_id, error = %e, "failed to write audit event");
    }
  }

  /// One page of matching events, newest first. `limit` defaults to the
  /// configured page size and is clamped to the maximum.
  pub async fn query(
    &self,
    filter: &AuditFilter,
    limit: Option<usize>,
    offset: usize,
  ) -> Result<AuditPage> {
    let limit = limit
      .unwrap_or(self.config.default_page_size)
      .clamp(1, self.config.max_page_size.max(1));
    self
      .store
      .query_events(filter, Page::new(limit, offset))
      .await
      .map_err(Error::store)
  }

  /// Every matching event, newest first, up to `max_export_rows`.
  pub async fn export(&self, filter: &AuditFilter, format: ExportFormat) -> Result<String> {
    let events = self
      .store
      .export_events(filter, self.config.max_export_rows)
      .await
      .map_err(Error::store)?;
    if events.len() == self.config.max_export_rows {
      warn!(rows = events.len(), "audit export truncated at the row cap");
    }
    Ok(match format {
      ExportFormat::Csv => render_csv(&events),
      ExportFormat::Jsonl => render_jsonl(&events)?,
    })
  }
}
