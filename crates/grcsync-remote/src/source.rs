//! [`GrcSource`] for [`GrcClient`].

use grcsync_core::remote::{
  FetchResult, GrcSource, OnPage, PageProgress, RejectedRecord, RemoteControl, RemoteStatement,
  RemoteSystem, SourceError, UpdateReceipt,
};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::{
  client::{GrcClient, PageQuery},
  mapping::{Row, map_control, map_statement, map_system, receipt_timestamp},
};

fn rejected_to_error(reject: RejectedRecord) -> SourceError {
  SourceError::invalid(reject.reason)
}

impl GrcClient {
  /// Rows whose `field` references `parent`, in a stable order so that
  /// offsets stay meaningful across pages.
  fn children_query(&self, field: &str, parent: &str, fields: Vec<String>) -> PageQuery {
    PageQuery {
      query: Some(format!("{field}={parent}^ORDERBY{}", self.schema.id_field)),
      fields,
    }
  }
}

impl GrcSource for GrcClient {
  #[instrument(skip(self, cancel))]
  async fn fetch_system<'a>(
    &'a self,
    external_id: &'a str,
    cancel: &'a CancellationToken,
  ) -> Result<RemoteSystem, SourceError> {
    let row: Row = self
      .fetch_record(
        &self.schema.systems_table,
        external_id,
        &self.schema.system_fields(),
        cancel,
      )
      .await?;
    map_system(&self.schema, &row).map_err(rejected_to_error)
  }

  #[instrument(skip(self, cancel, on_page))]
  async fn fetch_controls<'a>(
    &'a self,
    system_external_id: &'a str,
    cancel: &'a CancellationToken,
    on_page: OnPage<'a>,
  ) -> FetchResult<RemoteControl> {
    let query = self.children_query(
      &self.schema.control_system_field,
      system_external_id,
      self.schema.control_fields(),
    );
    let result: FetchResult<Row> = self
      .fetch_all_pages(&self.schema.controls_table, &query, cancel, on_page)
      .await;
    let result = result.try_map(|row| map_control(&self.schema, &row));
    info!(
      controls = result.records.len(),
      rejected = result.rejected.len(),
      pages = result.pages_fetched,
      "fetched controls"
    );
    result
  }

  #[instrument(skip(self, cancel))]
  async fn fetch_statements<'a>(
    &'a self,
    control_external_id: &'a str,
    cancel: &'a CancellationToken,
  ) -> FetchResult<RemoteStatement> {
    let query = self.children_query(
      &self.schema.statement_control_field,
      control_external_id,
      self.schema.statement_fields(),
    );
    let mut keep_going = |_: &PageProgress| true;
    let result: FetchResult<Row> = self
      .fetch_all_pages(&self.schema.statements_table, &query, cancel, &mut keep_going)
      .await;
    result.try_map(|row| map_statement(&self.schema, &row))
  }

  #[instrument(skip(self, cancel))]
  async fn fetch_statement<'a>(
    &'a self,
    external_id: &'a str,
    cancel: &'a CancellationToken,
  ) -> Result<RemoteStatement, SourceError> {
    let row: Row = self
      .fetch_record(
        &self.schema.statements_table,
        external_id,
        &self.schema.statement_fields(),
        cancel,
      )
      .await?;
    map_statement(&self.schema, &row).map_err(rejected_to_error)
  }

  #[instrument(skip(self, content, cancel))]
  async fn update_statement<'a>(
    &'a self,
    external_id: &'a str,
    content: &'a str,
    cancel: &'a CancellationToken,
  ) -> Result<UpdateReceipt, SourceError> {
    let mut body = Map::new();
    body.insert(
      self.schema.statement_content_field.clone(),
      Value::String(content.to_owned()),
    );
    let row: Row = self
      .update_record(
        &self.schema.statements_table,
        external_id,
        &Value::Object(body),
        cancel,
      )
      .await?;

    Ok(UpdateReceipt {
      external_id: row
        .get(&self.schema.id_field)
        .and_then(Value::as_str)
        .map_or_else(|| external_id.to_owned(), str::to_owned),
      updated_at:  receipt_timestamp(&self.schema, &row),
    })
  }
}
