//! Question store access.
//!
//! The store is a row-oriented table behind a PostgREST-style REST API
//! (Supabase). We only need three verbs: select-with-equality-filter, insert
//! one record, and partial update by id. No transactions.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::StoreConfig;
use crate::domain::{QuestionRecord, RowId, StoredRow};
use crate::util::trunc_for_log;

/// Columns read when counting inventory.
pub const INVENTORY_COLUMNS: &str = "category,sub_category,difficulty,is_variant";
/// Columns read by the repair sweep.
pub const REPAIR_COLUMNS: &str = "id,category,sub_category,difficulty,item_text,source_text";
/// PostgREST's default max rows per response.
pub const PAGE_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store transport error: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("store returned HTTP {status}: {message}")]
  Status { status: u16, message: String },
  #[error("store response could not be decoded: {0}")]
  Decode(String),
}

/// A select with an optional single equality filter.
#[derive(Clone, Debug, Default)]
pub struct Select {
  pub columns: &'static str,
  pub eq: Option<(&'static str, String)>,
  pub order: Option<&'static str>,
  pub limit: Option<usize>,
  pub offset: Option<usize>,
}

#[async_trait]
pub trait QuestionStore: Send + Sync {
  async fn select(&self, query: &Select) -> Result<Vec<StoredRow>, StoreError>;
  /// Insert one record; the store assigns its identifier.
  async fn insert(&self, record: &QuestionRecord) -> Result<(), StoreError>;
  /// Overwrite only the given fields of one row.
  async fn update(&self, id: &RowId, fields: &serde_json::Value) -> Result<(), StoreError>;
}

/// Upper bound on pages per inventory read, in case a store ignores `offset`.
pub const MAX_INVENTORY_PAGES: usize = 500;

/// Read every row's tags, one page at a time, until an empty page. A server
/// capping rows below `PAGE_SIZE` just means more pages.
pub async fn read_inventory_rows(store: &dyn QuestionStore) -> Result<Vec<StoredRow>, StoreError> {
  let mut rows = Vec::new();
  for _ in 0..MAX_INVENTORY_PAGES {
    let page = store
      .select(&Select {
        columns: INVENTORY_COLUMNS,
        order: Some("id.asc"),
        limit: Some(PAGE_SIZE),
        offset: Some(rows.len()),
        ..Select::default()
      })
      .await?;
    if page.is_empty() {
      return Ok(rows);
    }
    rows.extend(page);
  }
  warn!(target: "store", pages = MAX_INVENTORY_PAGES, rows = rows.len(), "Inventory read hit the page cap; counts may be partial");
  Ok(rows)
}

/// Id of a row whose item text is byte-identical to `item_text`, if any.
pub async fn find_by_text(store: &dyn QuestionStore, item_text: &str) -> Result<Option<RowId>, StoreError> {
  let rows = store
    .select(&Select {
      columns: "id",
      eq: Some(("item_text", item_text.to_string())),
      limit: Some(1),
      ..Select::default()
    })
    .await?;
  // A match with no readable id is still a match.
  Ok(rows.into_iter().next().map(|r| r.id.unwrap_or(RowId::Text(String::new()))))
}

pub struct RestStore {
  client: reqwest::Client,
  api_key: String,
  table_url: String,
}

impl RestStore {
  pub fn new(cfg: &StoreConfig) -> Result<Self, StoreError> {
    let client = reqwest::Client::builder()
      .timeout(std::time::Duration::from_secs(30))
      .build()?;
    Ok(Self {
      client,
      api_key: cfg.api_key.clone(),
      table_url: format!("{}/rest/v1/{}", cfg.url, cfg.table),
    })
  }

  fn request(&self, method: reqwest::Method, query: &[(String, String)]) -> reqwest::RequestBuilder {
    self.client.request(method, &self.table_url)
      .query(query)
      .header(USER_AGENT, concat!("question-harvester/", env!("CARGO_PKG_VERSION")))
      .header(CONTENT_TYPE, "application/json")
      .header("apikey", &self.api_key)
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
  }

  async fn check(res: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = res.status();
    if status.is_success() {
      return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    let message = extract_postgrest_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
    Err(StoreError::Status { status: status.as_u16(), message })
  }
}

#[async_trait]
impl QuestionStore for RestStore {
  #[instrument(level = "debug", target = "store", skip(self, query), fields(columns = query.columns, offset = ?query.offset))]
  async fn select(&self, query: &Select) -> Result<Vec<StoredRow>, StoreError> {
    let mut params = vec![("select".to_string(), query.columns.to_string())];
    if let Some((col, val)) = &query.eq {
      params.push((col.to_string(), format!("eq.{val}")));
    }
    if let Some(order) = query.order {
      params.push(("order".into(), order.into()));
    }
    if let Some(limit) = query.limit {
      params.push(("limit".into(), limit.to_string()));
    }
    if let Some(offset) = query.offset {
      params.push(("offset".into(), offset.to_string()));
    }
    let res = Self::check(self.request(reqwest::Method::GET, &params).send().await?).await?;
    let rows: Vec<StoredRow> = res.json().await.map_err(|e| StoreError::Decode(e.to_string()))?;
    debug!(target: "store", rows = rows.len(), "Select complete");
    Ok(rows)
  }

  #[instrument(level = "debug", target = "store", skip_all)]
  async fn insert(&self, record: &QuestionRecord) -> Result<(), StoreError> {
    let req = self.request(reqwest::Method::POST, &[])
      .header("Prefer", HeaderValue::from_static("return=minimal"))
      .json(record);
    Self::check(req.send().await?).await?;
    Ok(())
  }

  #[instrument(level = "debug", target = "store", skip(self, fields), fields(%id))]
  async fn update(&self, id: &RowId, fields: &serde_json::Value) -> Result<(), StoreError> {
    let req = self.request(reqwest::Method::PATCH, &[("id".into(), format!("eq.{id}"))])
      .header("Prefer", HeaderValue::from_static("return=minimal"))
      .json(fields);
    Self::check(req.send().await?).await?;
    Ok(())
  }
}

/// PostgREST errors look like `{"code":"23505","message":"duplicate key ...","details":...}`.
fn extract_postgrest_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct PgError {
    message: String,
    #[serde(default)]
    code: Option<String>,
  }
  let e = serde_json::from_str::<PgError>(body).ok()?;
  Some(match e.code {
    Some(code) => format!("{} ({code})", e.message),
    None => e.message,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::MemoryStore;

  #[test]
  fn postgrest_error_message_is_extracted() {
    let body = r#"{"code":"23505","details":null,"hint":null,"message":"duplicate key value violates unique constraint"}"#;
    assert_eq!(
      extract_postgrest_error(body).as_deref(),
      Some("duplicate key value violates unique constraint (23505)")
    );
    assert_eq!(extract_postgrest_error("<html/>"), None);
  }

  #[tokio::test]
  async fn inventory_read_pages_until_empty_page() {
    let store = MemoryStore::default();
    for i in 0..(PAGE_SIZE + 5) {
      store.push_row(serde_json::json!({
        "id": i, "category": "Math", "sub_category": "Advanced_Math", "difficulty": "Easy", "item_text": format!("q{i}")
      }));
    }
    let rows = read_inventory_rows(&store).await.unwrap();
    assert_eq!(rows.len(), PAGE_SIZE + 5);
    assert_eq!(store.select_calls(), 3);
  }

  #[tokio::test]
  async fn inventory_read_survives_a_low_server_row_cap() {
    let store = MemoryStore::with_max_rows(10);
    for i in 0..25 {
      store.push_row(serde_json::json!({"id": i, "category": "Math", "sub_category": "Geometry_Trigonometry", "difficulty": "Hard"}));
    }
    let rows = read_inventory_rows(&store).await.unwrap();
    assert_eq!(rows.len(), 25);
    assert_eq!(store.select_calls(), 4);
  }

  #[tokio::test]
  async fn inventory_read_is_bounded_when_offset_is_ignored() {
    let store = MemoryStore::ignoring_offset();
    store.push_row(serde_json::json!({"id": 1, "category": "Math", "sub_category": "Advanced_Math", "difficulty": "Easy"}));
    let rows = read_inventory_rows(&store).await.unwrap();
    assert_eq!(rows.len(), MAX_INVENTORY_PAGES);
    assert_eq!(store.select_calls(), MAX_INVENTORY_PAGES);
  }

  #[tokio::test]
  async fn find_by_text_is_exact() {
    let store = MemoryStore::default();
    store.push_row(serde_json::json!({"id": 1, "item_text": "What is x?"}));
    assert_eq!(find_by_text(&store, "What is x?").await.unwrap(), Some(RowId::Int(1)));
    assert_eq!(find_by_text(&store, "What is x? ").await.unwrap(), None);
    assert_eq!(find_by_text(&store, "what is x?").await.unwrap(), None);
  }
}
