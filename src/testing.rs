//! In-memory fakes for the model and store seams. Test builds only.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{QuestionRecord, RowId, StoredRow};
use crate::model::{CompletionRequest, ModelClient, ModelError};
use crate::store::{QuestionStore, Select, StoreError};

/// One scripted model outcome.
#[derive(Clone, Debug)]
pub enum Reply {
  Text(String),
  RateLimited,
  Status(u16),
}

impl Reply {
  pub fn text(s: impl Into<String>) -> Self {
    Reply::Text(s.into())
  }
}

/// Replays replies in order; an exhausted script answers HTTP 500.
#[derive(Default)]
pub struct ScriptedModel {
  replies: Mutex<VecDeque<Reply>>,
  seen: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
  pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
    Self { replies: Mutex::new(replies.into_iter().collect()), seen: Mutex::default() }
  }

  pub fn calls(&self) -> usize {
    self.seen.lock().unwrap().len()
  }

  pub fn requests(&self) -> Vec<CompletionRequest> {
    self.seen.lock().unwrap().clone()
  }
}

#[async_trait]
impl ModelClient for ScriptedModel {
  async fn complete(&self, req: &CompletionRequest) -> Result<String, ModelError> {
    self.seen.lock().unwrap().push(req.clone());
    match self.replies.lock().unwrap().pop_front() {
      Some(Reply::Text(s)) => Ok(s),
      Some(Reply::RateLimited) => Err(ModelError::RateLimited { retry_after: None }),
      Some(Reply::Status(status)) => Err(ModelError::Status { status, message: "scripted".into() }),
      None => Err(ModelError::Status { status: 500, message: "script exhausted".into() }),
    }
  }
}

/// Table held as JSON rows; ids are assigned on insert like a serial column.
#[derive(Default)]
pub struct MemoryStore {
  rows: Mutex<Vec<Value>>,
  updates: Mutex<Vec<(RowId, Value)>>,
  selects: Mutex<usize>,
  fail_inserts: bool,
  fail_selects: bool,
  /// Server-side row cap applied to every select, like PostgREST `max-rows`.
  max_rows: Option<usize>,
  ignore_offset: bool,
}

impl MemoryStore {
  /// Every insert answers a constraint violation.
  pub fn failing_inserts() -> Self {
    Self { fail_inserts: true, ..Self::default() }
  }

  /// Every select answers 503.
  pub fn failing_selects() -> Self {
    Self { fail_selects: true, ..Self::default() }
  }

  pub fn with_max_rows(max_rows: usize) -> Self {
    Self { max_rows: Some(max_rows), ..Self::default() }
  }

  /// Every select starts from the first row regardless of `offset`.
  pub fn ignoring_offset() -> Self {
    Self { ignore_offset: true, ..Self::default() }
  }

  pub fn push_row(&self, row: Value) {
    self.rows.lock().unwrap().push(row);
  }

  pub fn rows(&self) -> Vec<Value> {
    self.rows.lock().unwrap().clone()
  }

  pub fn updates(&self) -> Vec<(RowId, Value)> {
    self.updates.lock().unwrap().clone()
  }

  pub fn select_calls(&self) -> usize {
    *self.selects.lock().unwrap()
  }
}

fn row_id(row: &Value) -> Option<RowId> {
  serde_json::from_value(row.get("id")?.clone()).ok()
}

#[async_trait]
impl QuestionStore for MemoryStore {
  async fn select(&self, query: &Select) -> Result<Vec<StoredRow>, StoreError> {
    *self.selects.lock().unwrap() += 1;
    if self.fail_selects {
      return Err(StoreError::Status { status: 503, message: "unavailable".into() });
    }
    let rows = self.rows.lock().unwrap();
    let matching = rows
      .iter()
      .filter(|r| match &query.eq {
        Some((col, val)) => r.get(*col).and_then(Value::as_str) == Some(val.as_str()),
        None => true,
      })
      .skip(if self.ignore_offset { 0 } else { query.offset.unwrap_or(0) })
      .take(query.limit.unwrap_or(usize::MAX).min(self.max_rows.unwrap_or(usize::MAX)))
      .map(|r| serde_json::from_value(r.clone()).map_err(|e| StoreError::Decode(e.to_string())))
      .collect();
    matching
  }

  async fn insert(&self, record: &QuestionRecord) -> Result<(), StoreError> {
    if self.fail_inserts {
      return Err(StoreError::Status { status: 409, message: "constraint violation".into() });
    }
    let mut rows = self.rows.lock().unwrap();
    let mut v = serde_json::to_value(record).map_err(|e| StoreError::Decode(e.to_string()))?;
    v["id"] = Value::from(rows.len() as i64 + 1);
    rows.push(v);
    Ok(())
  }

  async fn update(&self, id: &RowId, fields: &Value) -> Result<(), StoreError> {
    self.updates.lock().unwrap().push((id.clone(), fields.clone()));
    let mut rows = self.rows.lock().unwrap();
    let Some(row) = rows.iter_mut().find(|r| row_id(r).as_ref() == Some(id)) else {
      return Err(StoreError::Status { status: 404, message: format!("no row {id}") });
    };
    if let (Some(dst), Some(src)) = (row.as_object_mut(), fields.as_object()) {
      for (k, v) in src {
        dst.insert(k.clone(), v.clone());
      }
    }
    Ok(())
  }
}
