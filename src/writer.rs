//! Writer: best-effort duplicate suppression, then insert.
//!
//! The duplicate check is exact byte equality on item text. Paraphrases are
//! not detected, and two concurrent runs can still race past the check.

use std::sync::Arc;

use tracing::{error, info, instrument};

use crate::domain::QuestionRecord;
use crate::store::{find_by_text, QuestionStore};
use crate::util::trunc_for_log;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
  Inserted,
  Duplicate,
  /// Lookup or insert failed; logged and skipped.
  Failed,
}

pub struct Writer {
  store: Arc<dyn QuestionStore>,
}

impl Writer {
  pub fn new(store: Arc<dyn QuestionStore>) -> Self {
    Self { store }
  }

  #[instrument(level = "debug", target = "store", skip_all, fields(sub_category = record.sub_category.as_str(), difficulty = record.difficulty.as_str()))]
  pub async fn write(&self, record: &QuestionRecord) -> WriteOutcome {
    match find_by_text(self.store.as_ref(), &record.item_text).await {
      Ok(Some(id)) => {
        info!(target: "harvester", %id, "Duplicate item text already stored; skipping");
        return WriteOutcome::Duplicate;
      }
      Ok(None) => {}
      Err(e) => {
        error!(target: "harvester", error = %e, "Duplicate lookup failed; skipping");
        return WriteOutcome::Failed;
      }
    }

    match self.store.insert(record).await {
      Ok(()) => {
        info!(target: "harvester", preview = %trunc_for_log(&record.item_text, 60), "Inserted");
        WriteOutcome::Inserted
      }
      Err(e) => {
        error!(target: "harvester", error = %e, "Insert failed");
        WriteOutcome::Failed
      }
    }
  }
}
