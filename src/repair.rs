//! Repair sweep: re-classify stored rows whose tags fall outside the vocabulary.
//!
//! Per row: `broken -> {repaired, failed}`. Each sweep handles at most
//! `batch_size` rows. Rows left over stay broken until a later run reaches
//! them, so the table converges over many runs.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::config::{Prompts, RepairSettings};
use crate::domain::{parse_tag_pair, Difficulty, StoredRow};
use crate::model::{CompletionRequest, ModelClient};
use crate::prompt::repair_prompt;
use crate::store::{QuestionStore, Select, REPAIR_COLUMNS};
use crate::util::strip_code_fences;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RepairReport {
  pub scanned: usize,
  pub broken: usize,
  pub repaired: usize,
  pub failed: usize,
}

#[derive(Debug, Deserialize)]
struct Reclassified {
  #[serde(default, alias = "module")]
  category: Option<String>,
  #[serde(default, alias = "domain")]
  sub_category: Option<String>,
  #[serde(default)]
  difficulty: Option<String>,
}

pub struct RepairSweep {
  store: Arc<dyn QuestionStore>,
  model: Arc<dyn ModelClient>,
  settings: RepairSettings,
  prompts: Prompts,
}

impl RepairSweep {
  pub fn new(store: Arc<dyn QuestionStore>, model: Arc<dyn ModelClient>, settings: RepairSettings, prompts: Prompts) -> Self {
    Self { store, model, settings, prompts }
  }

  #[instrument(level = "info", target = "repair", skip_all, fields(batch_size = self.settings.batch_size))]
  pub async fn run(&self) -> RepairReport {
    let mut report = RepairReport::default();
    let rows = match self
      .store
      .select(&Select {
        columns: REPAIR_COLUMNS,
        order: Some("id.asc"),
        limit: Some(self.settings.scan_limit),
        ..Select::default()
      })
      .await
    {
      Ok(rows) => rows,
      Err(e) => {
        error!(target: "repair", error = %e, "Could not fetch rows for repair");
        return report;
      }
    };
    report.scanned = rows.len();

    let broken: Vec<StoredRow> = rows.into_iter().filter(StoredRow::has_broken_tags).collect();
    report.broken = broken.len();
    if broken.is_empty() {
      info!(target: "repair", scanned = report.scanned, "All rows have valid tags; nothing to fix");
      return report;
    }

    let batch = &broken[..broken.len().min(self.settings.batch_size)];
    info!(target: "repair", broken = report.broken, batch = batch.len(), "Repairing rows with invalid tags");

    for (i, row) in batch.iter().enumerate() {
      if self.repair_row(row).await {
        report.repaired += 1;
      } else {
        report.failed += 1;
      }
      if i + 1 < batch.len() && self.settings.pause_secs > 0.0 {
        tokio::time::sleep(Duration::from_secs_f64(self.settings.pause_secs)).await;
      }
    }

    info!(target: "repair", repaired = report.repaired, failed = report.failed, "Repair sweep complete");
    report
  }

  /// One model call, one update. Returns whether the row was repaired.
  async fn repair_row(&self, row: &StoredRow) -> bool {
    let Some(id) = &row.id else {
      warn!(target: "repair", "Broken row has no id; cannot update");
      return false;
    };
    let text = row.item_text.as_deref().unwrap_or_default();
    if text.trim().is_empty() {
      warn!(target: "repair", %id, "Broken row has no item text to classify");
      return false;
    }

    let req = CompletionRequest {
      prompt: repair_prompt(&self.prompts, text),
      temperature: self.settings.temperature,
      max_tokens: None,
      json: true,
    };
    let raw = match self.model.complete(&req).await {
      Ok(raw) => raw,
      Err(e) => {
        error!(target: "repair", %id, error = %e, rate_limited = e.is_rate_limit(), "Re-classification call failed");
        return false;
      }
    };
    let tags: Reclassified = match serde_json::from_str(strip_code_fences(&raw)) {
      Ok(t) => t,
      Err(e) => {
        error!(target: "repair", %id, error = %e, "Re-classification output was not valid JSON");
        return false;
      }
    };

    let pair = parse_tag_pair(tags.category.as_deref(), tags.sub_category.as_deref());
    let difficulty = tags.difficulty.as_deref().and_then(Difficulty::parse);
    let (Some((category, sub_category)), Some(difficulty)) = (pair, difficulty) else {
      warn!(target: "repair", %id, category = ?tags.category, sub_category = ?tags.sub_category, difficulty = ?tags.difficulty, "Model returned out-of-vocabulary tags");
      return false;
    };

    let mut update = json!({
      "category": category,
      "sub_category": sub_category,
      "difficulty": difficulty,
    });
    if row.source_text.as_deref().map_or(true, |s| s.trim().is_empty()) {
      update["source_text"] = json!(self.settings.backfill_text);
    }

    match self.store.update(id, &update).await {
      Ok(()) => {
        info!(target: "repair", %id, category = category.as_str(), sub_category = sub_category.as_str(), difficulty = difficulty.as_str(), "Repaired");
        true
      }
      Err(e) => {
        error!(target: "repair", %id, error = %e, "Update failed");
        false
      }
    }
  }
}
