//! Question Harvester · scheduled SAT question generation job
//!
//! - Reads per-bucket inventory from a PostgREST table and fills the emptiest
//!   buckets first
//! - Generates items through an OpenAI-compatible chat endpoint
//! - Validates, de-duplicates, inserts, then runs a bounded repair sweep over
//!   rows with invalid tags
//!
//! One invocation is one run; a scheduler (cron, CI) triggers it.
//!
//! Important env variables:
//!   STORE_URL / STORE_API_KEY : PostgREST base URL and key (required)
//!   STORE_TABLE               : default "question_bank"
//!   MODEL_API_KEY             : chat-completions key (required)
//!   MODEL_BASE_URL            : default "https://api.groq.com/openai/v1"
//!   MODEL_NAME                : default "llama-3.3-70b-versatile"
//!   MODEL_TIMEOUT_SECS        : default 30
//!   QUESTIONS_PER_RUN         : default 25
//!   TARGET_PER_BUCKET         : default 500
//!   REPAIR_BATCH_SIZE         : default 10
//!   REPAIR_SCAN_LIMIT         : default 1000
//!   HARVESTER_MODE            : "harvest" (default) or "repair"
//!   HARVESTER_CONFIG_PATH     : optional TOML overrides (settings + prompts)
//!   LOG_LEVEL / LOG_FORMAT    : tracing filter; "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod queue;
mod prompt;
mod model;
mod openai;
mod generate;
mod store;
mod validate;
mod writer;
mod repair;
mod inspiration;
mod pipeline;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::{Config, RunMode};
use crate::model::ModelClient;
use crate::openai::OpenAI;
use crate::pipeline::Harvester;
use crate::repair::RepairSweep;
use crate::store::{QuestionStore, RestStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let cfg = match Config::from_env() {
    Ok(cfg) => cfg,
    Err(e) => {
      error!(target: "harvester", error = %e, "Invalid configuration; aborting run");
      return Err(e.into());
    }
  };

  let model: Arc<dyn ModelClient> = Arc::new(OpenAI::new(&cfg.model)?);
  let store: Arc<dyn QuestionStore> = Arc::new(RestStore::new(&cfg.store)?);

  let span = info_span!("run", run_id = %Uuid::new_v4(), mode = ?cfg.mode);
  async move {
    info!(target: "harvester", model = %cfg.model.model, table = %cfg.store.table, "Starting run");

    if cfg.mode == RunMode::Harvest {
      let inspiration = inspiration::fetch(&cfg.inspiration).await;
      let harvester = Harvester::new(
        store.clone(),
        model.clone(),
        cfg.run.clone(),
        cfg.generation.clone(),
        cfg.prompts.clone(),
      );
      let report = harvester.run(&inspiration).await;
      info!(target: "harvester", inserted = report.inserted, skipped = report.skipped(), planned = report.planned, "Generation phase done");
    }

    let sweep = RepairSweep::new(store, model, cfg.repair.clone(), cfg.prompts.clone());
    let repaired = sweep.run().await;
    info!(
      target: "harvester",
      scanned = repaired.scanned,
      broken = repaired.broken,
      repaired = repaired.repaired,
      failed = repaired.failed,
      "Run finished"
    );
  }
  .instrument(span)
  .await;

  Ok(())
}
