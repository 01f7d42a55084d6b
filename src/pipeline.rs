//! Harvest run: inventory -> deficits -> queue, then for each queued bucket
//! prompt -> generate -> validate -> write, strictly one at a time.
//!
//! Every per-item failure is absorbed and counted; the run reports counts
//! rather than failing as a whole.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, instrument, warn};

use crate::config::{GenerationSettings, Prompts, RunSettings};
use crate::domain::{Bucket, ALL_BUCKETS};
use crate::generate::{GenerationFailure, Generator};
use crate::inspiration::Inspiration;
use crate::model::ModelClient;
use crate::prompt::generation_prompt;
use crate::queue::{build_queue, score_deficits, Inventory};
use crate::store::{read_inventory_rows, QuestionStore};
use crate::validate::validate;
use crate::writer::{WriteOutcome, Writer};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
  pub planned: usize,
  pub inserted: usize,
  pub duplicates: usize,
  pub rejected: usize,
  pub rate_limited: usize,
  pub malformed: usize,
  pub upstream_failed: usize,
  pub write_failed: usize,
}

impl RunReport {
  pub fn skipped(&self) -> usize {
    self.duplicates + self.rejected + self.rate_limited + self.malformed + self.upstream_failed + self.write_failed
  }
}

pub struct Harvester {
  store: Arc<dyn QuestionStore>,
  generator: Generator,
  writer: Writer,
  settings: RunSettings,
  prompts: Prompts,
}

impl Harvester {
  pub fn new(
    store: Arc<dyn QuestionStore>,
    model: Arc<dyn ModelClient>,
    settings: RunSettings,
    generation: GenerationSettings,
    prompts: Prompts,
  ) -> Self {
    Self {
      writer: Writer::new(store.clone()),
      generator: Generator::new(model, generation),
      store,
      settings,
      prompts,
    }
  }

  /// Read inventory and build this run's queue. An unreadable store counts as empty.
  #[instrument(level = "info", target = "harvester", skip_all)]
  pub async fn plan(&self) -> Vec<Bucket> {
    let inventory = match read_inventory_rows(self.store.as_ref()).await {
      Ok(rows) => Inventory::from_rows(&rows),
      Err(e) => {
        warn!(target: "harvester", error = %e, "Could not read inventory; treating store as empty");
        Inventory::default()
      }
    };
    info!(target: "harvester", stored = inventory.total(), untagged = inventory.untagged, "Inventory read");

    let scores = score_deficits(&inventory, &ALL_BUCKETS, self.settings.target_per_bucket);
    build_queue(&scores, self.settings.questions_per_run, &mut rand::thread_rng())
  }

  #[instrument(level = "info", target = "harvester", skip_all)]
  pub async fn run(&self, inspiration: &Inspiration) -> RunReport {
    let queue = self.plan().await;
    let mut report = RunReport { planned: queue.len(), ..RunReport::default() };
    info!(target: "harvester", planned = report.planned, "Processing queue based on current inventory deficits");

    for (i, bucket) in queue.iter().enumerate() {
      info!(target: "harvester", "[{}/{}] Generating: {}", i + 1, queue.len(), bucket);
      self.process(bucket, inspiration, i as u32, &mut report).await;

      if i + 1 < queue.len() {
        self.pace().await;
      }
    }

    info!(
      target: "harvester",
      inserted = report.inserted,
      skipped = report.skipped(),
      duplicates = report.duplicates,
      rejected = report.rejected,
      rate_limited = report.rate_limited,
      malformed = report.malformed,
      "Harvest run complete"
    );
    report
  }

  async fn process(&self, bucket: &Bucket, inspiration: &Inspiration, index: u32, report: &mut RunReport) {
    let prompt = generation_prompt(&self.prompts, bucket, inspiration.text.as_deref(), inspiration.seed.wrapping_add(index));
    let candidate = match self.generator.generate(prompt).await {
      Ok(c) => c,
      Err(f) => {
        match f {
          GenerationFailure::RateLimited => report.rate_limited += 1,
          GenerationFailure::Malformed => report.malformed += 1,
          GenerationFailure::Upstream => report.upstream_failed += 1,
        }
        return;
      }
    };

    let mut record = match validate(candidate, bucket, &self.settings.provenance_tag) {
      Ok(r) => r,
      Err(reason) => {
        warn!(target: "harvester", %bucket, %reason, "Validation failed; skipping");
        report.rejected += 1;
        return;
      }
    };
    record.source_text = inspiration.text.clone();

    match self.writer.write(&record).await {
      WriteOutcome::Inserted => report.inserted += 1,
      WriteOutcome::Duplicate => report.duplicates += 1,
      WriteOutcome::Failed => report.write_failed += 1,
    }
  }

  /// Random pause between items to stay under per-minute model quotas.
  async fn pace(&self) {
    let (lo, hi) = (self.settings.delay_min_secs, self.settings.delay_max_secs);
    let secs = if hi > lo { rand::thread_rng().gen_range(lo..=hi) } else { lo };
    if secs > 0.0 {
      tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }
  }
}
