//! Self-balancing target queue.
//!
//! Flow:
//! 1) Count stored rows per bucket ([`Inventory`]).
//! 2) Score every bucket by how far it is below the long-term target.
//! 3) Turn scores into slot counts proportional to each bucket's share of the
//!    total deficit (at least one slot each), shuffle, and cut/pad to exactly
//!    the run size.
//!
//! Thin buckets get proportionally more slots, but the order is random so a
//! partially completed run is not biased toward any one bucket.

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use crate::domain::{Bucket, StoredRow};

/// Current stored-item counts per bucket. Rebuilt on every run.
#[derive(Clone, Debug, Default)]
pub struct Inventory {
  counts: HashMap<Bucket, u32>,
  /// Rows whose tags are outside the vocabulary (not counted toward any bucket).
  pub untagged: u32,
}

impl Inventory {
  pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a StoredRow>) -> Self {
    let mut inv = Self::default();
    for row in rows {
      match row.bucket() {
        Some(b) => *inv.counts.entry(b).or_insert(0) += 1,
        None => inv.untagged += 1,
      }
    }
    inv
  }

  /// Observed count; buckets never seen count as zero.
  pub fn count(&self, bucket: &Bucket) -> u32 {
    self.counts.get(bucket).copied().unwrap_or(0)
  }

  pub fn total(&self) -> u32 {
    self.counts.values().sum()
  }

  #[cfg(test)]
  pub fn with_counts(pairs: impl IntoIterator<Item = (Bucket, u32)>) -> Self {
    Self { counts: pairs.into_iter().collect(), untagged: 0 }
  }
}

/// `max(0, target - observed) + 1`: never zero, so saturated buckets keep a trickle.
pub fn deficit(target: u32, observed: u32) -> u32 {
  target.saturating_sub(observed) + 1
}

pub fn score_deficits(inventory: &Inventory, buckets: &[Bucket], target: u32) -> Vec<(Bucket, u32)> {
  buckets
    .iter()
    .map(|b| {
      let observed = inventory.count(b);
      let d = deficit(target, observed);
      debug!(target: "queue", bucket = %b, observed, deficit = d, "Bucket inventory");
      (*b, d)
    })
    .collect()
}

/// Build a queue of exactly `run_size` buckets from `(bucket, deficit)` scores.
pub fn build_queue<R: Rng + ?Sized>(scores: &[(Bucket, u32)], run_size: usize, rng: &mut R) -> Vec<Bucket> {
  let total: u64 = scores.iter().map(|(_, d)| u64::from(*d)).sum();
  if run_size == 0 || total == 0 {
    return Vec::new();
  }

  let mut queue = Vec::new();
  for (bucket, d) in scores {
    let share = f64::from(*d) / total as f64 * run_size as f64;
    let slots = (share.round() as usize).max(1);
    queue.extend(std::iter::repeat(*bucket).take(slots));
  }

  queue.shuffle(rng);
  queue.truncate(run_size);
  while queue.len() < run_size {
    let Some(pick) = queue.choose(rng).copied() else { break };
    queue.push(pick);
  }

  let unique: HashSet<&Bucket> = queue.iter().collect();
  info!(target: "queue", len = queue.len(), unique_buckets = unique.len(), "Target queue built");
  queue
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::ALL_BUCKETS;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  #[test]
  fn deficit_has_floor_and_decreases() {
    let target = 500;
    let mut prev = deficit(target, 0);
    assert_eq!(prev, 501);
    for observed in 1..=target {
      let d = deficit(target, observed);
      assert!(d < prev, "deficit must strictly decrease at {observed}");
      prev = d;
    }
    assert_eq!(deficit(target, 500), 1);
    assert_eq!(deficit(target, 10_000), 1);
  }

  #[test]
  fn missing_counts_default_to_zero() {
    let scores = score_deficits(&Inventory::default(), &ALL_BUCKETS, 500);
    assert_eq!(scores.len(), 26);
    assert!(scores.iter().all(|(_, d)| *d == 501));
  }

  #[test]
  fn empty_store_queue_is_exact_and_valid() {
    // 26 near-uniform buckets, 25 slots: each rounds to 1, 26 > 25, so shuffle+truncate.
    let scores = score_deficits(&Inventory::default(), &ALL_BUCKETS, 500);
    for seed in 0..20 {
      let mut rng = StdRng::seed_from_u64(seed);
      let q = build_queue(&scores, 25, &mut rng);
      assert_eq!(q.len(), 25);
      assert!(q.iter().all(|b| ALL_BUCKETS.contains(b)));
      let unique: HashSet<_> = q.iter().collect();
      assert_eq!(unique.len(), 25, "each bucket gets a single slot");
    }
  }

  #[test]
  fn every_bucket_covered_when_run_is_large_enough() {
    let scores = score_deficits(&Inventory::default(), &ALL_BUCKETS, 500);
    let mut rng = StdRng::seed_from_u64(7);
    let q = build_queue(&scores, 100, &mut rng);
    assert_eq!(q.len(), 100);
    let unique: HashSet<_> = q.iter().collect();
    assert_eq!(unique.len(), ALL_BUCKETS.len());
  }

  #[test]
  fn length_is_exact_under_skew() {
    let mut rng = StdRng::seed_from_u64(42);
    let skewed: Vec<(Bucket, u32)> = ALL_BUCKETS
      .iter()
      .enumerate()
      .map(|(i, b)| (*b, if i == 0 { 1_000_000 } else { 1 }))
      .collect();
    for n in [0usize, 1, 3, 25, 26, 57, 200] {
      assert_eq!(build_queue(&skewed, n, &mut rng).len(), n);
    }
    // Three equal buckets, 10 slots: 3 + 3 + 3 < 10, so one entry is resampled.
    let three = &skewed[1..4];
    let q = build_queue(three, 10, &mut rng);
    assert_eq!(q.len(), 10);
    assert!(q.iter().all(|b| three.iter().any(|(t, _)| t == b)));
  }

  #[test]
  fn saturated_bucket_gets_minimum_share() {
    let full = ALL_BUCKETS[0];
    let inv = Inventory::with_counts([(full, 500)]);
    let scores = score_deficits(&inv, &ALL_BUCKETS, 500);
    assert_eq!(scores[0], (full, 1));
    assert!(scores[1..].iter().all(|(_, d)| *d == 501));

    let mut rng = StdRng::seed_from_u64(3);
    let q = build_queue(&scores, 100, &mut rng);
    assert_eq!(q.len(), 100);
    let count = |b: &Bucket| q.iter().filter(|x| *x == b).count();
    assert!(count(&full) <= 1);
    let thin = ALL_BUCKETS[1];
    assert!(count(&thin) > count(&full));
  }

  #[test]
  fn inventory_counts_rows_by_bucket() {
    let rows: Vec<StoredRow> = serde_json::from_str(
      r#"[{"category":"Math","sub_category":"Advanced_Math","difficulty":"Hard","is_variant":true},
          {"category":"Math","sub_category":"Advanced_Math","difficulty":"Hard","is_variant":true},
          {"category":"Math","sub_category":"Advanced_Math","difficulty":"Hard"},
          {"category":"Maths","sub_category":"Algebra","difficulty":"Hard"}]"#,
    )
    .unwrap();
    let inv = Inventory::from_rows(&rows);
    assert_eq!(inv.count(&ALL_BUCKETS[7]), 2);
    assert_eq!(inv.count(&ALL_BUCKETS[6]), 1);
    assert_eq!(inv.total(), 3);
    assert_eq!(inv.untagged, 1);
  }
}
