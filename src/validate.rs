//! Candidate validation and normalization.
//!
//! Tag drift is corrected, not rejected: the model often returns near-miss
//! category names, and pinning to the requested bucket keeps the inventory
//! balance accurate. Content problems (empty text/answer, wrong choice count)
//! are rejected.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::{parse_tag_pair, scalar_text, Bucket, CandidateItem, Difficulty, QuestionRecord};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Rejection {
  #[error("item text is empty")]
  MissingItemText,
  #[error("correct answer is empty")]
  MissingCorrectAnswer,
  #[error("expected exactly 4 answer choices, got {0}")]
  WrongChoiceCount(usize),
  #[error("answer choices are not a list of strings")]
  MalformedChoices,
}

fn answer_choices(v: Option<&Value>) -> Result<Vec<String>, Rejection> {
  let Some(Value::Array(items)) = v else {
    return Err(match v {
      None | Some(Value::Null) => Rejection::WrongChoiceCount(0),
      Some(_) => Rejection::MalformedChoices,
    });
  };
  if items.len() != 4 {
    return Err(Rejection::WrongChoiceCount(items.len()));
  }
  items.iter().map(|i| scalar_text(i).ok_or(Rejection::MalformedChoices)).collect()
}

/// Turn a raw candidate into a storable record for `expected`, or reject it.
pub fn validate(candidate: CandidateItem, expected: &Bucket, provenance_tag: &str) -> Result<QuestionRecord, Rejection> {
  // 1. Vocabulary: pin out-of-vocabulary tags to the requested bucket. The
  // pair is pinned as a unit so a sub-category never lands under the wrong category.
  let (got_category, got_sub_category) = (candidate.category(), candidate.sub_category());
  let (category, sub_category) = parse_tag_pair(got_category.as_deref(), got_sub_category.as_deref())
    .unwrap_or_else(|| {
      debug!(target: "harvester", ?got_category, ?got_sub_category, "Pinning drifted tags to requested bucket");
      (expected.category, expected.sub_category)
    });
  let difficulty = candidate.difficulty().as_deref().and_then(Difficulty::parse).unwrap_or(expected.difficulty);

  // 2. Required content.
  let item_text = candidate.item_text().ok_or(Rejection::MissingItemText)?;
  let correct_answer = candidate.correct_answer().ok_or(Rejection::MissingCorrectAnswer)?;

  // 3. Shape follows the requested bucket, not the model's flag.
  let is_variant = expected.is_variant;
  if candidate.is_variant().is_some_and(|flag| flag != is_variant) {
    debug!(target: "harvester", got = ?candidate.is_variant(), expected = is_variant, "Overriding model variant flag");
  }
  let answer_choices = if is_variant { None } else { Some(answer_choices(candidate.answer_choices())?) };

  // 4. Provenance. Ids come from the store, so a model-supplied id is dropped.
  if candidate.has_id() {
    debug!(target: "harvester", "Dropping model-supplied id");
  }
  Ok(QuestionRecord {
    category,
    sub_category,
    difficulty,
    is_variant,
    item_text,
    answer_choices,
    correct_answer,
    rationale: candidate.rationale().unwrap_or_default(),
    provenance_tag: provenance_tag.to_string(),
    source_text: None,
  })
}
