//! Prompt composition for generation and re-classification.
//!
//! Pure functions over the configured templates: the bucket (or stored item
//! text) goes in, a `(system, user)` prompt pair comes out.

use crate::config::Prompts;
use crate::domain::{Bucket, Category, Difficulty, SubCategory};
use crate::util::fill_template;

/// A system + user message pair for one chat completion.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatPrompt {
  pub system: String,
  pub user: String,
}

fn quoted_list<'a>(items: impl IntoIterator<Item = &'a str>) -> String {
  items.into_iter().map(|s| format!("\"{s}\"")).collect::<Vec<_>>().join(", ")
}

fn allowed_categories() -> String {
  quoted_list(Category::ALL.iter().map(|c| c.as_str()))
}

fn allowed_sub_categories() -> String {
  quoted_list(SubCategory::ALL.iter().map(|s| s.as_str()))
}

fn allowed_difficulties() -> String {
  quoted_list(Difficulty::ALL.iter().map(|d| d.as_str()))
}

fn category_display(c: Category) -> &'static str {
  match c {
    Category::Math => "Math",
    Category::ReadingWriting => "Reading and Writing",
  }
}

fn variant_rule(is_variant: bool) -> &'static str {
  if is_variant {
    "This is a Student-Produced Response (grid-in) question. There are NO answer choices: set is_variant=true and answer_choices=null. The correct_answer must be a single numeric value the student enters."
  } else {
    "This is a multiple-choice question. Set is_variant=false and provide exactly 4 distinct, plausible answer choices."
  }
}

/// The JSON shape the model must return, with the bucket's values pre-filled.
fn output_schema(bucket: &Bucket) -> String {
  let choices = if bucket.is_variant {
    "null"
  } else {
    r#"["<choice A>", "<choice B>", "<choice C>", "<choice D>"]"#
  };
  let answer = if bucket.is_variant {
    "<exact numeric value>"
  } else {
    "<exact text of the correct choice>"
  };
  format!(
    "{{\n  \"category\": \"{}\",\n  \"sub_category\": \"{}\",\n  \"difficulty\": \"{}\",\n  \"is_variant\": {},\n  \"item_text\": \"<full question text>\",\n  \"answer_choices\": {},\n  \"correct_answer\": \"{}\",\n  \"rationale\": \"<1-2 sentence explanation>\"\n}}",
    bucket.category.as_str(),
    bucket.sub_category.as_str(),
    bucket.difficulty.as_str(),
    bucket.is_variant,
    choices,
    answer,
  )
}

fn source_section(source: Option<&str>) -> String {
  match source {
    Some(text) if !text.trim().is_empty() => format!(
      "\nHere is some raw inspirational source material. Borrow its topic at most; never its wording:\n[RAW_SOURCE_START]\n{text}\n[RAW_SOURCE_END]\n"
    ),
    _ => String::new(),
  }
}

/// Render the generation request for one bucket.
///
/// `source` is optional inspiration text; `seed_offset` diversifies repeated
/// requests for the same bucket within and across runs.
pub fn generation_prompt(prompts: &Prompts, bucket: &Bucket, source: Option<&str>, seed_offset: u32) -> ChatPrompt {
  let seed = seed_offset.to_string();
  let section = source_section(source);
  let schema = output_schema(bucket);
  let sub_display = bucket.sub_category.display_name();
  // Free-text values (source, schema) go last so their braces are never re-scanned.
  let user = fill_template(
    &prompts.generation_user_template,
    &[
      ("category_display", category_display(bucket.category)),
      ("sub_category_display", &sub_display),
      ("difficulty_rubric", bucket.difficulty.rubric()),
      ("difficulty", bucket.difficulty.as_str()),
      ("variant_rule", variant_rule(bucket.is_variant)),
      ("allowed_categories", &allowed_categories()),
      ("allowed_sub_categories", &allowed_sub_categories()),
      ("allowed_difficulties", &allowed_difficulties()),
      ("seed_offset", &seed),
      ("schema", &schema),
      ("source_section", &section),
    ],
  );
  ChatPrompt { system: prompts.generation_system.clone(), user }
}

/// Render the narrower re-classification request for a stored item.
pub fn repair_prompt(prompts: &Prompts, item_text: &str) -> ChatPrompt {
  let by_category = Category::ALL
    .iter()
    .map(|c| format!("  For {}: {}", c.as_str(), quoted_list(c.sub_categories().map(|s| s.as_str()))))
    .collect::<Vec<_>>()
    .join("\n");
  let user = fill_template(
    &prompts.repair_user_template,
    &[
      ("allowed_categories", &allowed_categories()),
      ("sub_categories_by_category", &by_category),
      ("allowed_difficulties", &allowed_difficulties()),
      ("item_text", item_text),
    ],
  );
  ChatPrompt { system: prompts.repair_system.clone(), user }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::ALL_BUCKETS;

  fn variant_bucket() -> Bucket {
    *ALL_BUCKETS.iter().find(|b| b.is_variant).unwrap()
  }

  #[test]
  fn generation_prompt_states_fields_vocabulary_and_rules() {
    let b = ALL_BUCKETS[20];
    let p = generation_prompt(&Prompts::default(), &b, None, 17);
    for field in ["category", "sub_category", "difficulty", "is_variant", "item_text", "answer_choices", "correct_answer", "rationale"] {
      assert!(p.user.contains(&format!("\"{field}\"")), "missing field {field}");
    }
    for s in SubCategory::ALL {
      assert!(p.user.contains(s.as_str()));
    }
    assert!(p.user.contains("\"Reading_Writing\""));
    assert!(p.user.contains("exactly 4 distinct"));
    assert!(p.user.contains("fictional"));
    assert!(p.user.contains("verbatim"));
    assert!(p.user.contains("single-step"));
    assert!(p.user.contains("Randomization seed offset: 17"));
    assert!(!p.user.contains("RAW_SOURCE_START"));
    assert!(!p.user.contains("{schema}") && !p.user.contains("{variant_rule}"));
  }

  #[test]
  fn variant_prompt_forbids_choices() {
    let p = generation_prompt(&Prompts::default(), &variant_bucket(), None, 0);
    assert!(p.user.contains("\"answer_choices\": null"));
    assert!(p.user.contains("\"is_variant\": true"));
    assert!(p.user.contains("numeric"));
    assert!(!p.user.contains("exactly 4 distinct"));
  }

  #[test]
  fn difficulty_rubric_follows_bucket() {
    let hard = ALL_BUCKETS.iter().find(|b| b.difficulty == Difficulty::Hard).unwrap();
    let p = generation_prompt(&Prompts::default(), hard, None, 0);
    assert!(p.user.contains(Difficulty::Hard.rubric()));
  }

  #[test]
  fn source_material_is_embedded_when_present() {
    let p = generation_prompt(&Prompts::default(), &ALL_BUCKETS[0], Some("Volcanoes of {planet}"), 3);
    assert!(p.user.contains("[RAW_SOURCE_START]\nVolcanoes of {planet}\n[RAW_SOURCE_END]"));
  }

  #[test]
  fn repair_prompt_lists_grouped_vocabulary() {
    let p = repair_prompt(&Prompts::default(), "What is 2 + 2?");
    assert!(p.user.contains("For Math: \"Heart_of_Algebra\", \"Advanced_Math\""));
    assert!(p.user.contains("For Reading_Writing: \"Information_Ideas\""));
    assert!(p.user.contains("What is 2 + 2?"));
    assert!(p.user.contains(r#"{"category": "<category>""#));
  }
}
