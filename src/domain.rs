//! Domain models: the static tag vocabulary, generation buckets, and the
//! records exchanged with the model and the store.
//!
//! Wire strings (`"Math"`, `"Heart_of_Algebra"`, ...) are what the store
//! columns hold and what the model is told to emit; never use `Debug` output
//! in their place.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level exam section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
  #[serde(rename = "Math")]
  Math,
  #[serde(rename = "Reading_Writing")]
  ReadingWriting,
}

impl Category {
  pub const ALL: [Category; 2] = [Category::Math, Category::ReadingWriting];

  pub fn as_str(self) -> &'static str {
    match self {
      Category::Math => "Math",
      Category::ReadingWriting => "Reading_Writing",
    }
  }

  /// Exact match against the wire vocabulary; near-misses are out of vocabulary.
  pub fn parse(s: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|c| c.as_str() == s)
  }

  pub fn sub_categories(self) -> impl Iterator<Item = SubCategory> {
    SubCategory::ALL.into_iter().filter(move |s| s.category() == self)
  }
}

/// Content domain within a section. Each belongs to exactly one [`Category`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubCategory {
  #[serde(rename = "Heart_of_Algebra")]
  HeartOfAlgebra,
  #[serde(rename = "Advanced_Math")]
  AdvancedMath,
  #[serde(rename = "Problem_Solving_Data")]
  ProblemSolvingData,
  #[serde(rename = "Geometry_Trigonometry")]
  GeometryTrigonometry,
  #[serde(rename = "Information_Ideas")]
  InformationIdeas,
  #[serde(rename = "Craft_Structure")]
  CraftStructure,
  #[serde(rename = "Expression_Ideas")]
  ExpressionIdeas,
  #[serde(rename = "Standard_English")]
  StandardEnglish,
}

impl SubCategory {
  pub const ALL: [SubCategory; 8] = [
    SubCategory::HeartOfAlgebra,
    SubCategory::AdvancedMath,
    SubCategory::ProblemSolvingData,
    SubCategory::GeometryTrigonometry,
    SubCategory::InformationIdeas,
    SubCategory::CraftStructure,
    SubCategory::ExpressionIdeas,
    SubCategory::StandardEnglish,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      SubCategory::HeartOfAlgebra => "Heart_of_Algebra",
      SubCategory::AdvancedMath => "Advanced_Math",
      SubCategory::ProblemSolvingData => "Problem_Solving_Data",
      SubCategory::GeometryTrigonometry => "Geometry_Trigonometry",
      SubCategory::InformationIdeas => "Information_Ideas",
      SubCategory::CraftStructure => "Craft_Structure",
      SubCategory::ExpressionIdeas => "Expression_Ideas",
      SubCategory::StandardEnglish => "Standard_English",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|d| d.as_str() == s)
  }

  pub fn category(self) -> Category {
    match self {
      SubCategory::HeartOfAlgebra
      | SubCategory::AdvancedMath
      | SubCategory::ProblemSolvingData
      | SubCategory::GeometryTrigonometry => Category::Math,
      SubCategory::InformationIdeas
      | SubCategory::CraftStructure
      | SubCategory::ExpressionIdeas
      | SubCategory::StandardEnglish => Category::ReadingWriting,
    }
  }

  /// Human-readable label used in prompts ("Heart of Algebra").
  pub fn display_name(self) -> String {
    self.as_str().replace('_', " ")
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
  Easy,
  Medium,
  Hard,
}

impl Difficulty {
  pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

  pub fn as_str(self) -> &'static str {
    match self {
      Difficulty::Easy => "Easy",
      Difficulty::Medium => "Medium",
      Difficulty::Hard => "Hard",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|d| d.as_str() == s)
  }

  /// One-line rubric the generator is held to.
  pub fn rubric(self) -> &'static str {
    match self {
      Difficulty::Easy => "single-step reasoning",
      Difficulty::Medium => "2-3 reasoning steps",
      Difficulty::Hard => "multiple concepts combined, or plausible trap answers",
    }
  }
}

/// A (category, sub-category, difficulty, variant) slot tracked for inventory balance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Bucket {
  pub category: Category,
  pub sub_category: SubCategory,
  pub difficulty: Difficulty,
  /// Free-response (grid-in) item with no answer choices.
  pub is_variant: bool,
}

impl fmt::Display for Bucket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} | {} | {} | variant={}",
      self.category.as_str(),
      self.sub_category.as_str(),
      self.difficulty.as_str(),
      self.is_variant
    )
  }
}

const fn bucket(sub_category: SubCategory, difficulty: Difficulty, is_variant: bool) -> Bucket {
  let category = match sub_category {
    SubCategory::HeartOfAlgebra
    | SubCategory::AdvancedMath
    | SubCategory::ProblemSolvingData
    | SubCategory::GeometryTrigonometry => Category::Math,
    _ => Category::ReadingWriting,
  };
  Bucket { category, sub_category, difficulty, is_variant }
}

use Difficulty::{Easy, Hard, Medium};
use SubCategory::*;

/// Every bucket the harvester balances. Only hard algebra/advanced math allow grid-in variants.
pub const ALL_BUCKETS: [Bucket; 26] = [
  bucket(HeartOfAlgebra, Easy, false),
  bucket(HeartOfAlgebra, Medium, false),
  bucket(HeartOfAlgebra, Hard, false),
  bucket(HeartOfAlgebra, Hard, true),
  bucket(AdvancedMath, Easy, false),
  bucket(AdvancedMath, Medium, false),
  bucket(AdvancedMath, Hard, false),
  bucket(AdvancedMath, Hard, true),
  bucket(ProblemSolvingData, Easy, false),
  bucket(ProblemSolvingData, Medium, false),
  bucket(ProblemSolvingData, Hard, false),
  bucket(GeometryTrigonometry, Easy, false),
  bucket(GeometryTrigonometry, Medium, false),
  bucket(GeometryTrigonometry, Hard, false),
  bucket(InformationIdeas, Easy, false),
  bucket(InformationIdeas, Medium, false),
  bucket(InformationIdeas, Hard, false),
  bucket(CraftStructure, Easy, false),
  bucket(CraftStructure, Medium, false),
  bucket(CraftStructure, Hard, false),
  bucket(ExpressionIdeas, Easy, false),
  bucket(ExpressionIdeas, Medium, false),
  bucket(ExpressionIdeas, Hard, false),
  bucket(StandardEnglish, Easy, false),
  bucket(StandardEnglish, Medium, false),
  bucket(StandardEnglish, Hard, false),
];

/// Parse a stored/generated (category, sub-category) pair.
/// A sub-category filed under the other category is out of vocabulary.
pub fn parse_tag_pair(category: Option<&str>, sub_category: Option<&str>) -> Option<(Category, SubCategory)> {
  let c = Category::parse(category?)?;
  let s = SubCategory::parse(sub_category?)?;
  (s.category() == c).then_some((c, s))
}

// --- Records ---

/// Candidate item exactly as the model returned it. Nothing is trusted until
/// it passes through the validator. Every field is kept as a raw `Value` so a
/// wrong JSON type reaches the validator instead of failing the parse.
///
/// Legacy spellings (`module`, `domain`, `is_spr`, `question_text`, `options`)
/// are separate fields, read only when the current name is absent; a reply
/// carrying both spellings still parses.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CandidateItem {
  category: Option<Value>,
  sub_category: Option<Value>,
  difficulty: Option<Value>,
  is_variant: Option<Value>,
  item_text: Option<Value>,
  answer_choices: Option<Value>,
  correct_answer: Option<Value>,
  rationale: Option<Value>,
  /// Identifiers are assigned by the store; a model-supplied one is discarded.
  id: Option<Value>,

  module: Option<Value>,
  domain: Option<Value>,
  is_spr: Option<Value>,
  question_text: Option<Value>,
  options: Option<Value>,
}

/// Scalars the model may emit for a text field; empty after trimming means absent.
pub fn scalar_text(v: &Value) -> Option<String> {
  let s = match v {
    Value::String(s) => s.trim().to_string(),
    Value::Number(n) => n.to_string(),
    Value::Bool(b) => b.to_string(),
    _ => return None,
  };
  (!s.is_empty()).then_some(s)
}

fn pick<'a>(current: &'a Option<Value>, legacy: &'a Option<Value>) -> Option<&'a Value> {
  current.as_ref().filter(|v| !v.is_null()).or(legacy.as_ref().filter(|v| !v.is_null()))
}

impl CandidateItem {
  pub fn category(&self) -> Option<String> {
    pick(&self.category, &self.module).and_then(scalar_text)
  }

  pub fn sub_category(&self) -> Option<String> {
    pick(&self.sub_category, &self.domain).and_then(scalar_text)
  }

  pub fn difficulty(&self) -> Option<String> {
    self.difficulty.as_ref().and_then(scalar_text)
  }

  /// The model's own variant flag; `true`/`false` or their string forms.
  pub fn is_variant(&self) -> Option<bool> {
    match pick(&self.is_variant, &self.is_spr)? {
      Value::Bool(b) => Some(*b),
      Value::String(s) => s.trim().parse().ok(),
      _ => None,
    }
  }

  pub fn item_text(&self) -> Option<String> {
    pick(&self.item_text, &self.question_text).and_then(scalar_text)
  }

  pub fn answer_choices(&self) -> Option<&Value> {
    pick(&self.answer_choices, &self.options)
  }

  pub fn correct_answer(&self) -> Option<String> {
    self.correct_answer.as_ref().and_then(scalar_text)
  }

  pub fn rationale(&self) -> Option<String> {
    self.rationale.as_ref().and_then(scalar_text)
  }

  pub fn has_id(&self) -> bool {
    self.id.as_ref().map_or(false, |v| !v.is_null())
  }
}

/// Validated record in the store's wire schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
  pub category: Category,
  pub sub_category: SubCategory,
  pub difficulty: Difficulty,
  pub is_variant: bool,
  pub item_text: String,
  /// `None` (null on the wire) exactly when `is_variant`; otherwise four entries.
  pub answer_choices: Option<Vec<String>>,
  pub correct_answer: String,
  pub rationale: String,
  pub provenance_tag: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_text: Option<String>,
}

/// Store-assigned row identifier (integer or uuid/text primary keys).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
  Int(i64),
  Text(String),
}

impl fmt::Display for RowId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RowId::Int(i) => write!(f, "{i}"),
      RowId::Text(s) => f.write_str(s),
    }
  }
}

/// A stored row as read back for inventory or repair. Tags are raw strings
/// because stored rows may predate (or violate) the vocabulary.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StoredRow {
  #[serde(default)]
  pub id: Option<RowId>,
  #[serde(default)]
  pub category: Option<String>,
  #[serde(default)]
  pub sub_category: Option<String>,
  #[serde(default)]
  pub difficulty: Option<String>,
  #[serde(default)]
  pub is_variant: Option<bool>,
  #[serde(default)]
  pub item_text: Option<String>,
  #[serde(default)]
  pub source_text: Option<String>,
}

impl StoredRow {
  /// The bucket this row counts toward, if its tags are fully in vocabulary.
  pub fn bucket(&self) -> Option<Bucket> {
    let (category, sub_category) = parse_tag_pair(self.category.as_deref(), self.sub_category.as_deref())?;
    let difficulty = Difficulty::parse(self.difficulty.as_deref()?)?;
    Some(Bucket { category, sub_category, difficulty, is_variant: self.is_variant.unwrap_or(false) })
  }

  /// Whether the repair sweep should re-classify this row.
  pub fn has_broken_tags(&self) -> bool {
    parse_tag_pair(self.category.as_deref(), self.sub_category.as_deref()).is_none()
  }
}
