//! Run configuration: credentials from the environment, tuning knobs and
//! prompt templates from an optional TOML file.
//!
//! Precedence: built-in defaults < `HARVESTER_CONFIG_PATH` TOML < environment.
//! Missing credentials or malformed values are fatal: the run aborts before
//! any network call.
//!
//! Environment:
//!   STORE_URL, STORE_API_KEY, MODEL_API_KEY   : required
//!   STORE_TABLE                               : default "question_bank"
//!   MODEL_BASE_URL                            : default Groq's OpenAI-compatible endpoint
//!   MODEL_NAME                                : default "llama-3.3-70b-versatile"
//!   MODEL_TIMEOUT_SECS                        : default 30
//!   QUESTIONS_PER_RUN, TARGET_PER_BUCKET      : default 25 / 500
//!   REPAIR_BATCH_SIZE, REPAIR_SCAN_LIMIT      : default 10 / 1000
//!   HARVESTER_MODE                            : "harvest" (default) or "repair"
//!   HARVESTER_CONFIG_PATH                     : TOML overrides (see `FileConfig`)

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("missing required environment variable {0}")]
  Missing(&'static str),
  #[error("invalid value for {key}: {reason}")]
  Invalid { key: String, reason: String },
  #[error("failed to read config file {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: String,
    #[source]
    source: toml::de::Error,
  },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
  /// Generate the target queue, then run the repair sweep.
  Harvest,
  /// Repair sweep only.
  Repair,
}

impl FromStr for RunMode {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "harvest" => Ok(RunMode::Harvest),
      "repair" => Ok(RunMode::Repair),
      other => Err(format!("expected \"harvest\" or \"repair\", got {other:?}")),
    }
  }
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
  pub url: String,
  pub api_key: String,
  pub table: String,
}

#[derive(Clone, Debug)]
pub struct ModelConfig {
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  pub timeout: Duration,
}

/// Main generation loop knobs.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RunSettings {
  pub questions_per_run: usize,
  /// Long-term per-bucket target; drives deficit weighting.
  pub target_per_bucket: u32,
  /// Random pause between items, to stay under per-minute model quotas.
  pub delay_min_secs: f64,
  pub delay_max_secs: f64,
  pub provenance_tag: String,
}

impl Default for RunSettings {
  fn default() -> Self {
    Self {
      questions_per_run: 25,
      target_per_bucket: 500,
      delay_min_secs: 2.0,
      delay_max_secs: 3.5,
      provenance_tag: "Automated_Pipeline".into(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
  pub max_attempts: u32,
  /// Backoff after a rate-limit is `backoff_base_secs * 2^attempt`.
  pub backoff_base_secs: f64,
  pub temperature: f32,
  pub max_tokens: u32,
}

impl Default for GenerationSettings {
  fn default() -> Self {
    Self { max_attempts: 3, backoff_base_secs: 10.0, temperature: 0.8, max_tokens: 1024 }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RepairSettings {
  /// Rows fetched per sweep before client-side filtering.
  pub scan_limit: usize,
  /// Broken rows re-classified per sweep; the rest wait for the next run.
  pub batch_size: usize,
  pub pause_secs: f64,
  pub temperature: f32,
  pub backfill_text: String,
}

impl Default for RepairSettings {
  fn default() -> Self {
    Self {
      scan_limit: 1000,
      batch_size: 10,
      pause_secs: 1.5,
      temperature: 0.1,
      backfill_text: "[Auto-backfilled] Source text was not captured for this legacy row.".into(),
    }
  }
}

/// Public catalogue endpoints sampled once per run for raw inspiration text.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct InspirationSettings {
  /// URL prefixes; a random page/offset number is appended. Empty disables fetching.
  pub sources: Vec<String>,
  pub max_bytes: usize,
  pub timeout_secs: u64,
  pub fallback_text: String,
}

impl Default for InspirationSettings {
  fn default() -> Self {
    Self {
      sources: vec![
        "https://api.crossref.org/works?query=science&select=title,abstract&rows=10&offset=".into(),
        "https://openlibrary.org/search.json?q=history&limit=10&page=".into(),
        "https://gutendex.com/books/?topic=education&page=".into(),
      ],
      max_bytes: 3000,
      timeout_secs: 10,
      fallback_text: "(No source material available; invent a fresh conceptual scenario.)".into(),
    }
  }
}

/// Prompt templates. `{placeholders}` are filled by `prompt.rs`.
/// Override in TOML under `[prompts]` to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub generation_system: String,
  pub generation_user_template: String,
  pub repair_system: String,
  pub repair_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      generation_system: "You are a Digital SAT question writer and copyright-sanitization engine. Respond ONLY with a strict JSON object.".into(),
      generation_user_template: r#"Generate ONE brand-new Digital SAT question with EXACTLY these attributes:
  Section   : {category_display}
  Domain    : {sub_category_display}
  Difficulty: {difficulty}
  {variant_rule}

For the "category", "sub_category" and "difficulty" keys you MUST pick exactly one string from the allowed lists below. Do NOT invent your own categories and do NOT use spaces.

ALLOWED CATEGORIES: {allowed_categories}
ALLOWED SUB_CATEGORIES: {allowed_sub_categories}
ALLOWED DIFFICULTIES: {allowed_difficulties}
{source_section}
RULES:
1. Do NOT reproduce any question, passage or sentence verbatim from a real exam or other proprietary source.
2. Perform a strict entity swap: use completely fictional names, places, companies and scenarios.
3. Keep all math, logic and grammar mechanics identical to official exam style.
4. Difficulty must match {difficulty}: {difficulty_rubric}. (Easy = single-step, Medium = 2-3 steps, Hard = multi-concept or trap answers.)
5. For Reading_Writing questions, include a short passage (2-4 sentences) in item_text before the question.

Respond with ONLY a valid JSON object, no markdown, no extra text:
{schema}

Randomization seed offset: {seed_offset}"#.into(),
      repair_system: "You are a strict database evaluation engine. Respond ONLY with a strict JSON object.".into(),
      repair_user_template: r#"Below is a SAT question. Categorize it using EXACTLY these allowed values.
Do NOT make up your own tags. Pick the single best match.

ALLOWED CATEGORIES: {allowed_categories}
ALLOWED SUB_CATEGORIES:
{sub_categories_by_category}
ALLOWED DIFFICULTIES: {allowed_difficulties}

QUESTION TEXT:
{item_text}

Respond in plain JSON only (no markdown):
{"category": "<category>", "sub_category": "<sub_category>", "difficulty": "<difficulty>"}"#.into(),
    }
  }
}

/// Shape of the optional TOML file. Every section is optional.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
  pub run: RunSettings,
  pub generation: GenerationSettings,
  pub repair: RepairSettings,
  pub inspiration: InspirationSettings,
  pub prompts: Prompts,
}

impl FileConfig {
  pub fn from_toml_str(path: &str, s: &str) -> Result<Self, ConfigError> {
    toml::from_str(s).map_err(|source| ConfigError::Parse { path: path.to_string(), source })
  }
}

#[derive(Clone, Debug)]
pub struct Config {
  pub mode: RunMode,
  pub store: StoreConfig,
  pub model: ModelConfig,
  pub run: RunSettings,
  pub generation: GenerationSettings,
  pub repair: RepairSettings,
  pub inspiration: InspirationSettings,
  pub prompts: Prompts,
}

impl Config {
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|k| std::env::var(k).ok())
  }

  /// Build from an arbitrary key lookup (the process environment in production).
  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let require = |k: &'static str| get(k).ok_or(ConfigError::Missing(k));

    let store = StoreConfig {
      url: require("STORE_URL")?.trim_end_matches('/').to_string(),
      api_key: require("STORE_API_KEY")?,
      table: get("STORE_TABLE").unwrap_or_else(|| "question_bank".into()),
    };
    let model = ModelConfig {
      api_key: require("MODEL_API_KEY")?,
      base_url: get("MODEL_BASE_URL")
        .unwrap_or_else(|| "https://api.groq.com/openai/v1".into())
        .trim_end_matches('/')
        .to_string(),
      model: get("MODEL_NAME").unwrap_or_else(|| "llama-3.3-70b-versatile".into()),
      timeout: Duration::from_secs(parse_opt(get("MODEL_TIMEOUT_SECS"), "MODEL_TIMEOUT_SECS")?.unwrap_or(30)),
    };

    let file = match get("HARVESTER_CONFIG_PATH") {
      Some(path) => {
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        let cfg = FileConfig::from_toml_str(&path, &text)?;
        info!(target: "harvester", %path, "Loaded config overrides (TOML)");
        cfg
      }
      None => FileConfig::default(),
    };
    let FileConfig { mut run, generation, mut repair, inspiration, prompts } = file;

    if let Some(v) = parse_opt(get("QUESTIONS_PER_RUN"), "QUESTIONS_PER_RUN")? {
      run.questions_per_run = v;
    }
    if let Some(v) = parse_opt(get("TARGET_PER_BUCKET"), "TARGET_PER_BUCKET")? {
      run.target_per_bucket = v;
    }
    if let Some(v) = parse_opt(get("REPAIR_BATCH_SIZE"), "REPAIR_BATCH_SIZE")? {
      repair.batch_size = v;
    }
    if let Some(v) = parse_opt(get("REPAIR_SCAN_LIMIT"), "REPAIR_SCAN_LIMIT")? {
      repair.scan_limit = v;
    }
    let mode = parse_opt(get("HARVESTER_MODE"), "HARVESTER_MODE")?.unwrap_or(RunMode::Harvest);

    let cfg = Self { mode, store, model, run, generation, repair, inspiration, prompts };
    cfg.check()?;
    Ok(cfg)
  }

  fn check(&self) -> Result<(), ConfigError> {
    let invalid = |key: &str, reason: &str| ConfigError::Invalid { key: key.into(), reason: reason.into() };
    if !(self.store.url.starts_with("http://") || self.store.url.starts_with("https://")) {
      return Err(invalid("STORE_URL", "must be an http(s) URL"));
    }
    let (lo, hi) = (self.run.delay_min_secs, self.run.delay_max_secs);
    if !(lo >= 0.0 && hi >= lo && hi.is_finite()) {
      return Err(invalid("run.delay_min_secs/delay_max_secs", "need 0 <= min <= max"));
    }
    if self.generation.max_attempts == 0 {
      return Err(invalid("generation.max_attempts", "must be at least 1"));
    }
    let non_negative = |v: f64| v.is_finite() && v >= 0.0;
    if !(non_negative(self.generation.backoff_base_secs) && non_negative(self.repair.pause_secs)) {
      return Err(invalid("backoff_base_secs/pause_secs", "must be finite and non-negative"));
    }
    Ok(())
  }
}

fn parse_opt<T>(raw: Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
  T: FromStr,
  T::Err: Display,
{
  raw
    .map(|v| v.parse::<T>().map_err(|e| ConfigError::Invalid { key: key.to_string(), reason: e.to_string() }))
    .transpose()
}
