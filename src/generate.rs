//! Generation client: one composed prompt in, one parsed candidate out.
//!
//! Retry policy:
//! - `RateLimited` -> sleep `backoff_base * 2^attempt` (or the server's hint), retry
//!   up to `max_attempts` total;
//! - output that is not a JSON object -> fail at once (malformed output does
//!   not self-correct);
//! - any other model error -> fail at once.
//!
//! Failures come back as values; nothing propagates past this boundary.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, instrument, warn};

use crate::config::GenerationSettings;
use crate::domain::CandidateItem;
use crate::model::{CompletionRequest, ModelClient, ModelError};
use crate::prompt::ChatPrompt;
use crate::util::{strip_code_fences, trunc_for_log};

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum GenerationFailure {
  #[error("rate limited on every attempt")]
  RateLimited,
  #[error("model output was not a usable JSON object")]
  Malformed,
  #[error("model call failed")]
  Upstream,
}

pub struct Generator {
  model: Arc<dyn ModelClient>,
  settings: GenerationSettings,
}

impl Generator {
  pub fn new(model: Arc<dyn ModelClient>, settings: GenerationSettings) -> Self {
    Self { model, settings }
  }

  fn backoff(&self, attempt: u32) -> Duration {
    let secs = self.settings.backoff_base_secs * 2f64.powi(attempt.min(i32::MAX as u32) as i32);
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
  }

  #[instrument(level = "debug", target = "model", skip_all)]
  pub async fn generate(&self, prompt: ChatPrompt) -> Result<CandidateItem, GenerationFailure> {
    let req = CompletionRequest {
      prompt,
      temperature: self.settings.temperature,
      max_tokens: Some(self.settings.max_tokens),
      json: true,
    };
    let attempts = self.settings.max_attempts.max(1);

    for attempt in 0..attempts {
      match self.model.complete(&req).await {
        Ok(text) => {
          return parse_candidate(&text).map_err(|e| {
            error!(target: "model", attempt = attempt + 1, error = %e, raw = %trunc_for_log(&text, 200), "Model output parse error");
            GenerationFailure::Malformed
          });
        }
        Err(ModelError::RateLimited { retry_after }) => {
          if attempt + 1 == attempts {
            break;
          }
          let wait = retry_after.unwrap_or_else(|| self.backoff(attempt));
          warn!(target: "model", attempt = attempt + 1, ?wait, "Rate limit hit; backing off");
          tokio::time::sleep(wait).await;
        }
        Err(e) => {
          error!(target: "model", attempt = attempt + 1, error = %e, "Model call failed");
          return Err(GenerationFailure::Upstream);
        }
      }
    }

    error!(target: "model", attempts, "All retries exhausted (rate limited)");
    Err(GenerationFailure::RateLimited)
  }
}

/// Parse model text as a JSON object candidate (markdown fences tolerated).
pub fn parse_candidate(text: &str) -> Result<CandidateItem, String> {
  let value: serde_json::Value = serde_json::from_str(strip_code_fences(text)).map_err(|e| e.to_string())?;
  if !value.is_object() {
    return Err("top-level JSON value is not an object".into());
  }
  serde_json::from_value(value).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{Reply, ScriptedModel};

  fn settings() -> GenerationSettings {
    GenerationSettings { backoff_base_secs: 0.0, ..GenerationSettings::default() }
  }

  fn prompt() -> ChatPrompt {
    ChatPrompt { system: "s".into(), user: "u".into() }
  }

  #[tokio::test]
  async fn parses_fenced_json() {
    let model = Arc::new(ScriptedModel::new([Reply::text("```json\n{\"item_text\":\"q\",\"correct_answer\":\"4\"}\n```")]));
    let gen = Generator::new(model.clone(), settings());
    let c = gen.generate(prompt()).await.unwrap();
    assert_eq!(c.item_text().as_deref(), Some("q"));
    assert_eq!(model.calls(), 1);
    assert!(model.requests()[0].json);
  }

  #[tokio::test]
  async fn retries_rate_limits_then_succeeds() {
    let model = Arc::new(ScriptedModel::new([
      Reply::RateLimited,
      Reply::RateLimited,
      Reply::text(r#"{"item_text":"q"}"#),
    ]));
    let gen = Generator::new(model.clone(), settings());
    assert!(gen.generate(prompt()).await.is_ok());
    assert_eq!(model.calls(), 3);
  }

  #[tokio::test]
  async fn gives_up_after_max_attempts() {
    let model = Arc::new(ScriptedModel::new([Reply::RateLimited, Reply::RateLimited, Reply::RateLimited, Reply::RateLimited]));
    let gen = Generator::new(model.clone(), settings());
    assert_eq!(gen.generate(prompt()).await.unwrap_err(), GenerationFailure::RateLimited);
    assert_eq!(model.calls(), 3);
  }

  #[tokio::test]
  async fn malformed_output_is_not_retried() {
    let model = Arc::new(ScriptedModel::new([Reply::text("Sure! Here is your question:"), Reply::text("{}")]));
    let gen = Generator::new(model.clone(), settings());
    assert_eq!(gen.generate(prompt()).await.unwrap_err(), GenerationFailure::Malformed);
    assert_eq!(model.calls(), 1);

    let model = Arc::new(ScriptedModel::new([Reply::text("[1, 2, 3]")]));
    let gen = Generator::new(model, settings());
    assert_eq!(gen.generate(prompt()).await.unwrap_err(), GenerationFailure::Malformed);
  }

  #[tokio::test]
  async fn other_errors_fail_immediately() {
    let model = Arc::new(ScriptedModel::new([Reply::Status(500), Reply::text("{}")]));
    let gen = Generator::new(model.clone(), settings());
    assert_eq!(gen.generate(prompt()).await.unwrap_err(), GenerationFailure::Upstream);
    assert_eq!(model.calls(), 1);
  }

  #[test]
  fn backoff_doubles() {
    let gen = Generator::new(
      Arc::new(ScriptedModel::new([])),
      GenerationSettings { backoff_base_secs: 10.0, ..GenerationSettings::default() },
    );
    assert_eq!(gen.backoff(0), Duration::from_secs(10));
    assert_eq!(gen.backoff(1), Duration::from_secs(20));
    assert_eq!(gen.backoff(2), Duration::from_secs(40));
    assert_eq!(gen.backoff(2000), Duration::MAX);
  }
}
