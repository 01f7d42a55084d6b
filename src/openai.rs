//! Minimal OpenAI-compatible chat client (Groq, OpenAI, or any
//! `/chat/completions` endpoint).
//!
//! We only call chat.completions and request either plain text or a strict JSON object.
//! Calls are instrumented and log model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key. Vendor-specific rate-limit signals are
//! folded into `ModelError::RateLimited` here and nowhere else.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::ModelConfig;
use crate::model::{CompletionRequest, ModelClient, ModelError};

#[derive(Clone)]
pub struct OpenAI {
  client: reqwest::Client,
  api_key: String,
  pub base_url: String,
  pub model: String,
}

impl OpenAI {
  pub fn new(cfg: &ModelConfig) -> Result<Self, ModelError> {
    let client = reqwest::Client::builder().timeout(cfg.timeout).build()?;
    Ok(Self {
      client,
      api_key: cfg.api_key.clone(),
      base_url: cfg.base_url.clone(),
      model: cfg.model.clone(),
    })
  }
}

#[async_trait]
impl ModelClient for OpenAI {
  #[instrument(level = "info", target = "model", skip(self, req), fields(model = %self.model, json = req.json, prompt_len = req.prompt.user.len()))]
  async fn complete(&self, req: &CompletionRequest) -> Result<String, ModelError> {
    let url = format!("{}/chat/completions", self.base_url);
    let body = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: req.prompt.system.clone() },
        ChatMessageReq { role: "user".into(), content: req.prompt.user.clone() },
      ],
      temperature: req.temperature,
      response_format: req.json.then(|| ResponseFormat { r#type: "json_object".into() }),
      max_tokens: req.max_tokens,
    };

    let start = std::time::Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, concat!("question-harvester/", env!("CARGO_PKG_VERSION")))
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&body).send().await?;

    let status = res.status();
    if !status.is_success() {
      let retry_after = retry_after_hint(res.headers());
      let text = res.text().await.unwrap_or_default();
      return Err(classify_error(status, retry_after, &text));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| ModelError::Decode(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(target: "model", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "Model usage");
    }
    let text = body.choices.into_iter().next()
      .and_then(|c| c.message.content)
      .unwrap_or_default().trim().to_string();
    debug!(target: "model", elapsed = ?start.elapsed(), response_len = text.len(), "Model response received");
    Ok(text)
  }
}

/// Longest server hint we honor; anything beyond falls back to computed backoff.
const MAX_RETRY_AFTER_SECS: f64 = 300.0;

fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
  let secs = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse::<f64>().ok()?;
  if !(0.0..MAX_RETRY_AFTER_SECS).contains(&secs) {
    return None;
  }
  Duration::try_from_secs_f64(secs).ok()
}

/// Map a failed HTTP exchange onto the typed error taxonomy.
/// 429, or a body whose error code/type mentions a rate limit, is retryable.
fn classify_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ModelError {
  let err = parse_error_body(body);
  let body_says_rate_limit = err.as_ref().map_or(false, |e| {
    [e.code.as_deref(), e.r#type.as_deref()].into_iter().flatten().any(|s| s.contains("rate_limit"))
  });
  if status == StatusCode::TOO_MANY_REQUESTS || body_says_rate_limit {
    return ModelError::RateLimited { retry_after };
  }
  let message = err.map(|e| e.message).unwrap_or_else(|| crate::util::trunc_for_log(body, 200));
  ModelError::Status { status: status.as_u16(), message }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ErrorBody {
  message: String,
  #[serde(default, rename = "type")] r#type: Option<String>,
  #[serde(default)] code: Option<String>,
}

/// Extract the `{"error": {...}}` object OpenAI-style APIs return.
fn parse_error_body(body: &str) -> Option<ErrorBody> {
  #[derive(Deserialize)]
  struct EWrap { error: ErrorBody }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error)
}
