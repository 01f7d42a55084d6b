//! Model-client abstraction.
//!
//! Callers only see [`ModelError`] variants; mapping a vendor's status codes
//! and error bodies onto them is the implementation's job (see `openai.rs`).

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::prompt::ChatPrompt;

#[derive(Clone, Debug)]
pub struct CompletionRequest {
  pub prompt: ChatPrompt,
  pub temperature: f32,
  pub max_tokens: Option<u32>,
  /// Ask the API to constrain output to a JSON object.
  pub json: bool,
}

#[derive(Debug, Error)]
pub enum ModelError {
  /// Upstream quota exceeded; safe to retry after waiting.
  #[error("rate limited by model API")]
  RateLimited { retry_after: Option<Duration> },
  #[error("model API returned HTTP {status}: {message}")]
  Status { status: u16, message: String },
  #[error("model API transport error: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("model API response could not be decoded: {0}")]
  Decode(String),
}

impl ModelError {
  pub fn is_rate_limit(&self) -> bool {
    matches!(self, ModelError::RateLimited { .. })
  }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
  /// One chat completion; returns the raw message text.
  async fn complete(&self, req: &CompletionRequest) -> Result<String, ModelError>;
}
