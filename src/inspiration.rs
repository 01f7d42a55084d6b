//! Raw inspiration text, fetched once per run from a random public catalogue
//! page. The generator borrows topics from it and the text is kept with each
//! inserted record as `source_text`.

use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::USER_AGENT;
use tracing::{info, instrument, warn};

use crate::config::InspirationSettings;
use crate::util::truncate_bytes;

/// Material shared by every prompt of one run.
#[derive(Clone, Debug, Default)]
pub struct Inspiration {
  /// Random page/offset number; also the base of each prompt's seed offset.
  pub seed: u32,
  pub text: Option<String>,
}

impl Inspiration {
  pub fn none(seed: u32) -> Self {
    Self { seed, text: None }
  }
}

/// Pick a source and a page, fetch, and cap the body. Never fails: a fetch
/// error yields the configured fallback text.
#[instrument(level = "info", target = "harvester", skip_all)]
pub async fn fetch(settings: &InspirationSettings) -> Inspiration {
  let (seed, url) = {
    let mut rng = rand::thread_rng();
    let seed: u32 = rng.gen_range(1..=1000);
    let url = settings.sources.choose(&mut rng).map(|base| format!("{base}{seed}"));
    (seed, url)
  };
  let Some(url) = url else {
    return Inspiration::none(seed);
  };

  info!(target: "harvester", %url, "Fetching inspiration source");
  let text = match fetch_text(&url, settings).await {
    Ok(body) => body,
    Err(e) => {
      warn!(target: "harvester", %url, error = %e, "Could not fetch inspiration source; using fallback text");
      settings.fallback_text.clone()
    }
  };
  Inspiration { seed, text: Some(text) }
}

/// Stream the body and stop once `max_bytes` have arrived.
async fn fetch_text(url: &str, settings: &InspirationSettings) -> Result<String, reqwest::Error> {
  let client = reqwest::Client::builder()
    .timeout(Duration::from_secs(settings.timeout_secs))
    .build()?;
  let mut res = client
    .get(url)
    .header(USER_AGENT, concat!("question-harvester/", env!("CARGO_PKG_VERSION")))
    .send()
    .await?
    .error_for_status()?;

  let mut buf: Vec<u8> = Vec::with_capacity(settings.max_bytes);
  while buf.len() < settings.max_bytes {
    match res.chunk().await? {
      Some(chunk) => buf.extend_from_slice(&chunk),
      None => break,
    }
  }
  Ok(capped_text(&buf, settings.max_bytes))
}

/// Decode (lossily) and cap at a char boundary within `max_bytes`.
fn capped_text(bytes: &[u8], max_bytes: usize) -> String {
  let text = String::from_utf8_lossy(bytes);
  truncate_bytes(&text, max_bytes).to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn body_is_capped_on_a_char_boundary() {
    let body = "é".repeat(2000);
    let text = capped_text(body.as_bytes(), 3000);
    assert_eq!(text.len(), 3000);
    assert_eq!(capped_text("é".as_bytes(), 1), "");
    assert_eq!(capped_text(b"short", 3000), "short");
  }

  #[tokio::test]
  async fn no_sources_means_no_text() {
    let settings = InspirationSettings { sources: vec![], ..InspirationSettings::default() };
    let insp = fetch(&settings).await;
    assert!(insp.text.is_none());
    assert!((1..=1000).contains(&insp.seed));
  }

  #[tokio::test]
  async fn unreachable_source_falls_back() {
    let settings = InspirationSettings {
      sources: vec!["http://127.0.0.1:9/?page=".into()],
      timeout_secs: 2,
      ..InspirationSettings::default()
    };
    let insp = fetch(&settings).await;
    assert_eq!(insp.text.as_deref(), Some(settings.fallback_text.as_str()));
  }
}
