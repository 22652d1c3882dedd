//! Shared Gemini REST transport
//!
//! Both the embedding and the chat client POST JSON to
//! `generativelanguage.googleapis.com` with the key in `x-goog-api-key`,
//! retry transport errors and 429s with exponential backoff, and decode the
//! same error envelope.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub(crate) const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;

/// Client-side pacing applied before every attempt
#[async_trait]
pub(crate) trait RequestPacer: Send + Sync {
    async fn wait_turn(&self);
}

/// Gemini error envelope
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt))
}

/// Error message for a non-success, non-429 response
fn api_error(status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    match serde_json::from_str::<GeminiError>(body) {
        Ok(envelope) => anyhow::anyhow!(
            "Gemini API error ({}): {}",
            envelope.error.status,
            envelope.error.message
        ),
        Err(_) => anyhow::anyhow!("Gemini API error ({}): {}", status, body),
    }
}

#[derive(Debug, Clone)]
pub(crate) struct GeminiTransport {
    client: reqwest::Client,
    api_key: String,
}

impl GeminiTransport {
    pub(crate) fn new(api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, api_key })
    }

    /// POST `body` to `url`, pacing each attempt through `pacer`
    pub(crate) async fn post<B, R>(&self, url: &str, body: &B, pacer: &dyn RequestPacer) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            pacer.wait_turn().await;

            let response = match self
                .client
                .post(url)
                .header("x-goog-api-key", &self.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!(
                        "Gemini request failed (attempt {}/{}): {}",
                        attempt + 1,
                        MAX_RETRIES + 1,
                        e
                    );
                    last_error = Some(anyhow::anyhow!("Gemini request failed: {}", e));
                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(backoff(attempt)).await;
                    }
                    continue;
                }
            };

            let status = response.status();
            let text = response
                .text()
                .await
                .context("Failed to read Gemini response body")?;

            if status.is_success() {
                return serde_json::from_str(&text).context("Failed to parse Gemini response");
            }

            if status != reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(api_error(status, &text));
            }

            tracing::warn!(
                "Gemini rate limit (429), backing off {:?} (attempt {}/{})",
                backoff(attempt),
                attempt + 1,
                MAX_RETRIES + 1
            );
            last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));
            if attempt < MAX_RETRIES {
                tokio::time::sleep(backoff(attempt)).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Gemini request failed after {} retries", MAX_RETRIES)))
    }
}
