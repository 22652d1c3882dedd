//! LLM module - answer generation through Gemini `generateContent`
//!
//! Calls are paced by a client-side token bucket. The free tier allows very
//! few requests, so the default refill rate is one request every 20 seconds
//! with bursts of up to 10.

use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::RagConfig;
use crate::gemini::{GeminiTransport, RequestPacer, GEMINI_BASE_URL};

// ============================================================================
// LanguageModel Trait
// ============================================================================

/// Text generation interface
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for a single-turn prompt
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Model identifier (for logging)
    fn model(&self) -> &str;
}

// ============================================================================
// Token Bucket
// ============================================================================

/// In-memory token bucket
///
/// Tokens refill at `requests_per_second` up to `max_bucket_size`; each
/// request consumes one. Waiters poll every `check_every`.
#[derive(Debug)]
pub struct TokenBucket {
    requests_per_second: f64,
    max_bucket_size: f64,
    check_every: Duration,
    available: f64,
    last: Option<Instant>,
}

impl TokenBucket {
    pub fn new(requests_per_second: f64, max_bucket_size: f64, check_every: Duration) -> Self {
        Self {
            requests_per_second,
            max_bucket_size,
            check_every,
            // one request may go through immediately
            available: 1.0_f64.min(max_bucket_size),
            last: None,
        }
    }

    fn try_acquire_at(&mut self, now: Instant) -> bool {
        let last = *self.last.get_or_insert(now);
        let elapsed = now.saturating_duration_since(last).as_secs_f64();
        let refill = elapsed * self.requests_per_second;
        if refill >= 1.0 {
            self.available += refill;
            self.last = Some(now);
        }
        self.available = self.available.min(self.max_bucket_size);

        if self.available >= 1.0 {
            self.available -= 1.0;
            true
        } else {
            false
        }
    }

    /// Consume one token if available
    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }
}

/// Wait until the shared bucket hands out a token
#[async_trait]
impl RequestPacer for Mutex<TokenBucket> {
    async fn wait_turn(&self) {
        loop {
            let wait = {
                let mut bucket = self.lock().await;
                if bucket.try_acquire() {
                    return;
                }
                bucket.check_every
            };
            tokio::time::sleep(wait).await;
        }
    }
}

// ============================================================================
// Gemini Chat
// ============================================================================

/// Gemini chat client
pub struct GeminiChat {
    transport: GeminiTransport,
    model: String,
    temperature: f32,
    limiter: Mutex<TokenBucket>,
}

impl GeminiChat {
    pub fn new(api_key: String, model: String, temperature: f32, limiter: TokenBucket) -> Result<Self> {
        Ok(Self {
            transport: GeminiTransport::new(api_key, Duration::from_secs(120))?,
            model,
            temperature,
            limiter: Mutex::new(limiter),
        })
    }

    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("API key not found. Set GEMINI_API_KEY."))?;
        let limiter = TokenBucket::new(
            config.llm_requests_per_second,
            config.llm_max_bucket_size,
            Duration::from_millis(100),
        );
        tracing::info!(
            "Using Gemini chat model {} (temperature {})",
            config.llm_model,
            config.temperature
        );
        Self::new(
            api_key,
            config.llm_model.clone(),
            config.temperature,
            limiter,
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", GEMINI_BASE_URL, self.model)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Result<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            let reason = self
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "empty response".to_string());
            anyhow::bail!("Gemini returned no text ({})", reason);
        }
        Ok(text)
    }
}

#[async_trait]
impl LanguageModel for GeminiChat {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        };

        let response: GenerateResponse = self
            .transport
            .post(&self.endpoint(), &request, &self.limiter)
            .await?;
        response.into_text()
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_first_request_passes() {
        let mut bucket = TokenBucket::new(0.05, 10.0, Duration::from_millis(100));
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(0.05, 10.0, Duration::from_millis(100));
        let start = Instant::now();
        assert!(bucket.try_acquire_at(start));
        assert!(!bucket.try_acquire_at(start + Duration::from_secs(10)));
        // 20s at 0.05 rps refills one token
        assert!(bucket.try_acquire_at(start + Duration::from_secs(20)));
    }

    #[test]
    fn test_bucket_caps_burst() {
        let mut bucket = TokenBucket::new(1.0, 2.0, Duration::from_millis(100));
        let start = Instant::now();
        assert!(bucket.try_acquire_at(start));

        let later = start + Duration::from_secs(60);
        assert!(bucket.try_acquire_at(later));
        assert!(bucket.try_acquire_at(later));
        assert!(!bucket.try_acquire_at(later));
    }

    #[test]
    fn test_response_text_joined() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"台北"},{"text":"101"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.into_text().unwrap(), "台北101");
    }

    #[test]
    fn test_blocked_response_is_error() {
        let body = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let parsed: GenerateResponse = serde_json::from_str(body).unwrap();
        let err = parsed.into_text().unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_endpoint_uses_model() {
        let chat = GeminiChat::new(
            "key".to_string(),
            "gemini-1.5-flash".to_string(),
            0.2,
            TokenBucket::new(1.0, 1.0, Duration::from_millis(10)),
        )
        .unwrap();
        assert!(chat.endpoint().ends_with("/gemini-1.5-flash:generateContent"));
        assert_eq!(chat.model(), "gemini-1.5-flash");
    }
}
