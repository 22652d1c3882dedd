//! Embedding module - text vectorisation through the Gemini API
//!
//! Chunks are embedded with the `RETRIEVAL_DOCUMENT` task type and queries
//! with `RETRIEVAL_QUERY`. Every vector is L2-normalised so that L2 distance
//! ranks the same way cosine similarity does.
//!
//! ## Usage
//! ```rust,ignore
//! let embedder = GeminiEmbedding::new(api_key, 768)?;
//! let embedding = embedder.embed_query("九份老街怎麼去?").await?;
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::RagConfig;
use crate::gemini::{GeminiTransport, RequestPacer, GEMINI_BASE_URL};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// Text -> vector interface
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a chunk that will be stored in the index
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a search query
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Batch of documents (default: sequential calls)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed_document(text).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

// ============================================================================
// Request Pacing
// ============================================================================

/// Free tier: 60 requests per minute, at least 1s apart
const REQUESTS_PER_WINDOW: usize = 60;
const WINDOW: Duration = Duration::from_secs(60);
const MIN_SPACING: Duration = Duration::from_millis(1000);

/// `batchEmbedContents` accepts at most 100 requests
const MAX_BATCH_REQUESTS: usize = 100;

pub const SUPPORTED_DIMENSIONS: [usize; 3] = [768, 1536, 3072];

/// Sliding window of recent request times
#[derive(Debug)]
struct SlidingWindow {
    sent: VecDeque<Instant>,
    capacity: usize,
    window: Duration,
    spacing: Duration,
}

impl SlidingWindow {
    fn new(capacity: usize, window: Duration, spacing: Duration) -> Self {
        Self {
            sent: VecDeque::with_capacity(capacity),
            capacity,
            window,
            spacing,
        }
    }

    /// How long the next request has to wait at `now`
    fn delay_at(&mut self, now: Instant) -> Duration {
        while let Some(&oldest) = self.sent.front() {
            if now.duration_since(oldest) >= self.window {
                self.sent.pop_front();
            } else {
                break;
            }
        }

        let spacing_wait = self
            .sent
            .back()
            .map(|&last| self.spacing.saturating_sub(now.duration_since(last)))
            .unwrap_or_default();

        let window_wait = if self.sent.len() >= self.capacity {
            self.sent
                .front()
                .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
                .unwrap_or_default()
        } else {
            Duration::ZERO
        };

        spacing_wait.max(window_wait)
    }

    fn record(&mut self, at: Instant) {
        self.sent.push_back(at);
    }
}

#[async_trait]
impl RequestPacer for Mutex<SlidingWindow> {
    async fn wait_turn(&self) {
        let mut window = self.lock().await;
        let delay = window.delay_at(Instant::now());
        if !delay.is_zero() {
            tracing::debug!("Embedding rate limit, waiting {:?}", delay);
            tokio::time::sleep(delay).await;
        }
        window.record(Instant::now());
    }
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

/// Gemini task types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

/// Gemini embedding client (gemini-embedding-001, MRL dimensions)
/// source: https://ai.google.dev/gemini-api/docs/embeddings
#[derive(Debug)]
pub struct GeminiEmbedding {
    transport: GeminiTransport,
    dimension: usize,
    pacer: Mutex<SlidingWindow>,
}

const MODEL: &str = "models/gemini-embedding-001";

impl GeminiEmbedding {
    /// `dimension` must be one of [`SUPPORTED_DIMENSIONS`]
    pub fn new(api_key: String, dimension: usize) -> Result<Self> {
        if !SUPPORTED_DIMENSIONS.contains(&dimension) {
            anyhow::bail!(
                "Invalid dimension: {}. Must be one of {:?}",
                dimension,
                SUPPORTED_DIMENSIONS
            );
        }

        Ok(Self {
            transport: GeminiTransport::new(api_key, Duration::from_secs(30))?,
            dimension,
            pacer: Mutex::new(SlidingWindow::new(REQUESTS_PER_WINDOW, WINDOW, MIN_SPACING)),
        })
    }

    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            anyhow::anyhow!(
                "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY.\n\
                 Get a key at: https://aistudio.google.com/app/apikey"
            )
        })?;
        let embedder = Self::new(api_key, config.embedding_dimension)?;
        tracing::info!("Using Gemini embedding (dimension: {})", embedder.dimension);
        Ok(embedder)
    }

    fn request(&self, text: &str, task: TaskType) -> EmbedRequest {
        EmbedRequest {
            model: MODEL,
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: task,
            output_dimensionality: self.dimension,
        }
    }

    async fn embed_one(&self, text: &str, task: TaskType) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let url = format!("{}/gemini-embedding-001:embedContent", GEMINI_BASE_URL);
        let response: EmbedResponse = self
            .transport
            .post(&url, &self.request(text, task), &self.pacer)
            .await?;
        Ok(l2_normalize(response.embedding.values))
    }

    /// One `batchEmbedContents` call; blank texts are answered locally
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = vec![vec![0.0; self.dimension]; texts.len()];
        let pending: Vec<usize> = (0..texts.len())
            .filter(|&i| !texts[i].trim().is_empty())
            .collect();
        if pending.is_empty() {
            return Ok(results);
        }

        let body = BatchEmbedRequest {
            requests: pending
                .iter()
                .map(|&i| self.request(&texts[i], TaskType::RetrievalDocument))
                .collect(),
        };
        let url = format!("{}/gemini-embedding-001:batchEmbedContents", GEMINI_BASE_URL);
        let response: BatchEmbedResponse = self.transport.post(&url, &body, &self.pacer).await?;

        if response.embeddings.len() != pending.len() {
            anyhow::bail!(
                "Gemini returned {} embeddings for {} texts",
                response.embeddings.len(),
                pending.len()
            );
        }
        for (slot, embedding) in pending.into_iter().zip(response.embeddings) {
            results[slot] = l2_normalize(embedding.values);
        }
        Ok(results)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest {
    model: &'static str,
    content: EmbedContent,
    task_type: TaskType,
    output_dimensionality: usize,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text, TaskType::RetrievalDocument).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text, TaskType::RetrievalQuery).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for (i, group) in texts.chunks(MAX_BATCH_REQUESTS).enumerate() {
            tracing::debug!("Embedding group {} ({} texts)", i + 1, group.len());
            results.extend(self.embed_many(group).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "gemini-embedding-001"
    }
}

/// Scale a vector to unit length (zero vectors are returned unchanged)
pub fn l2_normalize(mut values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
    values
}

// ============================================================================
// Tests
// ============================================================================
