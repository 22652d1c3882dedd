//! Vector Store - trait, in-memory implementation and similarity helpers

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use super::loader::DocumentMetadata;

// ============================================================================
// Types
// ============================================================================

/// Embedded chunk (for storage)
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// Position of the chunk in the ingest run (0-based)
    pub chunk_id: i64,
    pub metadata: DocumentMetadata,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
}

/// Vector search hit
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk_id: i64,
    pub metadata: DocumentMetadata,
    pub chunk_text: String,
    /// Higher is more similar
    pub similarity: f32,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize>;

    /// Nearest chunks, most similar first
    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>>;

    async fn count(&self) -> Result<usize>;

    /// Drop every vector
    async fn clear(&self) -> Result<()>;
}

// ============================================================================
// MemoryVectorStore
// ============================================================================

/// Brute-force cosine search over an in-memory list
#[derive(Default)]
pub struct MemoryVectorStore {
    entries: RwLock<Vec<VectorEntry>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize> {
        let mut stored = self
            .entries
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        stored.extend_from_slice(entries);
        Ok(entries.len())
    }

    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        let stored = self
            .entries
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut results: Vec<SearchResult> = stored
            .iter()
            .map(|entry| SearchResult {
                chunk_id: entry.chunk_id,
                metadata: entry.metadata.clone(),
                chunk_text: entry.chunk_text.clone(),
                similarity: cosine_similarity(query_embedding, &entry.embedding),
            })
            .collect();

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn count(&self) -> Result<usize> {
        let stored = self
            .entries
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(stored.len())
    }

    async fn clear(&self) -> Result<()> {
        self.entries
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?
            .clear();
        Ok(())
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Cosine similarity in [-1.0, 1.0]; 0.0 for empty or mismatched vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================
