//! Hybrid retrieval - FTS5 + vector store merged with weighted RRF
//!
//! The vector side ranks chunks, the lexical side ranks whole source
//! documents. Both lists are fused with weighted Reciprocal Rank Fusion and
//! de-duplicated by page content.
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::embedding::EmbeddingProvider;

use super::loader::{DocumentMetadata, SourceDocument};
use super::splitter::{split_documents, Chunker};
use super::store::{FtsSearchResult, KnowledgeStore};
use super::vector::{SearchResult, VectorEntry, VectorStore};

/// RRF rank constant
pub const RRF_C: f32 = 60.0;

/// Chunks embedded per request batch during indexing
const EMBED_BATCH_SIZE: usize = 32;

// ============================================================================
// Types
// ============================================================================

/// Fused retrieval hit
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
    /// Weighted RRF score (higher is better)
    pub score: f32,
    pub method: SearchMethod,
}

/// Which retrievers returned a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Vector,
    Lexical,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct HybridConfig {
    /// Hits requested from each retriever
    pub k: usize,
    pub vector_weight: f32,
    pub lexical_weight: f32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            k: 5,
            vector_weight: 0.8,
            lexical_weight: 0.2,
        }
    }
}

/// Result of an indexing run
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub documents_added: usize,
    pub documents_skipped: usize,
    pub chunks_indexed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HybridStats {
    pub document_count: usize,
    pub vector_count: usize,
    pub total_content_bytes: usize,
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// SQLite FTS5 (lexical) + vector store, fused with weighted RRF
pub struct HybridRetriever {
    store: Arc<KnowledgeStore>,
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: HybridConfig,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<KnowledgeStore>,
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: HybridConfig,
    ) -> Self {
        Self {
            store,
            vector,
            embedder,
            config,
        }
    }

    /// Store source documents, then split, embed and index the new ones.
    ///
    /// Documents already present (same content hash) are skipped entirely.
    pub async fn index(
        &self,
        documents: &[SourceDocument],
        chunker: &dyn Chunker,
    ) -> Result<IndexReport> {
        let mut report = IndexReport::default();
        let mut fresh = Vec::new();

        for doc in documents {
            let (_, inserted) = self
                .store
                .add_document(doc)
                .context("Failed to add document to store")?;
            if inserted {
                fresh.push(doc.clone());
                report.documents_added += 1;
            } else {
                report.documents_skipped += 1;
            }
        }

        let chunks = split_documents(chunker, &fresh);
        if chunks.is_empty() {
            tracing::warn!("No new chunks to index");
            return Ok(report);
        }

        let first_id = self.vector.count().await? as i64;

        for (batch_no, batch) in chunks.chunks(EMBED_BATCH_SIZE).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embeddings = self
                .embedder
                .embed_batch(&texts)
                .await
                .context("Failed to embed chunks")?;

            let offset = first_id + (batch_no * EMBED_BATCH_SIZE) as i64;
            let entries: Vec<VectorEntry> = batch
                .iter()
                .zip(embeddings)
                .enumerate()
                .map(|(i, (chunk, embedding))| VectorEntry {
                    chunk_id: offset + i as i64,
                    metadata: chunk.metadata.clone(),
                    chunk_text: chunk.content.clone(),
                    embedding,
                })
                .collect();

            report.chunks_indexed += self
                .vector
                .insert_batch(&entries)
                .await
                .context("Failed to insert vectors")?;

            tracing::info!(
                "Indexed {}/{} chunks",
                report.chunks_indexed,
                chunks.len()
            );
        }

        tracing::info!(
            "Indexing done: {} documents added, {} skipped, {} chunks",
            report.documents_added,
            report.documents_skipped,
            report.chunks_indexed
        );

        Ok(report)
    }

    /// Ensemble retrieval for one query.
    ///
    /// Falls back to vector-only when no source documents are stored.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedDocument>> {
        let k = self.config.k;

        let query_embedding = self
            .embedder
            .embed_query(query)
            .await
            .context("Failed to embed query")?;
        let vector_hits = self.vector.search(&query_embedding, k).await?;

        if self.store.stats()?.document_count == 0 {
            tracing::debug!("No source documents, using vector retrieval only");
            return Ok(weighted_rrf(&vector_hits, &[], &self.config));
        }

        let lexical_hits = self.store.search_fts(query, k)?;
        Ok(weighted_rrf(&vector_hits, &lexical_hits, &self.config))
    }

    /// Drop every stored document and vector
    pub async fn clear(&self) -> Result<()> {
        let removed = self.store.clear()?;
        self.vector.clear().await?;
        tracing::info!("Cleared knowledge base ({} documents)", removed);
        Ok(())
    }

    pub async fn stats(&self) -> Result<HybridStats> {
        let store_stats = self.store.stats()?;
        let vector_count = self.vector.count().await?;

        Ok(HybridStats {
            document_count: store_stats.document_count,
            vector_count,
            total_content_bytes: store_stats.total_content_bytes,
        })
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    pub fn vector_store(&self) -> &dyn VectorStore {
        self.vector.as_ref()
    }
}

// ============================================================================
// Weighted RRF
// ============================================================================

struct Fused {
    content: String,
    metadata: DocumentMetadata,
    score: f32,
    vector: bool,
    lexical: bool,
}

/// Weighted Reciprocal Rank Fusion
///
/// score(d) = sum over retrievers of weight / (rank + c), rank 1-based.
/// Hits with identical content are merged; ties keep first-seen order
/// (vector hits first).
pub fn weighted_rrf(
    vector_hits: &[SearchResult],
    lexical_hits: &[FtsSearchResult],
    config: &HybridConfig,
) -> Vec<RetrievedDocument> {
    let mut fused: Vec<Fused> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    let mut add = |content: &str, metadata: &DocumentMetadata, score: f32, from_vector: bool| {
        let slot = *index.entry(content.to_string()).or_insert_with(|| {
            fused.push(Fused {
                content: content.to_string(),
                metadata: metadata.clone(),
                score: 0.0,
                vector: false,
                lexical: false,
            });
            fused.len() - 1
        });
        let entry = &mut fused[slot];
        entry.score += score;
        if from_vector {
            entry.vector = true;
        } else {
            entry.lexical = true;
        }
    };

    for (rank, hit) in vector_hits.iter().enumerate() {
        let score = config.vector_weight / (rank as f32 + 1.0 + RRF_C);
        add(&hit.chunk_text, &hit.metadata, score, true);
    }
    for (rank, hit) in lexical_hits.iter().enumerate() {
        let score = config.lexical_weight / (rank as f32 + 1.0 + RRF_C);
        add(&hit.content, &hit.metadata, score, false);
    }

    // stable: equal scores keep insertion order
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    fused
        .into_iter()
        .map(|f| RetrievedDocument {
            method: match (f.vector, f.lexical) {
                (true, true) => SearchMethod::Hybrid,
                (false, true) => SearchMethod::Lexical,
                _ => SearchMethod::Vector,
            },
            content: f.content,
            metadata: f.metadata,
            score: f.score,
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
