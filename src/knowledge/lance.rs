//! Persistent chunk vectors in a LanceDB table
//!
//! One row per chunk: id, source metadata, text and a fixed-width embedding.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::Table;

use super::loader::DocumentMetadata;
use super::vector::{SearchResult, VectorEntry, VectorStore};

const TABLE_NAME: &str = "chunks";

fn item_field() -> Arc<Field> {
    Arc::new(Field::new("item", DataType::Float32, true))
}

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB (Arrow columnar) vector store
pub struct LanceVectorStore {
    db: Connection,
    dimension: i32,
}

impl LanceVectorStore {
    /// Connect to (or create) the database directory at `path`. Every
    /// inserted vector must have `dimension` components.
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let uri = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Non UTF-8 vector store path: {}", path.display()))?;
        let db = lancedb::connect(uri)
            .execute()
            .await
            .with_context(|| format!("Failed to open LanceDB at {}", uri))?;

        Ok(Self {
            db,
            dimension: i32::try_from(dimension).context("Embedding dimension too large")?,
        })
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("chunk_id", DataType::Int64, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("row_index", DataType::Int64, true),
            Field::new("page", DataType::Int64, true),
            Field::new("chunk_text", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(item_field(), self.dimension),
                false,
            ),
        ])
    }

    fn entries_to_batch(&self, entries: &[VectorEntry]) -> Result<RecordBatch> {
        if let Some(bad) = entries
            .iter()
            .find(|e| e.embedding.len() != self.dimension as usize)
        {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {} (chunk {})",
                self.dimension,
                bad.embedding.len(),
                bad.chunk_id
            );
        }

        let chunk_ids: Vec<i64> = entries.iter().map(|e| e.chunk_id).collect();
        let sources: Vec<&str> = entries.iter().map(|e| e.metadata.source.as_str()).collect();
        let rows: Vec<Option<i64>> = entries
            .iter()
            .map(|e| e.metadata.row.map(|r| r as i64))
            .collect();
        let pages: Vec<Option<i64>> = entries
            .iter()
            .map(|e| e.metadata.page.map(|p| p as i64))
            .collect();
        let texts: Vec<&str> = entries.iter().map(|e| e.chunk_text.as_str()).collect();

        let values: Float32Array = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();
        let embeddings = FixedSizeListArray::try_new(
            item_field(),
            self.dimension,
            Arc::new(values),
            None,
        )
        .context("Failed to build embedding column")?;

        RecordBatch::try_new(
            Arc::new(self.schema()),
            vec![
                Arc::new(Int64Array::from(chunk_ids)),
                Arc::new(StringArray::from(sources)),
                Arc::new(Int64Array::from(rows)),
                Arc::new(Int64Array::from(pages)),
                Arc::new(StringArray::from(texts)),
                Arc::new(embeddings),
            ],
        )
        .context("Failed to build record batch")
    }

    /// `None` until the first insert creates the table
    async fn existing_table(&self) -> Result<Option<Table>> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list LanceDB tables")?;
        if !names.iter().any(|name| name == TABLE_NAME) {
            return Ok(None);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open vector table")?;
        Ok(Some(table))
    }
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| anyhow::anyhow!("Missing or mistyped column '{}'", name))
}

fn optional_usize(values: &Int64Array, i: usize) -> Option<usize> {
    values.is_valid(i).then(|| values.value(i) as usize)
}

/// Rows of one result batch; `_distance` is LanceDB's L2 distance
fn batch_to_results(batch: &RecordBatch) -> Result<Vec<SearchResult>> {
    let chunk_ids = column::<Int64Array>(batch, "chunk_id")?;
    let sources = column::<StringArray>(batch, "source")?;
    let rows = column::<Int64Array>(batch, "row_index")?;
    let pages = column::<Int64Array>(batch, "page")?;
    let texts = column::<StringArray>(batch, "chunk_text")?;
    let distances = column::<Float32Array>(batch, "_distance")?;

    Ok((0..batch.num_rows())
        .map(|i| SearchResult {
            chunk_id: chunk_ids.value(i),
            metadata: DocumentMetadata {
                source: sources.value(i).to_string(),
                row: optional_usize(rows, i),
                page: optional_usize(pages, i),
            },
            chunk_text: texts.value(i).to_string(),
            // unit vectors: L2 order == cosine order
            similarity: 1.0 / (1.0 + distances.value(i)),
        })
        .collect())
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.existing_table().await? {
            Some(table) => {
                table
                    .add(reader)
                    .execute()
                    .await
                    .context("Failed to append vectors")?;
            }
            None => {
                self.db
                    .create_table(TABLE_NAME, reader)
                    .execute()
                    .await
                    .context("Failed to create vector table")?;
            }
        }

        Ok(entries.len())
    }

    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        let Some(table) = self.existing_table().await? else {
            return Ok(vec![]);
        };

        let stream = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to build vector query")?
            .limit(limit)
            .execute()
            .await
            .context("Vector query failed")?;

        let batches: Vec<RecordBatch> = stream.try_collect().await?;
        let mut results = Vec::new();
        for batch in &batches {
            results.extend(batch_to_results(batch)?);
        }
        Ok(results)
    }

    async fn count(&self) -> Result<usize> {
        match self.existing_table().await? {
            Some(table) => table.count_rows(None).await.context("Failed to count vectors"),
            None => Ok(0),
        }
    }

    async fn clear(&self) -> Result<()> {
        if self.existing_table().await?.is_some() {
            self.db
                .drop_table(TABLE_NAME)
                .await
                .context("Failed to drop vector table")?;
            tracing::info!("Dropped vector table '{}'", TABLE_NAME);
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 8;

    fn entry(chunk_id: i64, fill: f32) -> VectorEntry {
        VectorEntry {
            chunk_id,
            metadata: DocumentMetadata {
                source: "attractions.csv".to_string(),
                row: Some(chunk_id as usize),
                page: None,
            },
            chunk_text: format!("景點 {}", chunk_id),
            embedding: vec![fill; DIM],
        }
    }

    #[tokio::test]
    async fn test_lance_store_basic() {
        let dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&dir.path().join("test.lance"), DIM)
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 0);

        let inserted = store
            .insert_batch(&[entry(0, 0.1), entry(1, 0.2)])
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(store.count().await.unwrap(), 2);

        // appends to the existing table
        store
            .insert_batch(&[entry(2, 0.3)])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_lance_search_returns_metadata() {
        let dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&dir.path().join("search.lance"), DIM)
            .await
            .unwrap();

        store
            .insert_batch(&[
                entry(0, 0.1),
                entry(1, 0.5),
                entry(2, 0.9),
            ])
            .await
            .unwrap();

        let results = store.search(&[0.9; DIM], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, 2);
        assert_eq!(results[0].metadata.row, Some(2));
        assert_eq!(results[0].metadata.page, None);
    }

    #[tokio::test]
    async fn test_lance_clear() {
        let dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&dir.path().join("clear.lance"), DIM)
            .await
            .unwrap();

        store
            .insert_batch(&[entry(0, 0.1)])
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.search(&[0.1; DIM], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&dir.path().join("dim.lance"), DIM)
            .await
            .unwrap();

        let mut entry = entry(0, 0.1);
        entry.embedding.pop();
        assert!(store.insert_batch(&[entry]).await.is_err());
    }
}
