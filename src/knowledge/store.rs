//! Knowledge Store - rusqlite source-document store with FTS5 BM25 search
//!
//! Holds the unsplit source documents (one per CSV row / PDF page) that back
//! the lexical retriever. FTS5's default tokenizer treats a run of Han
//! characters as a single token, so documents are indexed through
//! [`tokenize`], which emits character bigrams for CJK runs and lowercased
//! words for everything else.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::loader::{DocumentMetadata, SourceDocument};

// ============================================================================
// Types
// ============================================================================

/// Stored source document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: i64,
    pub content: String,
    pub metadata: DocumentMetadata,
    pub created_at: DateTime<Utc>,
}

/// FTS5 hit
#[derive(Debug, Clone)]
pub struct FtsSearchResult {
    pub doc_id: i64,
    pub content: String,
    pub metadata: DocumentMetadata,
    /// FTS5 bm25() value (lower is better, usually negative)
    pub bm25_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub total_content_bytes: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// KnowledgeStore
// ============================================================================

/// SQLite document store + FTS5 keyword index
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// Open (or create) the store
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                row_index INTEGER,
                page INTEGER,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source);",
        )
        .context("Failed to create documents table")?;

        // rowid = documents.id
        // source: https://www.sqlite.org/fts5.html
        conn.execute(
            "CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(tokens)",
            [],
        )
        .context("Failed to create FTS5 table")?;

        tracing::debug!("Knowledge store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// Store a document; identical content is stored once
    ///
    /// # Returns
    /// `(id, inserted)` where `inserted` is false for a duplicate
    pub fn add_document(&self, doc: &SourceDocument) -> Result<(i64, bool)> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let outcome = insert_document(&tx, doc)?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Store many documents in one transaction
    ///
    /// # Returns
    /// Number of newly inserted documents
    pub fn add_documents(&self, docs: &[SourceDocument]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut inserted = 0;
        for doc in docs {
            if insert_document(&tx, doc)?.1 {
                inserted += 1;
            }
        }

        tx.commit()?;
        tracing::info!(
            "Stored {} new documents ({} duplicates skipped)",
            inserted,
            docs.len() - inserted
        );
        Ok(inserted)
    }

    pub fn get_document(&self, id: i64) -> Result<Option<StoredDocument>> {
        let conn = self.lock()?;

        let doc = conn
            .query_row(
                "SELECT id, source, row_index, page, content, created_at
                 FROM documents WHERE id = ?1",
                params![id],
                row_to_document,
            )
            .optional()?;

        Ok(doc)
    }

    /// Remove every document (used before a full re-ingest)
    pub fn clear(&self) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM documents_fts", [])?;
        let rows = conn.execute("DELETE FROM documents", [])?;
        tracing::info!("Cleared {} documents from knowledge store", rows);
        Ok(rows)
    }

    /// FTS5 keyword search, best BM25 first
    /// source: https://www.sqlite.org/fts5.html#the_bm25_function
    pub fn search_fts(&self, query: &str, limit: usize) -> Result<Vec<FtsSearchResult>> {
        let match_expr = build_match_query(query);
        if match_expr.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT d.id, d.source, d.row_index, d.page, d.content, bm25(documents_fts)
            FROM documents_fts
            JOIN documents d ON d.id = documents_fts.rowid
            WHERE documents_fts MATCH ?1
            ORDER BY bm25(documents_fts)
            LIMIT ?2
            "#,
        )?;

        let results = stmt
            .query_map(params![match_expr, limit as i64], |row| {
                Ok(FtsSearchResult {
                    doc_id: row.get(0)?,
                    metadata: DocumentMetadata {
                        source: row.get(1)?,
                        row: row.get::<_, Option<i64>>(2)?.map(|r| r as usize),
                        page: row.get::<_, Option<i64>>(3)?.map(|p| p as usize),
                    },
                    content: row.get(4)?,
                    bm25_score: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(results)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;

        let total_size: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(content AS BLOB))), 0) FROM documents",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            document_count: count as usize,
            total_content_bytes: total_size as usize,
            db_path: self.db_path.clone(),
        })
    }

}

// ============================================================================
// Helper Functions
// ============================================================================

fn insert_document(tx: &rusqlite::Transaction<'_>, doc: &SourceDocument) -> Result<(i64, bool)> {
    let hash = content_hash(&doc.content);

    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM documents WHERE content_hash = ?1",
            params![hash],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok((id, false));
    }

    tx.execute(
        "INSERT INTO documents (source, row_index, page, content, content_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            doc.metadata.source,
            doc.metadata.row.map(|r| r as i64),
            doc.metadata.page.map(|p| p as i64),
            doc.content,
            hash,
            Utc::now().to_rfc3339(),
        ],
    )
    .context("Failed to insert document")?;

    let id = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO documents_fts(rowid, tokens) VALUES (?1, ?2)",
        params![id, tokenize(&doc.content).join(" ")],
    )
    .context("Failed to index document")?;

    Ok((id, true))
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredDocument> {
    Ok(StoredDocument {
        id: row.get(0)?,
        metadata: DocumentMetadata {
            source: row.get(1)?,
            row: row.get::<_, Option<i64>>(2)?.map(|r| r as usize),
            page: row.get::<_, Option<i64>>(3)?.map(|p| p as usize),
        },
        content: row.get(4)?,
        created_at: parse_datetime(row.get::<_, String>(5)?),
    })
}

/// SHA-256 of the content, hex encoded
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// RFC3339 -> DateTime<Utc>
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'      // Hiragana, Katakana
        | '\u{3400}'..='\u{4DBF}'    // CJK Extension A
        | '\u{4E00}'..='\u{9FFF}'    // CJK Unified Ideographs
        | '\u{AC00}'..='\u{D7AF}'    // Hangul
        | '\u{F900}'..='\u{FAFF}'    // CJK Compatibility Ideographs
        | '\u{20000}'..='\u{2A6DF}'  // CJK Extension B
    )
}

/// Lexical tokens: CJK runs become character bigrams (a lone character is
/// kept as a unigram), other alphanumeric runs become lowercased words.
pub fn tokenize(text: &str) -> Vec<String> {
    fn flush_run(run: &mut Vec<char>, out: &mut Vec<String>) {
        match run.len() {
            0 => {}
            1 => out.push(run[0].to_string()),
            _ => out.extend(run.windows(2).map(|w| w.iter().collect::<String>())),
        }
        run.clear();
    }

    fn flush_word(word: &mut String, out: &mut Vec<String>) {
        if !word.is_empty() {
            out.push(std::mem::take(word));
        }
    }

    let mut tokens = Vec::new();
    let mut run: Vec<char> = Vec::new();
    let mut word = String::new();

    for c in text.chars() {
        if is_cjk(c) {
            flush_word(&mut word, &mut tokens);
            run.push(c);
        } else if c.is_alphanumeric() {
            flush_run(&mut run, &mut tokens);
            word.extend(c.to_lowercase());
        } else {
            flush_run(&mut run, &mut tokens);
            flush_word(&mut word, &mut tokens);
        }
    }
    flush_run(&mut run, &mut tokens);
    flush_word(&mut word, &mut tokens);

    tokens
}

/// FTS5 MATCH expression: every distinct token quoted, OR-ed together
/// source: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn build_match_query(query: &str) -> String {
    let mut seen = std::collections::HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

// ============================================================================
// Tests
// ============================================================================
