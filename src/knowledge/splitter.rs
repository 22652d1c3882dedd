//! Text Splitting Module
//!
//! Recursive character splitter tuned for Traditional Chinese travel text.
//! The text is cut on the highest-priority separator it contains
//! (paragraph, line, `。`, `，`, space, character); pieces that are still too
//! long are cut again with the remaining separators, and short pieces are
//! merged back together with a character overlap between neighbours.
//!
//! Lengths are counted in `char`s, not bytes.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::loader::{DocumentMetadata, SourceDocument};

/// Separators in priority order
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", "。", "，", " ", ""];

// ============================================================================
// Split Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct SplitConfig {
    /// Maximum chunk length (characters)
    pub chunk_size: usize,
    /// Characters carried over from the previous chunk
    pub chunk_overlap: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            chunk_size: 300,
            chunk_overlap: 50,
        }
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// Text chunking strategy
pub trait Chunker: Send + Sync {
    fn chunk(&self, text: &str) -> Vec<String>;

    fn name(&self) -> &'static str;
}

/// A split piece of a source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub content: String,
    pub metadata: DocumentMetadata,
    /// Position within the parent document (0-based)
    pub chunk_index: usize,
}

// ============================================================================
// RecursiveSplitter
// ============================================================================

pub struct RecursiveSplitter {
    config: SplitConfig,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    pub fn new(config: SplitConfig) -> Self {
        Self {
            config,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SplitConfig::default())
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut final_chunks = Vec::new();

        // first separator present in the text ("" always matches)
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut good: Vec<String> = Vec::new();
        for piece in split_keep_separator(text, separator) {
            if char_len(&piece) < self.config.chunk_size {
                good.push(piece);
                continue;
            }

            if !good.is_empty() {
                final_chunks.extend(self.merge_splits(&good));
                good.clear();
            }

            if remaining.is_empty() {
                final_chunks.push(piece);
            } else {
                final_chunks.extend(self.split_recursive(&piece, remaining));
            }
        }

        if !good.is_empty() {
            final_chunks.extend(self.merge_splits(&good));
        }

        final_chunks
    }

    /// Greedily pack pieces into chunks of at most `chunk_size` characters,
    /// keeping up to `chunk_overlap` trailing characters for the next chunk.
    fn merge_splits(&self, splits: &[String]) -> Vec<String> {
        let chunk_size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in splits {
            let len = char_len(piece);

            if total + len > chunk_size {
                if total > chunk_size {
                    tracing::warn!(
                        "Created a chunk of size {}, which is longer than the specified {}",
                        total,
                        chunk_size
                    );
                }
                if !current.is_empty() {
                    if let Some(doc) = join_pieces(&current) {
                        docs.push(doc);
                    }
                    while total > overlap || (total + len > chunk_size && total > 0) {
                        match current.pop_front() {
                            Some(front) => total -= char_len(front),
                            None => break,
                        }
                    }
                }
            }

            current.push_back(piece);
            total += len;
        }

        if let Some(doc) = join_pieces(&current) {
            docs.push(doc);
        }

        docs
    }
}

impl Chunker for RecursiveSplitter {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        let mut chunks = self.split_recursive(text, &self.separators);
        chunks.retain(|c| !c.trim().is_empty());
        chunks
    }

    fn name(&self) -> &'static str {
        "RecursiveSplitter"
    }
}

/// Split every document, copying its metadata onto each chunk
pub fn split_documents(chunker: &dyn Chunker, documents: &[SourceDocument]) -> Vec<DocumentChunk> {
    let chunks: Vec<DocumentChunk> = documents
        .iter()
        .flat_map(|doc| {
            chunker
                .chunk(&doc.content)
                .into_iter()
                .enumerate()
                .map(|(i, content)| DocumentChunk {
                    content,
                    metadata: doc.metadata.clone(),
                    chunk_index: i,
                })
                .collect::<Vec<_>>()
        })
        .collect();

    tracing::info!(
        "Split {} documents into {} chunks ({})",
        documents.len(),
        chunks.len(),
        chunker.name()
    );
    chunks
}

// ============================================================================
// Helper Functions
// ============================================================================

#[inline]
fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split on `separator`, attaching it to the end of the preceding piece.
/// An empty separator splits into characters.
fn split_keep_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let parts: Vec<&str> = text.split(separator).collect();
    let last = parts.len() - 1;
    parts
        .into_iter()
        .enumerate()
        .map(|(i, part)| {
            if i < last {
                format!("{}{}", part, separator)
            } else {
                part.to_string()
            }
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn join_pieces(pieces: &VecDeque<&str>) -> Option<String> {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

pub fn recursive_splitter(config: SplitConfig) -> Box<dyn Chunker> {
    Box::new(RecursiveSplitter::new(config))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(chunk_size: usize, chunk_overlap: usize) -> RecursiveSplitter {
        RecursiveSplitter::new(SplitConfig {
            chunk_size,
            chunk_overlap,
        })
    }

    #[test]
    fn test_empty() {
        assert!(RecursiveSplitter::with_defaults().chunk("").is_empty());
        assert!(RecursiveSplitter::with_defaults().chunk(" \n ").is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = RecursiveSplitter::with_defaults().chunk("  阿里山日出 \n");
        assert_eq!(chunks, vec!["阿里山日出".to_string()]);
    }

    #[test]
    fn test_split_on_spaces() {
        let chunks = splitter(10, 3).chunk("aaaa bbbb cccc dddd");
        assert_eq!(chunks, vec!["aaaa bbbb", "cccc dddd"]);
    }

    #[test]
    fn test_overlap_carries_trailing_pieces() {
        let chunks = splitter(10, 4).chunk("ab cd ef gh ij");
        assert_eq!(chunks, vec!["ab cd ef", "ef gh ij"]);
    }

    #[test]
    fn test_chinese_full_stop() {
        let chunks = splitter(10, 0).chunk("第一句話很長。第二句話很長。第三句");
        assert_eq!(chunks, vec!["第一句話很長。", "第二句話很長。第三句"]);
    }

    #[test]
    fn test_character_fallback() {
        let chunks = splitter(5, 0).chunk("abcdefghij");
        assert_eq!(chunks, vec!["abcde", "fghij"]);
    }

    #[test]
    fn test_chunks_respect_size_in_chars() {
        let text = "台灣旅遊景點介紹，".repeat(40);
        let chunks = splitter(30, 5).chunk(&text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 30));
    }

    #[test]
    fn test_paragraphs_preferred() {
        let text = "第一段內容。\n\n第二段內容。";
        let chunks = splitter(8, 0).chunk(text);
        assert_eq!(chunks, vec!["第一段內容。", "第二段內容。"]);
    }

    #[test]
    fn test_split_keep_separator() {
        assert_eq!(split_keep_separator("a。b。", "。"), vec!["a。", "b。"]);
        assert_eq!(split_keep_separator("ab", ""), vec!["a", "b"]);
    }

    #[test]
    fn test_split_documents_keeps_metadata() {
        let docs = vec![SourceDocument {
            content: "aaaa bbbb cccc dddd".to_string(),
            metadata: DocumentMetadata {
                source: "attractions.csv".to_string(),
                row: Some(3),
                page: None,
            },
        }];

        let splitter = splitter(10, 0);
        let chunks = split_documents(&splitter, &docs);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[1].metadata.row, Some(3));
    }
}
