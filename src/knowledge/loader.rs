//! Document loading - CSV, PDF and plain-text sources
//!
//! CSV files produce one document per row, rendered as `header: value`
//! lines. PDFs produce one document per page.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// Where a document came from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// File path
    pub source: String,
    /// CSV row (0-based)
    pub row: Option<usize>,
    /// PDF page (1-based)
    pub page: Option<usize>,
}

/// A loaded (unsplit) document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Supported input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Pdf,
    Text,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "csv" => Some(SourceFormat::Csv),
            "pdf" => Some(SourceFormat::Pdf),
            "txt" => Some(SourceFormat::Text),
            _ => None,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Load a data file, picking the loader by extension
pub fn load_documents(path: &Path) -> Result<Vec<SourceDocument>> {
    if !path.exists() {
        bail!("Data file not found: {}", path.display());
    }

    let format = SourceFormat::from_path(path)
        .ok_or_else(|| anyhow::anyhow!("Unsupported file format: {}", path.display()))?;

    let documents = match format {
        SourceFormat::Csv => load_csv(path)?,
        SourceFormat::Pdf => load_pdf(path)?,
        SourceFormat::Text => load_text(path)?,
    };

    tracing::info!(
        "Loaded {} documents from {}",
        documents.len(),
        path.display()
    );
    Ok(documents)
}

/// One document per row: `header: value` lines in column order
pub fn load_csv(path: &Path) -> Result<Vec<SourceDocument>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV: {}", path.display()))?;

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let source = path.display().to_string();
    let mut documents = Vec::new();

    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read CSV row {}", row))?;

        let content = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| format!("{}: {}", header, value.trim()))
            .collect::<Vec<_>>()
            .join("\n");

        documents.push(SourceDocument {
            content,
            metadata: DocumentMetadata {
                source: source.clone(),
                row: Some(row),
                page: None,
            },
        });
    }

    Ok(documents)
}

pub fn load_text(path: &Path) -> Result<Vec<SourceDocument>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read text file: {}", path.display()))?;

    Ok(vec![SourceDocument {
        content,
        metadata: DocumentMetadata {
            source: path.display().to_string(),
            ..Default::default()
        },
    }])
}

pub fn load_pdf(path: &Path) -> Result<Vec<SourceDocument>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read PDF: {:?}", path))?;

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .with_context(|| format!("Failed to extract text from PDF: {:?}", path))?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Ok(vec![]);
    }

    let source = path.display().to_string();
    Ok(split_pdf_pages(&text)
        .into_iter()
        .enumerate()
        .map(|(i, content)| SourceDocument {
            content,
            metadata: DocumentMetadata {
                source: source.clone(),
                row: None,
                page: Some(i + 1),
            },
        })
        .collect())
}

/// Split extracted PDF text on form feeds
fn split_pdf_pages(text: &str) -> Vec<String> {
    let pages: Vec<String> = text
        .split('\x0c')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if pages.is_empty() {
        vec![text.trim().to_string()]
    } else {
        pages
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_csv_rows() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "attractions.csv",
            "\u{feff}名稱,地區,介紹\n九份老街,新北市, 山城老街 \n日月潭,南投縣,高山湖泊\n",
        );

        let docs = load_documents(&path).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].content, "名稱: 九份老街\n地區: 新北市\n介紹: 山城老街");
        assert_eq!(docs[0].metadata.row, Some(0));
        assert_eq!(docs[1].metadata.row, Some(1));
        assert!(docs[1].metadata.source.ends_with("attractions.csv"));
    }

    #[test]
    fn test_load_text() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "guide.txt", "墾丁是台灣最南端的度假勝地。");

        let docs = load_documents(&path).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].metadata.row, None);
        assert!(docs[0].content.contains("墾丁"));
    }

    #[test]
    fn test_missing_file() {
        let result = load_documents(Path::new("/nonexistent/attractions.csv"));
        assert!(result.is_err());
    }

    #[test]
    fn test_unsupported_format() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "data.json", "{}");
        let err = load_documents(&path).unwrap_err();
        assert!(err.to_string().contains("Unsupported file format"));
    }

    #[test]
    fn test_source_format_case_insensitive() {
        assert_eq!(
            SourceFormat::from_path(Path::new("a/B.CSV")),
            Some(SourceFormat::Csv)
        );
        assert_eq!(SourceFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_split_pdf_pages_with_formfeed() {
        let pages = split_pdf_pages("Page 1 content\x0cPage 2 content\x0c\x0cPage 3 content");
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0], "Page 1 content");
        assert_eq!(pages[2], "Page 3 content");
    }

    #[test]
    fn test_split_pdf_pages_no_separator() {
        let pages = split_pdf_pages("Just some text without page breaks");
        assert_eq!(pages.len(), 1);
    }
}
