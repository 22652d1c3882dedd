//! CLI module
//!
//! travel-rag commands: run the API server, (re)build the knowledge base,
//! ask a one-shot question, search without generation, show status.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::knowledge::{KnowledgeStore, SearchMethod};
use crate::rag::TravelRagService;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "travel-rag")]
#[command(version, about = "Taiwan travel Q&A backend (hybrid RAG)", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Listen address (overrides TRAVEL_RAG_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides TRAVEL_RAG_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Rebuild the knowledge base from a data file
    Ingest {
        /// CSV, PDF or TXT file (defaults to the configured data file)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Answer a travel question
    Ask {
        question: String,

        /// Print the retrieved source documents
        #[arg(short, long)]
        sources: bool,
    },

    /// Hybrid search without answer generation
    Search {
        query: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Show configuration and index status
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

pub async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::Serve { host, port } => cmd_serve(config, host, port).await,
        Commands::Ingest { file } => cmd_ingest(config, file).await,
        Commands::Ask { question, sources } => cmd_ask(config, &question, sources).await,
        Commands::Search { query, limit } => cmd_search(config, &query, limit).await,
        Commands::Status => cmd_status(config).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_serve(mut config: AppConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    crate::server::serve(config).await
}

async fn cmd_ingest(config: AppConfig, file: Option<PathBuf>) -> Result<()> {
    let service = open_service(&config).await?;
    let path = file.unwrap_or_else(|| config.data_path());

    println!("[*] Indexing {}", path.display());
    let report = service
        .rebuild(Some(&path))
        .await
        .context("Failed to build knowledge base")?;

    println!(
        "[OK] {} documents added, {} duplicates skipped, {} chunks indexed",
        report.documents_added, report.documents_skipped, report.chunks_indexed
    );
    Ok(())
}

async fn cmd_ask(config: AppConfig, question: &str, show_sources: bool) -> Result<()> {
    let service = open_service(&config).await?;
    if !service.initialize().await {
        bail!("RAG system could not be initialised (see log above)");
    }

    let answer = service.process_query(question).await?;
    println!("\n{}\n", answer.answer.trim());

    if show_sources {
        println!("[*] Sources ({}):", answer.sources.len());
        for (i, doc) in answer.sources.iter().enumerate() {
            println!("{}. {}", i + 1, truncate_text(&doc.content, 120));
            println!("   {}", describe_source(&doc.metadata));
        }
    }
    Ok(())
}

async fn cmd_search(config: AppConfig, query: &str, limit: usize) -> Result<()> {
    let service = open_service(&config).await?;
    let mut results = service.search(query).await.context("Search failed")?;
    results.truncate(limit);

    if results.is_empty() {
        println!("\n[!] No results.");
        return Ok(());
    }

    println!("\n[OK] {} results:\n", results.len());
    for (i, result) in results.iter().enumerate() {
        let method = match result.method {
            SearchMethod::Vector => "VEC",
            SearchMethod::Lexical => "FTS",
            SearchMethod::Hybrid => "HYB",
        };
        println!("{}. [{}] [score: {:.4}]", i + 1, method, result.score);
        println!("   {}", describe_source(&result.metadata));
        println!("   {}", truncate_text(&result.content, 200));
        println!();
    }
    Ok(())
}

async fn cmd_status(config: AppConfig) -> Result<()> {
    println!("travel-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] Data directory: {}", config.storage.data_dir.display());
    println!("[*] Data file: {}", config.data_path().display());
    println!("[*] Database: {}", config.storage.database_path().display());

    if config.rag.api_key.is_some() {
        println!("[OK] API key: set");
    } else {
        println!("[!] API key: not set");
        println!("    export GEMINI_API_KEY=your-key");
    }

    if config.auth.jwt_secret.is_empty() {
        println!("[!] JWT secret: not set (export SECRET_KEY=...)");
    } else {
        println!("[OK] JWT secret: set");
    }

    let knowledge_path = config.storage.knowledge_path();
    if knowledge_path.exists() {
        match KnowledgeStore::open(&knowledge_path).and_then(|store| store.stats()) {
            Ok(stats) => {
                println!("[OK] Source documents: {}", stats.document_count);
                println!(
                    "     Total content: {}",
                    format_bytes(stats.total_content_bytes)
                );
            }
            Err(e) => println!("[!] Knowledge store unavailable: {}", e),
        }
    } else {
        println!("[!] Knowledge base not built yet (run `travel-rag ingest`)");
    }

    // vector store needs the embedder config
    if config.rag.api_key.is_some() {
        match open_service(&config).await {
            Ok(service) => match service.stats().await {
                Ok(stats) => println!("[OK] Vector index: {} chunks", stats.vector_count),
                Err(e) => tracing::debug!("Vector stats failed: {}", e),
            },
            Err(e) => tracing::debug!("RAG service unavailable: {}", e),
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

async fn open_service(config: &AppConfig) -> Result<TravelRagService> {
    config.validate_rag()?;
    if config.rag.api_key.is_none() {
        bail!(
            "API key not set.\n\n\
             export GEMINI_API_KEY=your-api-key\n  \
             or\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             Get a key: https://aistudio.google.com/app/apikey"
        );
    }
    TravelRagService::from_config(config)
        .await
        .context("Failed to create RAG service")
}

fn describe_source(metadata: &crate::knowledge::DocumentMetadata) -> String {
    match (metadata.row, metadata.page) {
        (Some(row), _) => format!("{} (row {})", metadata.source, row),
        (None, Some(page)) => format!("{} (page {})", metadata.source, page),
        (None, None) => metadata.source.clone(),
    }
}

/// Single-line, char-safe truncation
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::DocumentMetadata;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from(["travel-rag", "serve", "--port", "9000"]).unwrap();
        match cli.command {
            Commands::Serve { host, port } => {
                assert_eq!(host, None);
                assert_eq!(port, Some(9000));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_parse_ask() {
        let cli = Cli::try_parse_from(["travel-rag", "ask", "九份怎麼去?", "--sources"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Ask { ref question, sources: true } if question == "九份怎麼去?"
        ));
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
        assert_eq!(truncate_text("阿里山日出雲海", 3), "阿里山...");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_describe_source() {
        let csv = DocumentMetadata {
            source: "attractions.csv".to_string(),
            row: Some(4),
            page: None,
        };
        assert_eq!(describe_source(&csv), "attractions.csv (row 4)");

        let pdf = DocumentMetadata {
            source: "guide.pdf".to_string(),
            row: None,
            page: Some(2),
        };
        assert_eq!(describe_source(&pdf), "guide.pdf (page 2)");
    }
}
