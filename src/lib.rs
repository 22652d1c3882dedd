//! travel-rag - Taiwan travel Q&A backend
//!
//! Hybrid retrieval (LanceDB vectors + SQLite FTS5 keywords, weighted RRF)
//! over a travel knowledge base, answered by Gemini behind a JWT-protected
//! HTTP API with per-user query history.

pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
mod gemini;
pub mod knowledge;
pub mod llm;
pub mod rag;
pub mod server;

// Re-exports
pub use auth::{AuthError, AuthService, Claims};
pub use config::AppConfig;
pub use db::{Database, DbError, QueryRecord, User};
pub use embedding::{EmbeddingProvider, GeminiEmbedding};
pub use error::{ApiError, ApiResult};
pub use knowledge::{
    HybridConfig, HybridRetriever, HybridStats, KnowledgeStore, LanceVectorStore,
    RetrievedDocument, SearchMethod, SourceDocument, VectorStore,
};
pub use llm::{GeminiChat, LanguageModel};
pub use rag::{RagAnswer, RagError, TravelRagService};
pub use server::{build_router, serve};
