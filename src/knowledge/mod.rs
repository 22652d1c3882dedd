//! Knowledge module - hybrid RAG knowledge base
//!
//! - Loader: CSV / PDF / TXT source documents
//! - Splitter: recursive character splitter
//! - SQLite: source documents + FTS5 keyword search
//! - LanceDB: vector search (ANN)
//! - Hybrid: weighted RRF over both

mod loader;
mod splitter;
mod store;
mod vector;
mod lance;
mod hybrid;

// Re-exports
pub use loader::{
    load_csv, load_documents, load_pdf, load_text, DocumentMetadata, SourceDocument,
    SourceFormat,
};
pub use splitter::{
    recursive_splitter, split_documents, Chunker, DocumentChunk,
    RecursiveSplitter, SplitConfig, DEFAULT_SEPARATORS,
};
pub use store::{
    content_hash, tokenize, FtsSearchResult, KnowledgeStore, StoreStats, StoredDocument,
};
pub use vector::{cosine_similarity, MemoryVectorStore, SearchResult, VectorEntry, VectorStore};
pub use lance::LanceVectorStore;
pub use hybrid::{
    weighted_rrf, HybridConfig, HybridRetriever, HybridStats, IndexReport, RetrievedDocument,
    SearchMethod, RRF_C,
};

#[cfg(test)]
pub(crate) use hybrid::tests::FakeEmbedder;
