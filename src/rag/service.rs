//! Travel RAG service - initialisation and query answering
//!
//! load -> split -> embed -> index on first start; afterwards the existing
//! vector store is reused. Queries go through multi-query expansion, hybrid
//! retrieval and a single "stuff" prompt.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::embedding::{EmbeddingProvider, GeminiEmbedding};
use crate::knowledge::{
    load_documents, recursive_splitter, Chunker, HybridConfig, HybridRetriever, HybridStats,
    IndexReport, KnowledgeStore, LanceVectorStore, RetrievedDocument, SplitConfig, VectorStore,
};
use crate::llm::{GeminiChat, LanguageModel};

use super::expansion::QueryExpander;
use super::prompt::{build_answer_prompt, preview};

/// Characters of each source shown in the log
const SOURCE_PREVIEW_CHARS: usize = 150;

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("RAG system is not initialised")]
    NotReady,

    #[error(transparent)]
    Pipeline(#[from] anyhow::Error),
}

/// Generated answer with the documents it was grounded on
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<RetrievedDocument>,
}

// ============================================================================
// TravelRagService
// ============================================================================

pub struct TravelRagService {
    retriever: HybridRetriever,
    llm: Arc<dyn LanguageModel>,
    expander: QueryExpander,
    chunker: Box<dyn Chunker>,
    data_path: PathBuf,
    ready: AtomicBool,
    init_lock: Mutex<()>,
}

impl TravelRagService {
    pub fn new(
        retriever: HybridRetriever,
        llm: Arc<dyn LanguageModel>,
        chunker: Box<dyn Chunker>,
        data_path: PathBuf,
        expansion_queries: usize,
    ) -> Result<Self> {
        let expander = QueryExpander::new(llm.clone(), expansion_queries)?;
        Ok(Self {
            retriever,
            llm,
            expander,
            chunker,
            data_path,
            ready: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        })
    }

    /// Gemini + LanceDB + SQLite wiring from configuration
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let data_dir = &config.storage.data_dir;
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;
        }

        let store = KnowledgeStore::open(&config.storage.knowledge_path())
            .context("Failed to open knowledge store")?;

        let embedder =
            GeminiEmbedding::from_config(&config.rag).context("Failed to create embedder")?;

        let vector = LanceVectorStore::open(&config.storage.vector_path(), embedder.dimension())
            .await
            .context("Failed to open vector store")?;

        let llm = GeminiChat::from_config(&config.rag).context("Failed to create LLM client")?;

        let retriever = HybridRetriever::new(
            Arc::new(store),
            Arc::new(vector) as Arc<dyn VectorStore>,
            Arc::new(embedder) as Arc<dyn EmbeddingProvider>,
            HybridConfig {
                k: config.rag.retriever_k,
                vector_weight: config.rag.vector_weight,
                lexical_weight: config.rag.lexical_weight,
            },
        );

        let chunker = recursive_splitter(SplitConfig {
            chunk_size: config.rag.chunk_size,
            chunk_overlap: config.rag.chunk_overlap,
        });

        Self::new(
            retriever,
            Arc::new(llm),
            chunker,
            config.data_path(),
            config.rag.expansion_queries,
        )
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Bring the service up. Returns `false` (and stays not ready) on failure.
    pub async fn initialize(&self) -> bool {
        let _guard = self.init_lock.lock().await;

        match self.try_initialize().await {
            Ok(()) => {
                self.ready.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                tracing::error!("RAG initialisation failed: {:#}", e);
                false
            }
        }
    }

    async fn try_initialize(&self) -> Result<()> {
        let stats = self.retriever.stats().await?;

        if stats.vector_count > 0 {
            tracing::info!(
                "Found existing vector store ({} vectors), reusing it",
                stats.vector_count
            );
            if stats.document_count == 0 {
                // lexical side is optional
                match load_documents(&self.data_path) {
                    Ok(docs) => {
                        let added = self.retriever.store().add_documents(&docs)?;
                        tracing::info!("Loaded {} source documents for keyword search", added);
                    }
                    Err(e) => {
                        tracing::warn!("No source documents, vector search only: {:#}", e);
                    }
                }
            }
            return Ok(());
        }

        tracing::info!("No vector store found, building from {}", self.data_path.display());
        let report = self.build_index(&self.data_path).await?;
        if report.chunks_indexed == 0 {
            anyhow::bail!("No chunks indexed from {}", self.data_path.display());
        }
        Ok(())
    }

    async fn build_index(&self, path: &Path) -> Result<IndexReport> {
        let documents = load_documents(path)?;
        if documents.is_empty() {
            anyhow::bail!("No documents loaded from {}", path.display());
        }

        // stale source documents would be skipped as duplicates
        self.retriever.clear().await?;
        match self.retriever.index(&documents, self.chunker.as_ref()).await {
            Ok(report) => Ok(report),
            Err(e) => {
                // a partial index must not be reused on the next start
                if let Err(clear_err) = self.retriever.clear().await {
                    tracing::warn!("Failed to discard partial index: {:#}", clear_err);
                }
                Err(e)
            }
        }
    }

    /// Drop the knowledge base and index `path` (or the configured data file)
    pub async fn rebuild(&self, path: Option<&Path>) -> Result<IndexReport> {
        let _guard = self.init_lock.lock().await;
        self.ready.store(false, Ordering::SeqCst);

        let path = path.unwrap_or(self.data_path.as_path());
        let report = self.build_index(path).await?;
        if report.chunks_indexed > 0 {
            self.ready.store(true, Ordering::SeqCst);
        }
        Ok(report)
    }

    /// Expand, retrieve and generate
    pub async fn process_query(&self, query: &str) -> Result<RagAnswer, RagError> {
        if !self.is_ready() {
            tracing::error!("Query received before the RAG system was initialised");
            return Err(RagError::NotReady);
        }

        let sources = self.retrieve(query).await?;
        let prompt = build_answer_prompt(&sources, query);
        let answer = self
            .llm
            .generate(&prompt)
            .await
            .context("Failed to generate answer")?;

        for (i, doc) in sources.iter().enumerate() {
            tracing::info!("Retrieved document {}:", i + 1);
            tracing::info!("Content: {}", preview(&doc.content, SOURCE_PREVIEW_CHARS));
            tracing::info!("Source: {}", doc.metadata.source);
        }

        Ok(RagAnswer { answer, sources })
    }

    /// Union of the ensemble results for every expanded query
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedDocument>> {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();

        for q in self.expander.expand(query).await {
            for doc in self.retriever.retrieve(&q).await? {
                if seen.insert(doc.content.clone()) {
                    unique.push(doc);
                }
            }
        }

        Ok(unique)
    }

    /// Single hybrid search, no expansion or generation
    pub async fn search(&self, query: &str) -> Result<Vec<RetrievedDocument>> {
        self.retriever.retrieve(query).await
    }

    pub async fn stats(&self) -> Result<HybridStats> {
        self.retriever.stats().await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{
        DocumentMetadata, FakeEmbedder, MemoryVectorStore, RecursiveSplitter, VectorEntry,
    };
    use crate::rag::tests::FakeLlm;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    const CSV: &str = "名稱,地區,介紹\n九份老街,新北市,山城老街與芋圓\n日月潭,南投縣,高山湖泊與纜車\n太魯閣,花蓮縣,大理石峽谷\n";

    fn write_csv(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("attractions.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(CSV.as_bytes()).unwrap();
        path
    }

    fn service(dir: &TempDir, llm: Arc<FakeLlm>, data_path: PathBuf) -> TravelRagService {
        service_with(
            dir,
            llm,
            Arc::new(FakeEmbedder),
            Arc::new(MemoryVectorStore::new()),
            data_path,
        )
    }

    fn service_with(
        dir: &TempDir,
        llm: Arc<FakeLlm>,
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<MemoryVectorStore>,
        data_path: PathBuf,
    ) -> TravelRagService {
        let store = KnowledgeStore::open(&dir.path().join("knowledge.db")).unwrap();
        let retriever = HybridRetriever::new(Arc::new(store), vectors, embedder, HybridConfig::default());
        TravelRagService::new(
            retriever,
            llm,
            Box::new(RecursiveSplitter::with_defaults()),
            data_path,
            3,
        )
        .unwrap()
    }

    /// Embeds normally for the first `limit` documents, then fails
    struct ExhaustedEmbedder {
        limit: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for ExhaustedEmbedder {
        async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.limit {
                anyhow::bail!("Rate limit exceeded (429)");
            }
            FakeEmbedder.embed_document(text).await
        }

        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            FakeEmbedder.embed_query(text).await
        }

        fn dimension(&self) -> usize {
            FakeEmbedder.dimension()
        }

        fn name(&self) -> &str {
            "exhausted"
        }
    }

    async fn seed_vector(vectors: &MemoryVectorStore) {
        let entry = VectorEntry {
            chunk_id: 0,
            metadata: DocumentMetadata {
                source: "attractions.csv".to_string(),
                row: Some(0),
                page: None,
            },
            chunk_text: "名稱: 九份老街".to_string(),
            embedding: vec![0.25; 16],
        };
        vectors.insert_batch(&[entry]).await.unwrap();
    }

    #[tokio::test]
    async fn test_not_ready_before_initialize() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir);
        let svc = service(&dir, Arc::new(FakeLlm::answering("ok")), path);

        assert!(!svc.is_ready());
        assert!(matches!(
            svc.process_query("日月潭").await,
            Err(RagError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_initialize_and_answer() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir);
        let llm = Arc::new(FakeLlm::answering("日月潭可以搭纜車"));
        let svc = service(&dir, llm.clone(), path);

        assert!(svc.initialize().await);
        assert!(svc.is_ready());

        let stats = svc.stats().await.unwrap();
        assert_eq!(stats.document_count, 3);
        assert_eq!(stats.vector_count, 3);

        let answer = svc.process_query("日月潭纜車").await.unwrap();
        assert_eq!(answer.answer, "日月潭可以搭纜車");
        assert!(answer.sources[0].content.contains("日月潭"));

        // sources are unique by content
        let unique: HashSet<_> = answer.sources.iter().map(|d| &d.content).collect();
        assert_eq!(unique.len(), answer.sources.len());

        // expansion prompt + answer prompt
        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("用戶問題: 日月潭纜車"));
        assert!(prompts[1].contains("名稱: 日月潭"));
    }

    #[tokio::test]
    async fn test_initialize_missing_file() {
        let dir = TempDir::new().unwrap();
        let svc = service(
            &dir,
            Arc::new(FakeLlm::answering("ok")),
            dir.path().join("missing.csv"),
        );

        assert!(!svc.initialize().await);
        assert!(!svc.is_ready());
    }

    #[tokio::test]
    async fn test_initialize_reuses_existing_vectors() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir);
        let svc = service(&dir, Arc::new(FakeLlm::answering("ok")), path);
        assert!(svc.initialize().await);

        // second initialise must not duplicate anything
        assert!(svc.initialize().await);
        assert_eq!(svc.stats().await.unwrap().vector_count, 3);
    }

    #[tokio::test]
    async fn test_failed_build_leaves_no_partial_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attractions.csv");
        let mut csv = String::from("名稱,介紹\n");
        for i in 0..40 {
            csv.push_str(&format!("景點{},第{}個推薦景點\n", i, i));
        }
        std::fs::write(&path, csv).unwrap();

        let vectors = Arc::new(MemoryVectorStore::new());
        let embedder = Arc::new(ExhaustedEmbedder {
            limit: 32,
            calls: AtomicUsize::new(0),
        });
        let svc = service_with(
            &dir,
            Arc::new(FakeLlm::answering("ok")),
            embedder,
            vectors.clone(),
            path,
        );

        // first batch of 32 succeeds, the second fails
        assert!(!svc.initialize().await);
        let stats = svc.stats().await.unwrap();
        assert_eq!(stats.vector_count, 0);
        assert_eq!(stats.document_count, 0);

        // nothing left to reuse, so the retry rebuilds and fails again
        assert!(!svc.initialize().await);
        assert!(!svc.is_ready());
        assert_eq!(vectors.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reuse_vectors_loads_source_documents() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir);
        let vectors = Arc::new(MemoryVectorStore::new());
        seed_vector(&vectors).await;

        let svc = service_with(
            &dir,
            Arc::new(FakeLlm::answering("ok")),
            Arc::new(FakeEmbedder),
            vectors,
            path,
        );

        assert!(svc.initialize().await);
        assert!(svc.is_ready());
        let stats = svc.stats().await.unwrap();
        // lexical side filled from the data file, vectors untouched
        assert_eq!(stats.document_count, 3);
        assert_eq!(stats.vector_count, 1);
    }

    #[tokio::test]
    async fn test_reuse_vectors_without_data_file() {
        let dir = TempDir::new().unwrap();
        let vectors = Arc::new(MemoryVectorStore::new());
        seed_vector(&vectors).await;

        let svc = service_with(
            &dir,
            Arc::new(FakeLlm::answering("ok")),
            Arc::new(FakeEmbedder),
            vectors,
            dir.path().join("missing.csv"),
        );

        // vector-only retrieval
        assert!(svc.initialize().await);
        assert!(svc.is_ready());
        let stats = svc.stats().await.unwrap();
        assert_eq!(stats.document_count, 0);
        assert_eq!(stats.vector_count, 1);

        let results = svc.search("九份").await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_is_pipeline_error() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir);
        let svc = service(&dir, Arc::new(FakeLlm::failing()), path);
        assert!(svc.initialize().await);

        assert!(matches!(
            svc.process_query("太魯閣").await,
            Err(RagError::Pipeline(_))
        ));
    }

    #[tokio::test]
    async fn test_search_skips_llm() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir);
        let llm = Arc::new(FakeLlm::answering("ok"));
        let svc = service(&dir, llm.clone(), path);
        svc.rebuild(None).await.unwrap();

        let results = svc.search("太魯閣峽谷").await.unwrap();
        assert!(results.iter().any(|d| d.content.contains("太魯閣")));
        assert!(llm.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_from_other_file() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir);
        let svc = service(&dir, Arc::new(FakeLlm::answering("ok")), path);
        assert!(svc.initialize().await);

        let other = dir.path().join("guide.txt");
        std::fs::write(&other, "墾丁是台灣最南端的度假勝地。").unwrap();

        let report = svc.rebuild(Some(other.as_path())).await.unwrap();
        assert_eq!(report.documents_added, 1);
        assert!(svc.is_ready());

        let stats = svc.stats().await.unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.vector_count, 1);
    }
}
