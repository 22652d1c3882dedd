//! Application configuration
//!
//! Defaults mirror the production deployment; every field can be overridden
//! through environment variables (see [`AppConfig::from_env`]).

use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// One year
pub const MAX_TOKEN_EXPIRE_MINUTES: i64 = 365 * 24 * 60;

// ============================================================================
// Data Directory
// ============================================================================

/// Default data directory (~/.taiwan-travel-rag/)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".taiwan-travel-rag")
}

// ============================================================================
// Types
// ============================================================================

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed by CORS (credentials are allowed, so no wildcard)
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: [
                "http://localhost:4200",
                "http://localhost",
                "http://localhost:80",
                "http://frontend:80",
                "http://0.0.0.0:8000",
                "http://0.0.0.0:80",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// JWT settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    pub token_expire_minutes: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_expire_minutes: 30,
        }
    }
}

/// Retrieval / generation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Source data file (csv, pdf or txt). Defaults to `<data_dir>/attractions.csv`
    pub data_path: Option<PathBuf>,
    /// Gemini API key (GEMINI_API_KEY / GOOGLE_AI_API_KEY)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Results per retriever
    pub retriever_k: usize,
    pub vector_weight: f32,
    pub lexical_weight: f32,
    /// Alternative phrasings requested from the LLM (0 disables expansion)
    pub expansion_queries: usize,
    pub embedding_dimension: usize,
    pub llm_model: String,
    pub temperature: f32,
    /// Token bucket refill rate for LLM calls
    pub llm_requests_per_second: f64,
    pub llm_max_bucket_size: f64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            api_key: None,
            chunk_size: 300,
            chunk_overlap: 50,
            retriever_k: 5,
            vector_weight: 0.8,
            lexical_weight: 0.2,
            expansion_queries: 3,
            embedding_dimension: 768,
            llm_model: "gemini-1.5-flash".to_string(),
            temperature: 0.2,
            llm_requests_per_second: 0.05,
            llm_max_bucket_size: 10.0,
        }
    }
}

/// On-disk locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Users / history database. Defaults to `<data_dir>/database.db`
    pub database_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_path: None,
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("database.db"))
    }

    /// Source documents + FTS5 index
    pub fn knowledge_path(&self) -> PathBuf {
        self.data_dir.join("knowledge.db")
    }

    /// LanceDB directory
    pub fn vector_path(&self) -> PathBuf {
        self.data_dir.join("vectors.lance")
    }
}

// ============================================================================
// Loading
// ============================================================================

impl AppConfig {
    /// Load defaults overlaid with environment variables
    ///
    /// | variable | field |
    /// |---|---|
    /// | `GEMINI_API_KEY`, `GOOGLE_AI_API_KEY` | `rag.api_key` |
    /// | `SECRET_KEY`, `secret_key` | `auth.jwt_secret` |
    /// | `TRAVEL_RAG_HOST`, `TRAVEL_RAG_PORT` | `server.host`, `server.port` |
    /// | `TRAVEL_RAG_CORS_ORIGINS` (comma separated) | `server.cors_origins` |
    /// | `TRAVEL_RAG_TOKEN_EXPIRE_MINUTES` | `auth.token_expire_minutes` |
    /// | `TRAVEL_RAG_DATA_DIR`, `TRAVEL_RAG_DATABASE_PATH` | `storage.*` |
    /// | `TRAVEL_RAG_DATA_PATH` | `rag.data_path` |
    /// | `TRAVEL_RAG_LLM_MODEL` | `rag.llm_model` |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.rag.api_key = get("GEMINI_API_KEY").or_else(|| get("GOOGLE_AI_API_KEY"));

        if let Some(secret) = get("SECRET_KEY").or_else(|| get("secret_key")) {
            config.auth.jwt_secret = secret;
        }
        if let Some(host) = get("TRAVEL_RAG_HOST") {
            config.server.host = host;
        }
        if let Some(port) = get("TRAVEL_RAG_PORT") {
            config.server.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid TRAVEL_RAG_PORT '{}': {}", port, e))?;
        }
        if let Some(origins) = get("TRAVEL_RAG_CORS_ORIGINS") {
            config.server.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(minutes) = get("TRAVEL_RAG_TOKEN_EXPIRE_MINUTES") {
            config.auth.token_expire_minutes = minutes.parse().map_err(|e| {
                anyhow::anyhow!("Invalid TRAVEL_RAG_TOKEN_EXPIRE_MINUTES '{}': {}", minutes, e)
            })?;
        }
        if let Some(dir) = get("TRAVEL_RAG_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = get("TRAVEL_RAG_DATABASE_PATH") {
            config.storage.database_path = Some(PathBuf::from(path));
        }
        if let Some(path) = get("TRAVEL_RAG_DATA_PATH") {
            config.rag.data_path = Some(PathBuf::from(path));
        }
        if let Some(model) = get("TRAVEL_RAG_LLM_MODEL") {
            config.rag.llm_model = model;
        }

        Ok(config)
    }

    /// Source data file, resolved against the data directory
    pub fn data_path(&self) -> PathBuf {
        self.rag
            .data_path
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("attractions.csv"))
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            bail!("JWT secret is not set. Set SECRET_KEY in the environment.");
        }
        if !(1..=MAX_TOKEN_EXPIRE_MINUTES).contains(&self.auth.token_expire_minutes) {
            bail!(
                "Token lifetime must be between 1 and {} minutes, got {}",
                MAX_TOKEN_EXPIRE_MINUTES,
                self.auth.token_expire_minutes
            );
        }
        self.validate_rag()
    }

    /// Checks shared by the server and the offline CLI commands
    pub fn validate_rag(&self) -> Result<()> {
        if self.rag.chunk_size == 0 {
            bail!("chunk_size must be greater than zero");
        }
        if self.rag.chunk_overlap >= self.rag.chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.rag.chunk_overlap,
                self.rag.chunk_size
            );
        }
        if self.rag.retriever_k == 0 {
            bail!("retriever_k must be greater than zero");
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
