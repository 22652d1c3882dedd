//! Shared application state

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::auth::AuthService;
use crate::config::AppConfig;
use crate::db::Database;
use crate::rag::TravelRagService;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: AppConfig,
    db: Database,
    auth: AuthService,
    rag: Arc<TravelRagService>,
}

impl AppState {
    pub fn new(config: AppConfig, db: Database, rag: Arc<TravelRagService>) -> Self {
        let auth = AuthService::new(&config.auth);
        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                auth,
                rag,
            }),
        }
    }

    /// Open the database and wire the RAG service (not yet initialised)
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let db = Database::open(&config.storage.database_path())
            .context("Failed to open application database")?;
        let rag = TravelRagService::from_config(&config)
            .await
            .context("Failed to create RAG service")?;

        Ok(Self::new(config, db, Arc::new(rag)))
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn auth(&self) -> &AuthService {
        &self.inner.auth
    }

    pub fn rag(&self) -> &Arc<TravelRagService> {
        &self.inner.rag
    }
}
