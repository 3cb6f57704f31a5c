//! Component wiring shared by the binaries

use crate::agent::SessionOrchestrator;
use crate::config::AppConfig;
use crate::handlers::Handlers;
use crate::ledger::{InMemoryLedger, LedgerReader, LedgerWriter, PgLedger};
use crate::llm::{GeminiClient, LanguageModel, ScriptedModel};
use crate::models::Completion;
use crate::router::Router;
use crate::state::{InMemorySessionStore, PgSessionStore, SessionStore};
use crate::tools::create_default_registry;
use crate::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};

pub const OFFLINE_REPLY: &str =
    "The language model is not configured. Set GEMINI_API_KEY to enable replies.";

/// Everything a front end needs
pub struct AppServices {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub reader: Arc<dyn LedgerReader>,
    pub writer: Arc<dyn LedgerWriter>,
}

impl AppServices {
    /// Postgres when `DATABASE_URL` is set, in-memory otherwise.
    /// Without an API key every turn gets `OFFLINE_REPLY`.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let model: Arc<dyn LanguageModel> = if config.llm.has_api_key() {
            info!(model = %config.llm.model, "Using Gemini");
            Arc::new(GeminiClient::new(config.llm.clone())?)
        } else {
            warn!("GEMINI_API_KEY not set, running with the offline model");
            Arc::new(offline_model())
        };

        let (store, reader, writer): (
            Arc<dyn SessionStore>,
            Arc<dyn LedgerReader>,
            Arc<dyn LedgerWriter>,
        ) = match &config.storage.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.storage.max_connections)
                    .connect(url)
                    .await?;
                info!("Connected to Postgres");
                let ledger = Arc::new(PgLedger::new(pool.clone()));
                let store: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(pool));
                let reader: Arc<dyn LedgerReader> = ledger.clone();
                let writer: Arc<dyn LedgerWriter> = ledger;
                (store, reader, writer)
            }
            None => {
                warn!("DATABASE_URL not set, sessions and expenses are kept in memory");
                let ledger = Arc::new(InMemoryLedger::new());
                let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
                let reader: Arc<dyn LedgerReader> = ledger.clone();
                let writer: Arc<dyn LedgerWriter> = ledger;
                (store, reader, writer)
            }
        };

        let tools = create_default_registry(&config.tools)?;
        let handlers = Handlers::new(model.clone(), tools, reader.clone(), config);
        let orchestrator =
            SessionOrchestrator::new(Router::new(model), handlers, store, writer.clone());

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            reader,
            writer,
        })
    }
}

/// Answers every call with `OFFLINE_REPLY`; the router falls back to `query`
pub fn offline_model() -> ScriptedModel {
    ScriptedModel::from_fn(|_, _| Completion::text(OFFLINE_REPLY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::SessionContext;

    #[tokio::test]
    async fn test_offline_services_answer() {
        let services = AppServices::from_config(&AppConfig::default()).await.unwrap();
        let reply = services
            .orchestrator
            .submit("hello", &SessionContext::new("offline", 1))
            .await;
        assert_eq!(reply, OFFLINE_REPLY);
        assert!(services.reader.recent_entries(1, 5).await.unwrap().is_empty());
    }
}
