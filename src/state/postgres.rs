//! Postgres-backed session store
//!
//! One row per session holding the serialized `ConversationState`.

use super::{ConversationState, SessionStore};
use crate::error::AssistantError;
use crate::ledger::postgres::{row_scope_policy, unscoped};
use crate::Result;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

pub struct PgSessionStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS conversation_sessions (
                      session_id TEXT PRIMARY KEY,
                      state JSONB NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                // Hidden from scoped ledger query transactions
                sqlx::query(&row_scope_policy(
                    "conversation_sessions",
                    "conversation_sessions_unscoped",
                    &unscoped(),
                ))
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AssistantError::State(format!(
                    "Failed to initialize session schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionStore for PgSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT state FROM conversation_sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AssistantError::State(format!("Failed to load session {}: {}", session_id, e))
            })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let Json(state): Json<ConversationState> = row.try_get("state").map_err(|e| {
            AssistantError::State(format!("Corrupt state for session {}: {}", session_id, e))
        })?;

        debug!(
            session_id = %session_id,
            messages = state.message_count(),
            "Loaded session state"
        );

        Ok(Some(state))
    }

    async fn save(&self, session_id: &str, state: &ConversationState) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO conversation_sessions (session_id, state, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (session_id)
            DO UPDATE SET state = EXCLUDED.state, updated_at = NOW()
            "#,
        )
        .bind(session_id)
        .bind(Json(state))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AssistantError::State(format!("Failed to save session {}: {}", session_id, e))
        })?;

        Ok(())
    }
}
