//! Session orchestrator
//!
//! ROUTER → HANDLER → END
//!
//! Each invocation holds the session's lock for its whole read-modify-write,
//! so turns of one session never interleave while different sessions run
//! concurrently.

use crate::error::AssistantError;
use crate::handlers::{Handlers, TurnContext};
use crate::ledger::LedgerWriter;
use crate::models::{HandlerKind, Message};
use crate::parser::{self, ParsedOutput};
use crate::router::Router;
use crate::state::{ConversationState, SessionLocks, SessionStore, StateUpdate};
use crate::Result;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const TRANSACTION_ADDED: &str = "Transaction added successfully!";
pub const TRANSACTION_FAILED: &str = "Transaction cannot be added due to internal error.";
pub const GENERIC_FAILURE: &str =
    "Sorry, I couldn't complete that request right now. Please try again.";

/// Identity of the caller at the session boundary
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: i64,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, user_id: i64) -> Self {
        Self {
            session_id: session_id.into(),
            user_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Router,
    Handler(HandlerKind),
    End,
}

type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct SessionOrchestrator {
    router: Router,
    handlers: Handlers,
    store: Arc<dyn SessionStore>,
    ledger: Arc<dyn LedgerWriter>,
    locks: SessionLocks,
    clock: Clock,
}

impl SessionOrchestrator {
    pub fn new(
        router: Router,
        handlers: Handlers,
        store: Arc<dyn SessionStore>,
        ledger: Arc<dyn LedgerWriter>,
    ) -> Self {
        Self {
            router,
            handlers,
            store,
            ledger,
            locks: SessionLocks::new(),
            clock: Arc::new(|| Utc::now().date_naive()),
        }
    }

    /// Replace the source of "today" used for prompts and `CURRENT_DATE`
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveDate + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Run one turn and return the handler's reply.
    ///
    /// On error nothing is saved; the session keeps its previous state.
    pub async fn invoke(&self, user_text: &str, session: &SessionContext) -> Result<Message> {
        let _guard = self.locks.acquire(&session.session_id).await;

        let mut state = self
            .store
            .load(&session.session_id)
            .await?
            .unwrap_or_else(ConversationState::new);
        state.append(Message::user(user_text));

        let turn = TurnContext {
            user_id: session.user_id,
            today: (self.clock)(),
        };

        debug!(
            session_id = %session.session_id,
            messages = state.message_count(),
            current_handler = HandlerKind::label(state.current_handler),
            "Invocation started"
        );

        let mut node = Node::Router;
        let mut reply = None;

        while node != Node::End {
            node = match node {
                Node::Router => Node::Handler(self.router.decide(&state).await),
                Node::Handler(kind) => {
                    let outcome = self.handlers.run(kind, &state, &turn).await?;
                    reply = Some(outcome.message.clone());
                    state = state.with_update(StateUpdate {
                        messages: vec![outcome.message],
                        current_handler: Some(outcome.handler),
                        handler_context: None,
                    });
                    Node::End
                }
                Node::End => Node::End,
            };
        }

        self.store.save(&session.session_id, &state).await?;

        info!(
            session_id = %session.session_id,
            handler = HandlerKind::label(state.current_handler),
            messages = state.message_count(),
            "Invocation complete"
        );

        reply.ok_or_else(|| AssistantError::State("handler produced no reply".to_string()))
    }

    /// Session boundary: always answers with display text.
    ///
    /// Insertion payloads are parsed and written with the session's own user
    /// id; any failure becomes a fixed user-facing message.
    pub async fn submit(&self, user_text: &str, session: &SessionContext) -> String {
        let reply = match self.invoke(user_text, session).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(session_id = %session.session_id, error = %e, "Invocation failed");
                return GENERIC_FAILURE.to_string();
            }
        };

        match parser::parse(&reply.content, session.user_id, (self.clock)()) {
            Ok(ParsedOutput::Reply(text)) => text,
            Ok(ParsedOutput::Entry(entry)) => match self.ledger.add_entry(&entry).await {
                Ok(expense_id) => {
                    info!(
                        session_id = %session.session_id,
                        expense_id,
                        "Insertion committed"
                    );
                    TRANSACTION_ADDED.to_string()
                }
                Err(e) => {
                    error!(session_id = %session.session_id, error = %e, "Ledger write failed");
                    TRANSACTION_FAILED.to_string()
                }
            },
            Err(e) => {
                warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "Could not parse insertion statement"
                );
                TRANSACTION_FAILED.to_string()
            }
        }
    }

    /// Current persisted state of a session, if any
    pub async fn session_state(&self, session_id: &str) -> Result<Option<ConversationState>> {
        self.store.load(session_id).await
    }
}
