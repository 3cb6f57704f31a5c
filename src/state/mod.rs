//! Conversation state and its per-session persistence
//!
//! `ConversationState` is the record threaded through every turn.
//! `SessionStore` persists it keyed by session id; `SessionLocks`
//! serializes the read-modify-write of one session.

use crate::models::{HandlerKind, Message};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

pub mod postgres;
pub use postgres::PgSessionStore;

pub type HandlerContext = serde_json::Map<String, serde_json::Value>;

/// Shared record for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
    pub current_handler: Option<HandlerKind>,
    #[serde(default)]
    pub handler_context: HandlerContext,
}

/// Partial update returned by a handler node.
///
/// Messages are appended; `Some` fields overwrite, `None` fields leave
/// the current value alone.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub current_handler: Option<HandlerKind>,
    pub handler_context: Option<HandlerContext>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. The only mutation `messages` ever sees.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Point-in-time copy for readers that must not hold the original
    pub fn snapshot(&self) -> ConversationState {
        self.clone()
    }

    /// Merge a handler's partial update into a new state
    pub fn with_update(mut self, update: StateUpdate) -> ConversationState {
        self.messages.extend(update.messages);
        if let Some(handler) = update.current_handler {
            self.current_handler = Some(handler);
        }
        if let Some(context) = update.handler_context {
            self.handler_context = context;
        }
        self
    }
}

/// Trait for session state persistence
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>>;
    async fn save(&self, session_id: &str, state: &ConversationState) -> Result<()>;
}

/// In-memory session store for development and tests
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, ConversationState>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, state: &ConversationState) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.to_string(), state.clone());
        Ok(())
    }
}

type LockMap = HashMap<String, Arc<Mutex<()>>>;

/// Per-session mutual exclusion.
///
/// The registry lock is only held while looking up the session's mutex;
/// the returned guard is what spans an invocation. An entry is removed when
/// its last guard is released and nobody is waiting on it.
#[derive(Default)]
pub struct SessionLocks {
    locks: Arc<StdMutex<LockMap>>,
}

/// Held for the duration of one session's invocation
pub struct SessionGuard {
    session_id: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    registry: Arc<StdMutex<LockMap>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: &str) -> SessionGuard {
        let lock = {
            let mut locks = lock_registry(&self.locks);
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = lock.clone().lock_owned().await;

        SessionGuard {
            session_id: session_id.to_string(),
            lock,
            guard: Some(guard),
            registry: self.locks.clone(),
        }
    }

    /// Sessions with a live lock entry
    pub fn tracked(&self) -> usize {
        lock_registry(&self.locks).len()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.guard.take();

        let mut locks = lock_registry(&self.registry);
        // Only the registry and this guard still hold the mutex
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.session_id);
        }
    }
}

fn lock_registry(registry: &StdMutex<LockMap>) -> MutexGuard<'_, LockMap> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
