//! Expense Assistant
//!
//! A multi-turn conversational core that:
//! - Routes every message to one of four handlers (trip, finance, query, insertion)
//! - Keeps follow-ups with the current handler unless the topic changes
//! - Runs handler tool calls in a bounded loop
//! - Persists an append-only transcript per session
//! - Commits parsed insertion statements to a per-user expense ledger
//!
//! TURN:
//! INPUT → ROUTE → HANDLE (→ TOOLS)* → MERGE → SAVE → PARSE? → COMMIT?

pub mod agent;
pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod llm;
pub mod models;
pub mod parser;
pub mod router;
pub mod state;
pub mod tools;

pub use error::{AssistantError, Result};

// Re-export common types
pub use agent::{SessionContext, SessionOrchestrator};
pub use models::*;
