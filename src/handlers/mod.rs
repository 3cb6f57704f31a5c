//! Conversational handlers
//!
//! Four variants share one loop: put the preamble first, call the model with
//! the bound tools, run whatever tools it asks for, and repeat until it
//! answers in plain text or the round budget runs out. Tool exchanges live
//! only inside one invocation; the caller receives a single assistant message.

use crate::config::AppConfig;
use crate::ledger::LedgerReader;
use crate::llm::LanguageModel;
use crate::models::{HandlerKind, Message, Role};
use crate::state::ConversationState;
use crate::tools::ToolRegistry;
use crate::Result;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod finance;
pub mod insertion;
pub mod query;
pub mod trip;

/// Reply used when the model keeps requesting tools past the round budget
pub const DEGRADED_REPLY: &str = "I wasn't able to complete this request within the allowed number of steps. \
     Please try rephrasing or asking something more specific.";

/// Per-turn facts a handler may bind into its prompt or tools
#[derive(Debug, Clone, Copy)]
pub struct TurnContext {
    pub user_id: i64,
    pub today: NaiveDate,
}

/// What a handler returns to the orchestrator
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    pub message: Message,
    pub handler: HandlerKind,
}

/// Shared collaborators for every handler variant
pub struct Handlers {
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    ledger: Arc<dyn LedgerReader>,
    max_tool_rounds: usize,
    default_user_id: i64,
}

impl Handlers {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        tools: ToolRegistry,
        ledger: Arc<dyn LedgerReader>,
        config: &AppConfig,
    ) -> Self {
        Self {
            model,
            tools,
            ledger,
            max_tool_rounds: config.max_tool_rounds.max(1),
            default_user_id: config.default_user_id,
        }
    }

    /// Run one handler over the current state
    pub async fn run(
        &self,
        kind: HandlerKind,
        state: &ConversationState,
        turn: &TurnContext,
    ) -> Result<HandlerOutcome> {
        info!(
            handler = %kind,
            user_id = turn.user_id,
            messages = state.message_count(),
            "Running handler"
        );

        let content = match kind {
            HandlerKind::Trip => {
                let transcript = ensure_preamble(conversation(state), trip::PREAMBLE);
                self.tool_loop(kind, transcript, &trip::bindings(&self.tools))
                    .await?
            }
            HandlerKind::Finance => {
                let transcript = ensure_preamble(conversation(state), finance::PREAMBLE);
                self.tool_loop(kind, transcript, &finance::bindings(&self.tools))
                    .await?
            }
            HandlerKind::Query => {
                let transcript = vec![
                    Message::system(query::preamble(turn.today)),
                    Message::user(condensed_input(state)),
                ];
                let tools = query::bindings(self.ledger.clone(), turn);
                self.tool_loop(kind, transcript, &tools).await?
            }
            HandlerKind::Insertion => {
                let transcript = vec![
                    Message::system(insertion::preamble(self.default_user_id, turn.today)),
                    Message::user(condensed_input(state)),
                ];
                let statement = self
                    .tool_loop(kind, transcript, &ToolRegistry::new())
                    .await?;
                insertion::with_marker(&statement)
            }
        };

        Ok(HandlerOutcome {
            message: Message::assistant(content),
            handler: kind,
        })
    }

    /// Model/tool loop bounded by `max_tool_rounds` model calls.
    /// Tools requested on the last call are not run.
    async fn tool_loop(
        &self,
        kind: HandlerKind,
        mut transcript: Vec<Message>,
        tools: &ToolRegistry,
    ) -> Result<String> {
        let descriptors = tools.list();
        let offered = if descriptors.is_empty() {
            None
        } else {
            Some(descriptors.as_slice())
        };

        for round in 1..=self.max_tool_rounds {
            debug!(handler = %kind, round, "Calling model");
            let completion = self.model.complete(&transcript, offered).await?;

            if !completion.requests_tools() {
                debug!(handler = %kind, round, "Model answered without tools");
                return Ok(completion.content);
            }

            // No model call left to read the results
            if round == self.max_tool_rounds {
                break;
            }

            transcript.push(Message::tool_request(
                completion.content.clone(),
                completion.tool_calls.clone(),
            ));

            for call in &completion.tool_calls {
                let result = match tools.invoke(&call.tool_name, &call.argument).await {
                    Ok(output) => output,
                    Err(e) => {
                        warn!(
                            handler = %kind,
                            tool = %call.tool_name,
                            error = %e,
                            "Tool call failed"
                        );
                        format!("No data available from {}: {}", call.tool_name, e)
                    }
                };
                transcript.push(Message::tool_result(call.tool_name.clone(), result));
            }
        }

        warn!(
            handler = %kind,
            rounds = self.max_tool_rounds,
            "Tool round budget exhausted"
        );
        Ok(DEGRADED_REPLY.to_string())
    }
}

/// Persisted user and assistant turns, oldest first
fn conversation(state: &ConversationState) -> Vec<Message> {
    state
        .messages()
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .cloned()
        .collect()
}

/// Prepend `preamble` unless the transcript already opens with a system message
fn ensure_preamble(mut messages: Vec<Message>, preamble: &str) -> Vec<Message> {
    let has_preamble = messages
        .first()
        .map(|m| m.role == Role::System)
        .unwrap_or(false);
    if !has_preamble {
        messages.insert(0, Message::system(preamble));
    }
    messages
}

/// Prior turns flattened into one prompt, followed by the latest message
fn condensed_input(state: &ConversationState) -> String {
    let messages = state.messages();
    let (current, prior) = match messages.split_last() {
        Some((last, rest)) => (last.content.as_str(), rest),
        None => ("", messages),
    };

    let mut out = String::from("Previous conversation:\n");
    for msg in prior {
        match msg.role {
            Role::User => out.push_str(&format!("User: {}\n", msg.content)),
            Role::Assistant => out.push_str(&format!("Assistant: {}\n", msg.content)),
            _ => {}
        }
    }
    out.push_str(&format!("\nCurrent user input: {}", current));
    out
}
