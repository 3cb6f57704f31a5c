//! Intent router
//!
//! One model call per turn picks the handler. Anything other than an exact
//! handler name falls back to `query`, and so does a failed model call.

use crate::llm::LanguageModel;
use crate::models::{HandlerKind, Message, Role};
use crate::state::ConversationState;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handler used when the model's answer is not a valid name
pub const FALLBACK_HANDLER: HandlerKind = HandlerKind::Query;

/// Messages considered for context, the current one included
const CONTEXT_WINDOW: usize = 3;

pub const ROUTER_PROMPT: &str = r#"You are a routing assistant that decides which specialized handler should answer a user's message in a multi-turn conversation. Read the user input together with the conversation context and reply with the name of the most appropriate handler.

Consider the conversation context and the current handler. If the user is continuing the same topic with the same handler, route to that handler again to keep continuity. If the user clearly switches topic or asks for a different kind of help, route to the handler that fits the new request.

Only reply with the handler name shown in brackets below. Do not add explanations or extra text.

---

1. Trip Advisor (trip)
- Use when the user wants help planning a trip or vacation: destinations, itineraries, flights, hotels, best time to visit, local attractions, travel advice.

Examples:
- "Plan a 3-day trip to Tokyo."
- "What are the best places to visit in Italy?"
- "Help me book a beach vacation in July."

---

2. Financial Advisor (finance)
- Use for financial advice, stock market news, investment trends, budgeting help or general finance and economics available online.
- It does not touch the user's personal data or transactions.

Examples:
- "What's the latest news on Tesla stock?"
- "How do I start investing in mutual funds?"
- "Give me a summary of current market trends."

---

3. Database Query (query)
- Use when the user wants to retrieve information from their personal expense records.
- These messages often start with "how much", "what did I", "show me", "list" or "did I spend".

Examples:
- "How much money did I spend on food last month?"
- "What were my top 5 expenses in June?"
- "Show me all transactions from last week."

---

4. Data Insertion (insertion)
- Use when the user wants to add a new entry or transaction to their records.
- Look for words like add, record, log, save or insert, usually with an amount, a category and sometimes a payment method.

Examples:
- "Add $45.99 for groceries today paid by debit card."
- "Log 12 dollars spent on Uber."
- "Record 20.50 lunch with description coffee, paid by card."

---

RULES:
- Only return one of these four strings exactly: trip, finance, query, insertion.
- Do not explain your choice.
- If the input is ambiguous, choose the most likely intent given the context.
- If the user is asking a follow-up or clarifying something for the current handler, route to that handler."#;

pub struct Router {
    model: Arc<dyn LanguageModel>,
}

impl Router {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Pick a handler for the latest message in `state`. Never fails.
    pub async fn decide(&self, state: &ConversationState) -> HandlerKind {
        let messages = build_router_messages(state);

        match self.model.complete(&messages, None).await {
            Ok(completion) => {
                let kind = normalize_route(&completion.content);
                info!(
                    handler = %kind,
                    previous = HandlerKind::label(state.current_handler),
                    raw = %completion.content.trim(),
                    "Routing decision"
                );
                kind
            }
            Err(e) => {
                warn!(error = %e, "Router model call failed, falling back");
                FALLBACK_HANDLER
            }
        }
    }
}

/// Map raw model output onto a handler; anything unexpected is `query`
pub fn normalize_route(raw: &str) -> HandlerKind {
    let normalized = raw.trim().to_lowercase();
    normalized.parse().unwrap_or_else(|_| {
        debug!(raw = %raw, "Unrecognised route");
        FALLBACK_HANDLER
    })
}

/// Instruction block, optional recent context, then the current input
pub fn build_router_messages(state: &ConversationState) -> Vec<Message> {
    let history = state.messages();
    let mut messages = vec![Message::system(ROUTER_PROMPT)];

    if history.len() > 1 {
        let start = history.len().saturating_sub(CONTEXT_WINDOW);
        let recent = &history[start..history.len() - 1];

        let mut context = format!(
            "Previous conversation context:\nCurrent handler for this conversation: {}\nRecent messages:\n",
            HandlerKind::label(state.current_handler)
        );
        for msg in recent {
            match msg.role {
                Role::User => context.push_str(&format!("User: {}\n", msg.content)),
                Role::Assistant => context.push_str(&format!("Assistant: {}\n", msg.content)),
                _ => {}
            }
        }
        messages.push(Message::user(context));
    }

    let current = history.last().map(|m| m.content.as_str()).unwrap_or_default();
    messages.push(Message::user(format!("Current user input: {}", current)));

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::models::Completion;

    fn state(messages: &[Message], current: Option<HandlerKind>) -> ConversationState {
        let mut state = ConversationState::new();
        for m in messages {
            state.append(m.clone());
        }
        state.current_handler = current;
        state
    }

    #[test]
    fn test_normalize_accepts_exact_names_only() {
        assert_eq!(normalize_route("trip"), HandlerKind::Trip);
        assert_eq!(normalize_route("  Finance\n"), HandlerKind::Finance);
        assert_eq!(normalize_route("INSERTION"), HandlerKind::Insertion);
        assert_eq!(normalize_route("query"), HandlerKind::Query);

        assert_eq!(normalize_route(""), HandlerKind::Query);
        assert_eq!(normalize_route("trip planner"), HandlerKind::Query);
        assert_eq!(normalize_route("`trip`"), HandlerKind::Query);
        assert_eq!(normalize_route("weather"), HandlerKind::Query);
    }

    #[test]
    fn test_single_message_has_no_context_block() {
        let s = state(&[Message::user("Plan a trip to Rome")], None);
        let messages = build_router_messages(&s);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "Current user input: Plan a trip to Rome");
    }

    #[test]
    fn test_context_uses_recent_messages_without_current() {
        let s = state(
            &[
                Message::user("first"),
                Message::assistant("first reply"),
                Message::user("second"),
                Message::assistant("second reply"),
                Message::user("third"),
            ],
            Some(HandlerKind::Trip),
        );
        let messages = build_router_messages(&s);

        assert_eq!(messages.len(), 3);
        let context = &messages[1].content;
        assert!(context.contains("Current handler for this conversation: trip"));
        assert!(context.contains("User: second\n"));
        assert!(context.contains("Assistant: second reply\n"));
        assert!(!context.contains("first"));
        assert!(!context.contains("third"));
        assert_eq!(messages[2].content, "Current user input: third");
    }

    #[test]
    fn test_context_labels_missing_handler_as_none() {
        let s = state(&[Message::assistant("Hello!"), Message::user("hi")], None);
        let messages = build_router_messages(&s);
        assert!(messages[1]
            .content
            .contains("Current handler for this conversation: none"));
    }

    #[tokio::test]
    async fn test_decide_is_called_without_tools() {
        let model = Arc::new(ScriptedModel::new(vec![Completion::text("finance")]));
        let router = Router::new(model.clone());

        let kind = router
            .decide(&state(&[Message::user("Tesla news?")], None))
            .await;

        assert_eq!(kind, HandlerKind::Finance);
        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].tools.is_empty());
    }

    #[tokio::test]
    async fn test_model_error_falls_back_to_query() {
        let router = Router::new(Arc::new(ScriptedModel::new(vec![])));
        let kind = router.decide(&state(&[Message::user("hello")], None)).await;
        assert_eq!(kind, FALLBACK_HANDLER);
    }

    #[tokio::test]
    async fn test_continuity_fixture_follows_current_handler() {
        // Stand-in for a model that keeps follow-ups with the active handler
        let model = Arc::new(ScriptedModel::from_fn(|messages, _| {
            let context = messages
                .iter()
                .find(|m| m.content.starts_with("Previous conversation context"))
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let current = messages.last().map(|m| m.content.to_lowercase()).unwrap_or_default();

            if current.contains("tokyo") || current.contains("trip") {
                Completion::text("trip")
            } else if context.contains("conversation: trip") {
                Completion::text("trip")
            } else {
                Completion::text("query")
            }
        }));
        let router = Router::new(model);

        let first = state(&[Message::user("Plan a 3-day trip to Tokyo")], None);
        assert_eq!(router.decide(&first).await, HandlerKind::Trip);

        let follow_up = state(
            &[
                Message::user("Plan a 3-day trip to Tokyo"),
                Message::assistant("## Overview ..."),
                Message::user("What about day 2?"),
            ],
            Some(HandlerKind::Trip),
        );
        assert_eq!(router.decide(&follow_up).await, HandlerKind::Trip);
    }
}
