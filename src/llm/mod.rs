//! Language model interface
//!
//! Router and handlers only see `LanguageModel`. `GeminiClient` is the
//! production backend; `ScriptedModel` keeps the system functional without
//! an LLM (tests, offline demos).

use crate::error::AssistantError;
use crate::models::{Completion, Message, ToolDescriptor};
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

pub mod gemini;
pub use gemini::GeminiClient;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a transcript, optionally offering tools the model may request
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDescriptor]>,
    ) -> Result<Completion>;
}

/// A request as seen by `ScriptedModel`
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDescriptor>,
}

enum Script {
    Queue(VecDeque<Completion>),
    Respond(Box<dyn Fn(&[Message], &[ToolDescriptor]) -> Completion + Send + Sync>),
}

/// Deterministic model stub.
///
/// Either replays a queue of completions (erroring once exhausted) or
/// answers every call through a closure.
pub struct ScriptedModel {
    script: Mutex<Script>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Completion>) -> Self {
        Self {
            script: Mutex::new(Script::Queue(responses.into())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn from_fn<F>(respond: F) -> Self
    where
        F: Fn(&[Message], &[ToolDescriptor]) -> Completion + Send + Sync + 'static,
    {
        Self {
            script: Mutex::new(Script::Respond(Box::new(respond))),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far, oldest first
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDescriptor]>,
    ) -> Result<Completion> {
        let tools = tools.map(|t| t.to_vec()).unwrap_or_default();

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                messages: messages.to_vec(),
                tools: tools.clone(),
            });
        }

        let mut script = self
            .script
            .lock()
            .map_err(|_| AssistantError::Llm("scripted model poisoned".to_string()))?;

        match &mut *script {
            Script::Queue(queue) => queue
                .pop_front()
                .ok_or_else(|| AssistantError::Llm("scripted model has no responses left".to_string())),
            Script::Respond(respond) => Ok(respond(messages, &tools)),
        }
    }
}
