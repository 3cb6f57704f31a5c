//! Gemini API client
//!
//! Multi-turn `generateContent` with function calling.
//! Uses a long-lived reqwest::Client for connection pooling.

use super::LanguageModel;
use crate::config::LlmConfig;
use crate::error::AssistantError;
use crate::models::{Completion, Message, Role, ToolCall, ToolDescriptor};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

/// Name of the single string parameter every tool declaration takes
const TOOL_ARGUMENT: &str = "input";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    config: LlmConfig,
}

impl GeminiClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model,
            self.config.api_key
        )
    }

    fn build_request(&self, messages: &[Message], tools: Option<&[ToolDescriptor]>) -> GeminiRequest {
        let system_text = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let contents = to_contents(messages);

        let tools = tools
            .filter(|t| !t.is_empty())
            .map(|t| {
                vec![ToolSet {
                    function_declarations: t.iter().map(to_declaration).collect(),
                }]
            });

        GeminiRequest {
            contents,
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
            system_instruction: (!system_text.is_empty()).then(|| SystemInstruction {
                parts: vec![Part::text(system_text)],
            }),
            tools,
        }
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDescriptor]>,
    ) -> Result<Completion> {
        if !self.config.has_api_key() {
            return Err(AssistantError::Llm("GEMINI_API_KEY not configured".to_string()));
        }

        let request = self.build_request(messages, tools);

        debug!(
            model = %self.config.model,
            messages = messages.len(),
            tools = tools.map(|t| t.len()).unwrap_or(0),
            "Calling Gemini API"
        );

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                AssistantError::Llm(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(AssistantError::Llm(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            AssistantError::Llm(format!("Gemini parse error: {}", e))
        })?;

        let completion = to_completion(gemini_response)?;

        info!(
            tool_calls = completion.tool_calls.len(),
            chars = completion.content.len(),
            "Gemini response received"
        );

        Ok(completion)
    }
}

fn to_declaration(tool: &ToolDescriptor) -> FunctionDeclaration {
    FunctionDeclaration {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: json!({
            "type": "object",
            "properties": {
                TOOL_ARGUMENT: {
                    "type": "string",
                    "description": "Text input for the tool"
                }
            },
            "required": [TOOL_ARGUMENT]
        }),
    }
}

/// Non-system messages as Gemini contents. Consecutive tool results become one
/// content so parallel calls are answered in the same turn they were made.
fn to_contents(messages: &[Message]) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::new();
    let mut previous: Option<Role> = None;

    for message in messages.iter().filter(|m| m.role != Role::System) {
        let content = to_content(message);
        match contents.last_mut() {
            Some(last) if message.role == Role::Tool && previous == Some(Role::Tool) => {
                last.parts.extend(content.parts);
            }
            _ => contents.push(content),
        }
        previous = Some(message.role);
    }

    contents
}

fn to_content(message: &Message) -> Content {
    match message.role {
        Role::Assistant => {
            let mut parts = Vec::with_capacity(1 + message.tool_calls.len());
            if !message.content.is_empty() {
                parts.push(Part::text(message.content.clone()));
            }
            for call in &message.tool_calls {
                parts.push(Part {
                    function_call: Some(FunctionCall {
                        name: call.tool_name.clone(),
                        args: json!({ TOOL_ARGUMENT: call.argument }),
                    }),
                    ..Default::default()
                });
            }
            Content {
                role: Some("model".to_string()),
                parts,
            }
        }
        Role::Tool => Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                function_response: Some(FunctionResponse {
                    name: message.tool_name.clone().unwrap_or_default(),
                    response: json!({ "content": message.content }),
                }),
                ..Default::default()
            }],
        },
        Role::User | Role::System => Content {
            role: Some("user".to_string()),
            parts: vec![Part::text(message.content.clone())],
        },
    }
}

fn to_completion(response: GeminiResponse) -> Result<Completion> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AssistantError::Llm("No response from Gemini API".to_string()))?;

    let mut completion = Completion::default();
    let mut texts = Vec::new();

    for part in candidate.content.parts {
        if let Some(text) = part.text {
            texts.push(text);
        }
        if let Some(call) = part.function_call {
            let argument = match call.args.get(TOOL_ARGUMENT) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => call.args.to_string(),
            };
            completion.tool_calls.push(ToolCall::new(call.name, argument));
        }
    }

    completion.content = texts.join("");

    if completion.content.is_empty() && completion.tool_calls.is_empty() {
        return Err(AssistantError::Llm(format!(
            "Empty response from Gemini (finish_reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(completion)
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolSet>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(
        default,
        alias = "functionCall",
        skip_serializing_if = "Option::is_none"
    )]
    function_call: Option<FunctionCall>,
    #[serde(
        default,
        alias = "functionResponse",
        skip_serializing_if = "Option::is_none"
    )]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
struct ToolSet {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
    #[serde(default, alias = "finishReason")]
    finish_reason: Option<String>,
}
