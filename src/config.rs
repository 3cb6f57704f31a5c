//! Process configuration
//!
//! Built once at startup from the environment and handed to the router,
//! handlers, tools and stores. Nothing in the crate reads env vars after this.

use crate::error::AssistantError;
use crate::Result;
use std::env;
use std::str::FromStr;

const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_WEB_SEARCH_URL: &str = "https://api.duckduckgo.com/";
const DEFAULT_FMP_BASE_URL: &str = "https://financialmodelingprep.com/api/v3";

/// Language model settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            temperature: 0.0,
            max_output_tokens: 2048,
        }
    }
}

impl LlmConfig {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// External tool endpoints
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    pub web_search_url: String,
    pub fmp_base_url: String,
    pub fmp_api_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            web_search_url: DEFAULT_WEB_SEARCH_URL.to_string(),
            fmp_base_url: DEFAULT_FMP_BASE_URL.to_string(),
            fmp_api_key: None,
            request_timeout_secs: 30,
        }
    }
}

/// Persistence settings. `None` means in-memory stores.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub tools: ToolsConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    /// Upper bound on tool-call rounds inside one handler invocation
    pub max_tool_rounds: usize,
    /// Identity assumed by the insertion handler's generated statements
    pub default_user_id: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            tools: ToolsConfig::default(),
            storage: StorageConfig {
                database_url: None,
                max_connections: 5,
            },
            server: ServerConfig::default(),
            max_tool_rounds: 5,
            default_user_id: 1,
        }
    }
}

impl AppConfig {
    /// Read configuration from process environment variables.
    ///
    /// Call `dotenv::dotenv()` before this if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let llm = LlmConfig {
            api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            model: env::var("GEMINI_MODEL").unwrap_or(defaults.llm.model),
            base_url: env::var("GEMINI_BASE_URL").unwrap_or(defaults.llm.base_url),
            temperature: parse_var("LLM_TEMPERATURE", defaults.llm.temperature)?,
            max_output_tokens: parse_var("LLM_MAX_OUTPUT_TOKENS", defaults.llm.max_output_tokens)?,
        };

        let tools = ToolsConfig {
            web_search_url: env::var("WEB_SEARCH_URL").unwrap_or(defaults.tools.web_search_url),
            fmp_base_url: env::var("FMP_BASE_URL").unwrap_or(defaults.tools.fmp_base_url),
            fmp_api_key: env::var("FMP_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            request_timeout_secs: parse_var(
                "TOOL_TIMEOUT_SECS",
                defaults.tools.request_timeout_secs,
            )?,
        };

        let storage = StorageConfig {
            database_url: env::var("DATABASE_URL")
                .or_else(|_| env::var("POSTGRES_URL"))
                .ok()
                .filter(|url| !url.trim().is_empty()),
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", defaults.storage.max_connections)?,
        };

        let port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => raw.parse().map_err(|_| {
                AssistantError::Config(format!("PORT must be a valid port number, got '{}'", raw))
            })?,
            Err(_) => defaults.server.port,
        };

        Ok(Self {
            llm,
            tools,
            storage,
            server: ServerConfig { port },
            max_tool_rounds: parse_var("MAX_TOOL_ROUNDS", defaults.max_tool_rounds)?,
            default_user_id: parse_var("DEFAULT_USER_ID", defaults.default_user_id)?,
        })
    }

    /// Check the settings the real model path cannot run without.
    pub fn validate(&self) -> Result<()> {
        if !self.llm.has_api_key() {
            return Err(AssistantError::Config("GEMINI_API_KEY is not set".to_string()));
        }
        if self.max_tool_rounds == 0 {
            return Err(AssistantError::Config(
                "MAX_TOOL_ROUNDS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            AssistantError::Config(format!("{} has an invalid value: '{}'", name, raw))
        }),
        _ => Ok(default),
    }
}
