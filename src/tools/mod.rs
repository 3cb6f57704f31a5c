//! Tool trait and registry
//!
//! Tools are opaque text-in/text-out capabilities. HTTP-backed tools call
//! public search and market-data services; ledger tools read the user's
//! expenses.

use crate::config::ToolsConfig;
use crate::error::AssistantError;
use crate::models::ToolDescriptor;
use crate::Result;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub mod ledger;
pub use ledger::{BudgetStatusTool, SpendingSummaryTool, SqlQueryTool, SqlSchemaTool};

pub const WEB_SEARCH: &str = "web_search";
pub const STOCK_DATA: &str = "get_stock_data";
pub const FINANCE_NEWS: &str = "get_finance_news";

/// Trait for a single tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn invoke(&self, argument: &str) -> Result<String>;
}

/// Tool registry for looking up and invoking tools by name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tools offered to the model, sorted by name
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
            })
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Registry restricted to the given names; unknown names are skipped
    pub fn subset(&self, names: &[&str]) -> ToolRegistry {
        let tools = names
            .iter()
            .filter_map(|name| self.tools.get(*name).map(|t| (name.to_string(), t.clone())))
            .collect();
        ToolRegistry { tools }
    }

    pub async fn invoke(&self, name: &str, argument: &str) -> Result<String> {
        let tool = self
            .get(name)
            .ok_or_else(|| AssistantError::ToolUnavailable(name.to_string()))?;

        debug!(tool = %name, argument = %argument, "Invoking tool");

        tool.invoke(argument).await.map_err(|e| match e {
            AssistantError::ToolExecution(_) => e,
            other => AssistantError::ToolExecution(format!("{}: {}", name, other)),
        })
    }
}

/// Shared HTTP client for tool endpoints
#[derive(Clone)]
pub struct HttpToolClient {
    client: Client,
}

impl HttpToolClient {
    pub fn new(config: &ToolsConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client })
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| AssistantError::ToolExecution(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::ToolExecution(format!(
                "{} returned {}: {}",
                url, status, body
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AssistantError::ToolExecution(format!("Invalid JSON response: {}", e)))
    }
}

fn require_argument(argument: &str) -> Result<&str> {
    let trimmed = argument.trim();
    if trimmed.is_empty() {
        Err(AssistantError::ToolExecution("Expected a non-empty input".to_string()))
    } else {
        Ok(trimmed)
    }
}

/// General web search via an instant-answer endpoint
pub struct WebSearchTool {
    http: HttpToolClient,
    url: String,
}

impl WebSearchTool {
    pub fn new(http: HttpToolClient, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        WEB_SEARCH
    }

    fn description(&self) -> &'static str {
        "Search the web for general information: destinations, hotels, events, \
         market analysis, economic news and explanations of financial concepts."
    }

    async fn invoke(&self, argument: &str) -> Result<String> {
        let query = require_argument(argument)?;
        let body = self
            .http
            .get_json(
                &self.url,
                &[
                    ("q", query),
                    ("format", "json"),
                    ("no_html", "1"),
                    ("skip_disambig", "1"),
                ],
            )
            .await?;

        Ok(format_search_results(query, &body))
    }
}

fn format_search_results(query: &str, body: &Value) -> String {
    let mut lines = Vec::new();

    for key in ["Answer", "AbstractText", "Definition"] {
        if let Some(text) = body.get(key).and_then(Value::as_str) {
            if !text.trim().is_empty() {
                lines.push(text.trim().to_string());
            }
        }
    }

    if let Some(source) = body.get("AbstractURL").and_then(Value::as_str) {
        if !source.is_empty() && !lines.is_empty() {
            lines.push(format!("Source: {}", source));
        }
    }

    let mut related = Vec::new();
    if let Some(topics) = body.get("RelatedTopics").and_then(Value::as_array) {
        collect_topics(topics, &mut related);
    }
    for (text, url) in related.into_iter().take(8) {
        lines.push(format!("- {} ({})", text, url));
    }

    if lines.is_empty() {
        format!("No results found for '{}'.", query)
    } else {
        lines.join("\n")
    }
}

fn collect_topics(topics: &[Value], out: &mut Vec<(String, String)>) {
    for topic in topics {
        if let Some(nested) = topic.get("Topics").and_then(Value::as_array) {
            collect_topics(nested, out);
            continue;
        }
        let text = topic.get("Text").and_then(Value::as_str).unwrap_or_default();
        let url = topic.get("FirstURL").and_then(Value::as_str).unwrap_or_default();
        if !text.is_empty() {
            out.push((text.to_string(), url.to_string()));
        }
    }
}

/// Client for the Financial Modeling Prep REST API
#[derive(Clone)]
pub struct MarketDataApi {
    http: HttpToolClient,
    base_url: String,
    api_key: Option<String>,
}

impl MarketDataApi {
    pub fn new(http: HttpToolClient, config: &ToolsConfig) -> Self {
        Self {
            http,
            base_url: config.fmp_base_url.trim_end_matches('/').to_string(),
            api_key: config.fmp_api_key.clone(),
        }
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            AssistantError::ToolExecution("FMP_API_KEY is not configured".to_string())
        })?;

        let mut params = query.to_vec();
        params.push(("apikey", api_key));

        self.http
            .get_json(&format!("{}{}", self.base_url, path), &params)
            .await
    }

    /// Resolve free text ("Apple stock") to a ticker; plain tickers pass through
    async fn resolve_symbol(&self, input: &str) -> Result<Option<String>> {
        if looks_like_ticker(input) {
            return Ok(Some(input.to_string()));
        }

        let found = self.get("/search", &[("query", input), ("limit", "1")]).await?;
        Ok(found
            .as_array()
            .and_then(|items| items.first())
            .and_then(|item| item.get("symbol"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

/// Upper-case symbols only; "apple" is a name to search for, not a ticker
fn looks_like_ticker(input: &str) -> bool {
    !input.is_empty()
        && input.len() <= 10
        && input.chars().any(|c| c.is_ascii_uppercase())
        && input.chars().all(|c| {
            c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-' || c == '^'
        })
}

/// Real-time quotes and key metrics
pub struct MarketDataTool {
    api: MarketDataApi,
}

impl MarketDataTool {
    pub fn new(api: MarketDataApi) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for MarketDataTool {
    fn name(&self) -> &'static str {
        STOCK_DATA
    }

    fn description(&self) -> &'static str {
        "Get current stock prices and market metrics (price, change, day range, \
         market cap, P/E) for a ticker symbol such as 'AAPL' or a company name."
    }

    async fn invoke(&self, argument: &str) -> Result<String> {
        let input = require_argument(argument)?;
        let Some(symbol) = self.api.resolve_symbol(input).await? else {
            return Ok(format!("No listed security matched '{}'.", input));
        };

        let quotes = self.api.get(&format!("/quote/{}", symbol), &[]).await?;
        let Some(quote) = quotes.as_array().and_then(|q| q.first()) else {
            return Ok(format!("No quote data available for {}.", symbol));
        };

        let field = |key: &str| {
            quote
                .get(key)
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    Value::Null => "n/a".to_string(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "n/a".to_string())
        };

        Ok(format!(
            "{} ({})\nPrice: {}\nChange: {} ({}%)\nDay range: {} - {}\nMarket cap: {}\nP/E: {}\nExchange: {}",
            field("name"),
            symbol,
            field("price"),
            field("change"),
            field("changesPercentage"),
            field("dayLow"),
            field("dayHigh"),
            field("marketCap"),
            field("pe"),
            field("exchange"),
        ))
    }
}

/// Latest company or market news
pub struct FinanceNewsTool {
    api: MarketDataApi,
}

impl FinanceNewsTool {
    pub fn new(api: MarketDataApi) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl Tool for FinanceNewsTool {
    fn name(&self) -> &'static str {
        FINANCE_NEWS
    }

    fn description(&self) -> &'static str {
        "Get the latest financial news for a company, ticker or market topic."
    }

    async fn invoke(&self, argument: &str) -> Result<String> {
        let input = require_argument(argument)?;

        let symbol = match self.api.resolve_symbol(input).await {
            Ok(symbol) => symbol,
            Err(e) => {
                warn!("Symbol lookup failed, using general news: {}", e);
                None
            }
        };

        let articles = match &symbol {
            Some(symbol) => {
                self.api
                    .get("/stock_news", &[("tickers", symbol.as_str()), ("limit", "5")])
                    .await?
            }
            None => self.api.get("/stock_news", &[("limit", "5")]).await?,
        };

        let items: Vec<String> = articles
            .as_array()
            .map(|list| {
                list.iter()
                    .take(5)
                    .map(|a| {
                        format!(
                            "- {} [{}] ({})\n  {}",
                            a.get("title").and_then(Value::as_str).unwrap_or("untitled"),
                            a.get("site").and_then(Value::as_str).unwrap_or("unknown source"),
                            a.get("publishedDate").and_then(Value::as_str).unwrap_or(""),
                            a.get("text").and_then(Value::as_str).unwrap_or(""),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        if items.is_empty() {
            Ok(format!("No recent news found for '{}'.", input))
        } else {
            Ok(items.join("\n"))
        }
    }
}

/// Registry with the HTTP-backed search and market tools
pub fn create_default_registry(config: &ToolsConfig) -> Result<ToolRegistry> {
    let http = HttpToolClient::new(config)?;
    let market = MarketDataApi::new(http.clone(), config);

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(WebSearchTool::new(http, config.web_search_url.clone())));
    registry.register(Arc::new(MarketDataTool::new(market.clone())));
    registry.register(Arc::new(FinanceNewsTool::new(market)));

    Ok(registry)
}
