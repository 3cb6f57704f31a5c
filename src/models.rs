//! Core data models for the expense assistant

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//
// ================= Enums =================
//

/// Author of a transcript message.
///
/// `Tool` only appears inside a single handler invocation; it is never
/// merged into persisted conversation state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// The four handling intents a message can be routed to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Trip,
    Finance,
    Query,
    Insertion,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 4] = [
        HandlerKind::Trip,
        HandlerKind::Finance,
        HandlerKind::Query,
        HandlerKind::Insertion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Trip => "trip",
            HandlerKind::Finance => "finance",
            HandlerKind::Query => "query",
            HandlerKind::Insertion => "insertion",
        }
    }

    /// Label used in prompts and logs for an optional handler
    pub fn label(kind: Option<HandlerKind>) -> &'static str {
        kind.map(|k| k.as_str()).unwrap_or("none")
    }
}

impl FromStr for HandlerKind {
    type Err = ();

    /// Exact match only; callers normalise case and whitespace first.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "trip" => Ok(HandlerKind::Trip),
            "finance" => Ok(HandlerKind::Finance),
            "query" => Ok(HandlerKind::Query),
            "insertion" => Ok(HandlerKind::Insertion),
            _ => Err(()),
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//
// ================= Messages =================
//

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub tool_name: String,
    pub argument: String,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            argument: argument.into(),
        }
    }
}

/// A single transcript entry. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Calls requested by an assistant turn (ephemeral tool rounds only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool that produced a `Role::Tool` message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Assistant turn that asked for tools
    pub fn tool_request(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut message = Self::with_role(Role::Assistant, content);
        message.tool_calls = tool_calls;
        message
    }

    pub fn tool_result(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        let mut message = Self::with_role(Role::Tool, content);
        message.tool_name = Some(tool_name.into());
        message
    }
}

//
// ================= Model I/O =================
//

/// Name and description of a tool, as offered to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
}

/// One model response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: String::new(),
            tool_calls,
        }
    }

    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

//
// ================= Ledger =================
//

/// A row in a user's expense ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub user_id: i64,
    pub amount: f64,
    pub category: String,
    pub date: NaiveDate,
    pub description: Option<String>,
    pub recurring: bool,
    pub location: Option<String>,
    pub payment_method: String,
}

/// A persisted ledger row, with its storage id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredExpense {
    pub id: i64,
    #[serde(flatten)]
    pub entry: LedgerEntry,
}

/// Spend per category over a window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryTotal {
    pub category: String,
    pub total_amount: f64,
    pub count: i64,
}

/// Spend overview for a trailing window of days
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendingSummary {
    pub user_id: i64,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub total: f64,
    pub categories: Vec<CategoryTotal>,
    /// Largest single expenses in the window
    #[serde(default)]
    pub top_expenses: Vec<StoredExpense>,
}

/// A user's monthly budget and savings targets. Missing settings read as zeros.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetSettings {
    pub user_id: i64,
    pub monthly_budget: f64,
    pub savings_goal: f64,
    pub actual_savings: f64,
}

impl BudgetSettings {
    pub fn empty(user_id: i64) -> Self {
        Self {
            user_id,
            monthly_budget: 0.0,
            savings_goal: 0.0,
            actual_savings: 0.0,
        }
    }

    /// Percent of the savings goal reached; 0 when no goal is set
    pub fn savings_progress(&self) -> f64 {
        if self.savings_goal > 0.0 {
            self.actual_savings / self.savings_goal * 100.0
        } else {
            0.0
        }
    }
}

/// Budget settings against the current calendar month's spend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub settings: BudgetSettings,
    pub month_start: NaiveDate,
    pub month_end: NaiveDate,
    pub month_spent: f64,
    /// Negative once the month is over budget
    pub remaining_budget: f64,
    pub savings_progress: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_kind_round_trip() {
        for kind in HandlerKind::ALL {
            assert_eq!(kind.as_str().parse::<HandlerKind>(), Ok(kind));
        }
        assert!("Trip".parse::<HandlerKind>().is_err());
        assert_eq!(HandlerKind::label(None), "none");
        assert_eq!(HandlerKind::label(Some(HandlerKind::Finance)), "finance");
    }

    #[test]
    fn test_message_constructors() {
        let msg = Message::tool_result("web_search", "sunny");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_name.as_deref(), Some("web_search"));

        let req = Message::tool_request("", vec![ToolCall::new("web_search", "tokyo")]);
        assert_eq!(req.role, Role::Assistant);
        assert_eq!(req.tool_calls.len(), 1);
    }

    #[test]
    fn test_savings_progress() {
        let mut settings = BudgetSettings::empty(1);
        assert_eq!(settings.savings_progress(), 0.0);

        settings.savings_goal = 400.0;
        settings.actual_savings = 100.0;
        assert!((settings.savings_progress() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_message_serialization_skips_empty_tool_fields() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_name").is_none());
    }
}
