//! Read-only tools over the user's expense ledger
//!
//! Bound per invocation to one user id, so a query can never see another
//! user's rows.

use super::Tool;
use crate::error::AssistantError;
use crate::ledger::{budget_status, spending_summary, LedgerReader, EXPENSES_SCHEMA};
use crate::Result;
use chrono::NaiveDate;
use std::sync::Arc;

pub const SQL_SCHEMA: &str = "sql_db_schema";
pub const SQL_QUERY: &str = "sql_db_query";
pub const SPENDING_SUMMARY: &str = "spending_summary";
pub const BUDGET_STATUS: &str = "budget_status";

/// Returns the fixed `expenses` schema
pub struct SqlSchemaTool;

#[async_trait::async_trait]
impl Tool for SqlSchemaTool {
    fn name(&self) -> &'static str {
        SQL_SCHEMA
    }

    fn description(&self) -> &'static str {
        "Return the schema of the expenses table. Call this before writing a query."
    }

    async fn invoke(&self, _argument: &str) -> Result<String> {
        Ok(EXPENSES_SCHEMA.to_string())
    }
}

/// Runs one read-only SELECT against the user's expenses
pub struct SqlQueryTool {
    reader: Arc<dyn LedgerReader>,
    user_id: i64,
}

impl SqlQueryTool {
    pub fn new(reader: Arc<dyn LedgerReader>, user_id: i64) -> Self {
        Self { reader, user_id }
    }
}

#[async_trait::async_trait]
impl Tool for SqlQueryTool {
    fn name(&self) -> &'static str {
        SQL_QUERY
    }

    fn description(&self) -> &'static str {
        "Execute a single read-only PostgreSQL SELECT over the expenses table and \
         return the rows as JSON. Only the current user's rows are visible."
    }

    async fn invoke(&self, argument: &str) -> Result<String> {
        let rows = self
            .reader
            .run_read_query(self.user_id, argument)
            .await
            .map_err(|e| AssistantError::ToolExecution(e.to_string()))?;

        if rows.trim() == "[]" {
            Ok("The query returned no rows.".to_string())
        } else {
            Ok(rows)
        }
    }
}

/// Totals and top categories for a date window
pub struct SpendingSummaryTool {
    reader: Arc<dyn LedgerReader>,
    user_id: i64,
    today: NaiveDate,
}

impl SpendingSummaryTool {
    pub fn new(reader: Arc<dyn LedgerReader>, user_id: i64, today: NaiveDate) -> Self {
        Self {
            reader,
            user_id,
            today,
        }
    }
}

#[async_trait::async_trait]
impl Tool for SpendingSummaryTool {
    fn name(&self) -> &'static str {
        SPENDING_SUMMARY
    }

    fn description(&self) -> &'static str {
        "Summarize spending for a trailing window. Input: number of days ending today \
         (e.g. '7' or '30'). Returns the total, top five categories and largest expenses."
    }

    async fn invoke(&self, argument: &str) -> Result<String> {
        let days: i64 = argument
            .trim()
            .trim_end_matches("days")
            .trim()
            .parse()
            .map_err(|_| {
                AssistantError::ToolExecution(format!(
                    "Expected a number of days, got '{}'",
                    argument
                ))
            })?;

        let summary = spending_summary(self.reader.as_ref(), self.user_id, self.today, days)
            .await
            .map_err(|e| AssistantError::ToolExecution(e.to_string()))?;

        let mut out = format!(
            "Spending from {} to {}: total {:.2}\n",
            summary.from, summary.to, summary.total
        );
        if summary.categories.is_empty() {
            out.push_str("No expenses recorded in this period.");
        } else {
            for c in &summary.categories {
                out.push_str(&format!(
                    "- {}: {:.2} across {} expense(s)\n",
                    c.category, c.total_amount, c.count
                ));
            }
            out.push_str("Largest expenses:\n");
            for e in &summary.top_expenses {
                out.push_str(&format!(
                    "- {:.2} {} on {}{}\n",
                    e.entry.amount,
                    e.entry.category,
                    e.entry.date,
                    e.entry
                        .description
                        .as_deref()
                        .map(|d| format!(" ({})", d))
                        .unwrap_or_default()
                ));
            }
        }

        Ok(out.trim_end().to_string())
    }
}

/// Monthly budget, month-to-date spend and savings progress
pub struct BudgetStatusTool {
    reader: Arc<dyn LedgerReader>,
    user_id: i64,
    today: NaiveDate,
}

impl BudgetStatusTool {
    pub fn new(reader: Arc<dyn LedgerReader>, user_id: i64, today: NaiveDate) -> Self {
        Self {
            reader,
            user_id,
            today,
        }
    }
}

#[async_trait::async_trait]
impl Tool for BudgetStatusTool {
    fn name(&self) -> &'static str {
        BUDGET_STATUS
    }

    fn description(&self) -> &'static str {
        "Report the user's monthly budget, spend so far this month, remaining budget \
         and savings goal progress. Input is ignored."
    }

    async fn invoke(&self, _argument: &str) -> Result<String> {
        let status = budget_status(self.reader.as_ref(), self.user_id, self.today)
            .await
            .map_err(|e| AssistantError::ToolExecution(e.to_string()))?;

        Ok(format!(
            "Month {} to {}\nMonthly budget: {:.2}\nSpent this month: {:.2}\nRemaining budget: {:.2}\n\
             Savings: {:.2} of {:.2} goal ({:.1}%)",
            status.month_start,
            status.month_end,
            status.settings.monthly_budget,
            status.month_spent,
            status.remaining_budget,
            status.settings.actual_savings,
            status.settings.savings_goal,
            status.savings_progress,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{InMemoryLedger, LedgerWriter};
    use crate::models::{BudgetSettings, LedgerEntry};

    #[tokio::test]
    async fn test_spending_summary_tool() {
        let ledger = Arc::new(InMemoryLedger::new());
        let today = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        ledger
            .add_entry(&LedgerEntry {
                user_id: 3,
                amount: 42.0,
                category: "Food".to_string(),
                date: today,
                description: None,
                recurring: false,
                location: None,
                payment_method: "Cash".to_string(),
            })
            .await
            .unwrap();

        let tool = SpendingSummaryTool::new(ledger.clone(), 3, today);
        let out = tool.invoke("7 days").await.unwrap();
        assert!(out.contains("total 42.00"));
        assert!(out.contains("- Food: 42.00 across 1 expense(s)"));
        assert!(out.contains("Largest expenses:\n- 42.00 Food on 2024-06-10"));

        let other_user = SpendingSummaryTool::new(ledger, 4, today);
        let out = other_user.invoke("7").await.unwrap();
        assert!(out.contains("No expenses recorded"));
    }

    #[tokio::test]
    async fn test_budget_status_tool_reports_remaining() {
        let ledger = Arc::new(InMemoryLedger::new());
        let today = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        ledger
            .save_budget_settings(&BudgetSettings {
                user_id: 3,
                monthly_budget: 500.0,
                savings_goal: 1000.0,
                actual_savings: 250.0,
            })
            .await
            .unwrap();
        ledger
            .add_entry(&LedgerEntry {
                user_id: 3,
                amount: 620.0,
                category: "Bills".to_string(),
                date: today,
                description: None,
                recurring: true,
                location: None,
                payment_method: "Online Transfer".to_string(),
            })
            .await
            .unwrap();

        let out = BudgetStatusTool::new(ledger, 3, today).invoke("").await.unwrap();
        assert!(out.contains("Month 2024-06-01 to 2024-06-30"));
        assert!(out.contains("Remaining budget: -120.00"));
        assert!(out.contains("Savings: 250.00 of 1000.00 goal (25.0%)"));
    }

    #[tokio::test]
    async fn test_sql_query_tool_rejects_other_relations() {
        let ledger = Arc::new(InMemoryLedger::new());
        let tool = SqlQueryTool::new(ledger, 1);
        let err = tool
            .invoke("SELECT user_id, SUM(amount) FROM public.expenses GROUP BY user_id")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }

    #[tokio::test]
    async fn test_sql_query_tool_rejects_writes() {
        let ledger = Arc::new(InMemoryLedger::new());
        let tool = SqlQueryTool::new(ledger, 1);
        let err = tool.invoke("DELETE FROM expenses").await.unwrap_err();
        assert!(matches!(err, AssistantError::ToolExecution(_)));
    }

    #[tokio::test]
    async fn test_schema_tool() {
        let out = SqlSchemaTool.invoke("").await.unwrap();
        assert!(out.contains("payment_method"));
    }
}
