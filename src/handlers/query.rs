//! Personal-data query handler
//!
//! Answers questions about the user's own expenses with read-only ledger
//! tools. The tools are built per turn so they only ever see that user's rows.

use super::TurnContext;
use crate::ledger::{LedgerReader, EXPENSES_SCHEMA};
use crate::tools::{
    BudgetStatusTool, SpendingSummaryTool, SqlQueryTool, SqlSchemaTool, ToolRegistry,
};
use chrono::NaiveDate;
use std::sync::Arc;

pub fn preamble(today: NaiveDate) -> String {
    format!(
        r#"You are an agent that answers questions about the user's personal expenses stored in a PostgreSQL database.

The database has a single table:

{schema}

Today's date is {today}.

How to work:
- Call sql_db_schema if you are unsure of the columns.
- Write one syntactically correct SELECT query and run it with sql_db_query. Only the current user's rows are visible, so do not filter on user_id.
- Use spending_summary for quick totals over the last N days.
- Use budget_status for questions about the monthly budget, remaining budget or savings goal.
- Never run INSERT, UPDATE, DELETE or DDL statements. You are read-only.
- Limit listings to at most 10 rows unless the user asks for more.
- If a query fails, read the error, fix the query and try again.
- Answer in plain language with amounts formatted to two decimals. If there is no matching data, say so."#,
        schema = EXPENSES_SCHEMA,
        today = today.format("%Y-%m-%d"),
    )
}

pub fn bindings(ledger: Arc<dyn LedgerReader>, turn: &TurnContext) -> ToolRegistry {
    ToolRegistry::new()
        .with(Arc::new(SqlSchemaTool))
        .with(Arc::new(SqlQueryTool::new(ledger.clone(), turn.user_id)))
        .with(Arc::new(SpendingSummaryTool::new(ledger.clone(), turn.user_id, turn.today)))
        .with(Arc::new(BudgetStatusTool::new(ledger, turn.user_id, turn.today)))
}
