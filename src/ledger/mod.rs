//! Expense ledger collaborators
//!
//! The core only writes complete entries and runs read-only aggregations.
//! In-memory for development; Postgres in production.

use crate::error::AssistantError;
use crate::models::{
    BudgetSettings, BudgetStatus, CategoryTotal, LedgerEntry, SpendingSummary, StoredExpense,
};
use crate::Result;
use chrono::{Datelike, Duration, Months, NaiveDate};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod postgres;
pub use postgres::PgLedger;

/// Fixed schema the query handler reasons over
pub const EXPENSES_SCHEMA: &str = r#"CREATE TABLE expenses (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL,
    amount DOUBLE PRECISION NOT NULL,   -- positive spend amount
    category TEXT NOT NULL,             -- e.g. Food, Transport, Bills, Shopping, Entertainment, Healthcare, Other
    date DATE NOT NULL,
    description TEXT,
    recurring BOOLEAN NOT NULL DEFAULT FALSE,
    location TEXT,
    payment_method TEXT NOT NULL        -- e.g. Cash, Credit Card, Debit Card, Online Transfer, Mobile Payment
);"#;

#[async_trait::async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Insert one entry. Either the whole row is stored or nothing is.
    async fn add_entry(&self, entry: &LedgerEntry) -> Result<i64>;

    /// Create or replace the user's budget settings
    async fn save_budget_settings(&self, settings: &BudgetSettings) -> Result<()>;
}

#[async_trait::async_trait]
pub trait LedgerReader: Send + Sync {
    async fn recent_entries(&self, user_id: i64, limit: i64) -> Result<Vec<StoredExpense>>;

    /// Sum of amounts with `from <= date <= to`
    async fn total_between(&self, user_id: i64, from: NaiveDate, to: NaiveDate) -> Result<f64>;

    /// Per-category totals in the window, largest first
    async fn category_totals(
        &self,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<CategoryTotal>>;

    /// Largest single expenses in the window
    async fn top_expenses(
        &self,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<StoredExpense>>;

    /// Stored settings, or all zeros when the user never saved any
    async fn budget_settings(&self, user_id: i64) -> Result<BudgetSettings>;

    /// Run a single read-only SELECT scoped to `user_id`; rows as JSON text
    async fn run_read_query(&self, user_id: i64, sql: &str) -> Result<String>;
}

/// How many of the largest expenses a summary lists
pub const TOP_EXPENSES_LIMIT: usize = 2;

/// Totals for the `days`-day window ending at `to` (inclusive)
pub async fn spending_summary(
    reader: &dyn LedgerReader,
    user_id: i64,
    to: NaiveDate,
    days: i64,
) -> Result<SpendingSummary> {
    if days <= 0 {
        return Err(AssistantError::InvalidInput(
            "days must be positive".to_string(),
        ));
    }

    let from = to - Duration::days(days - 1);
    let total = reader.total_between(user_id, from, to).await?;
    let categories = reader.category_totals(user_id, from, to, 5).await?;
    let top_expenses = reader
        .top_expenses(user_id, from, to, TOP_EXPENSES_LIMIT)
        .await?;

    Ok(SpendingSummary {
        user_id,
        from,
        to,
        total,
        categories,
        top_expenses,
    })
}

/// Seven days ending `today`
pub async fn weekly_summary(
    reader: &dyn LedgerReader,
    user_id: i64,
    today: NaiveDate,
) -> Result<SpendingSummary> {
    spending_summary(reader, user_id, today, 7).await
}

/// First and last day of the calendar month containing `day`
pub fn month_bounds(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = day.with_day(1).unwrap_or(day);
    let end = start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(day);
    (start, end)
}

/// Settings against the whole calendar month containing `today`
pub async fn budget_status(
    reader: &dyn LedgerReader,
    user_id: i64,
    today: NaiveDate,
) -> Result<BudgetStatus> {
    let settings = reader.budget_settings(user_id).await?;
    let (month_start, month_end) = month_bounds(today);
    let month_spent = reader.total_between(user_id, month_start, month_end).await?;

    Ok(BudgetStatus {
        remaining_budget: settings.monthly_budget - month_spent,
        savings_progress: settings.savings_progress(),
        settings,
        month_start,
        month_end,
        month_spent,
    })
}

/// Amounts must be finite and not negative
pub fn validate_budget(settings: &BudgetSettings) -> Result<()> {
    let fields = [
        ("monthly_budget", settings.monthly_budget),
        ("savings_goal", settings.savings_goal),
        ("actual_savings", settings.actual_savings),
    ];
    for (name, value) in fields {
        if !value.is_finite() || value < 0.0 {
            return Err(AssistantError::InvalidInput(format!(
                "{} must be zero or more",
                name
            )));
        }
    }
    Ok(())
}

/// Schemas and relations a user query may not name
const FORBIDDEN_NAMES: &[&str] = &[
    "public",
    "pg_catalog",
    "information_schema",
    "conversation_sessions",
    "budget_settings",
    "dblink",
];

/// Function families that read arbitrary relations or files
const FORBIDDEN_PREFIXES: &[&str] = &[
    "pg_",
    "lo_",
    "query_to_",
    "table_to_",
    "cursor_to_",
    "schema_to_",
    "database_to_",
];

/// Accept exactly one SELECT/WITH statement over the unqualified `expenses`
/// table; returns it without a trailing `;`
pub fn validate_read_only(sql: &str) -> Result<&str> {
    let statement = sql.trim().trim_end_matches(';').trim();

    if statement.is_empty() {
        return Err(AssistantError::InvalidInput("empty query".to_string()));
    }

    let first_word = statement
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();

    if first_word != "select" && first_word != "with" {
        return Err(AssistantError::InvalidInput(
            "only SELECT queries are allowed".to_string(),
        ));
    }

    for ident in identifiers(statement)? {
        let forbidden = FORBIDDEN_NAMES.contains(&ident.as_str())
            || FORBIDDEN_PREFIXES.iter().any(|p| ident.starts_with(p));
        if forbidden {
            return Err(AssistantError::InvalidInput(format!(
                "references to '{}' are not allowed",
                ident
            )));
        }
    }

    Ok(statement)
}

/// Lowercased identifiers outside string literals, with quoted identifiers unquoted.
///
/// Rejects the lexical forms that could make a literal end somewhere else for
/// the database than for this scan: backslashes, dollar quoting, comments and
/// statement separators.
fn identifiers(statement: &str) -> Result<Vec<String>> {
    let reject = |what: &str| {
        Err(AssistantError::InvalidInput(format!(
            "{} are not allowed in queries",
            what
        )))
    };

    if statement.contains('\\') {
        return reject("backslashes");
    }

    let mut out = Vec::new();
    let mut word = String::new();
    let mut chars = statement.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_alphanumeric() || c == '_' {
            word.push(c.to_ascii_lowercase());
            continue;
        }
        if !word.is_empty() {
            out.push(std::mem::take(&mut word));
        }

        match c {
            '\'' => loop {
                match chars.next() {
                    Some('\'') if chars.peek() == Some(&'\'') => {
                        chars.next();
                    }
                    Some('\'') => break,
                    Some(_) => {}
                    None => {
                        return Err(AssistantError::InvalidInput(
                            "unterminated string literal".to_string(),
                        ))
                    }
                }
            },
            '"' => {
                let mut quoted = String::new();
                loop {
                    match chars.next() {
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                            quoted.push('"');
                        }
                        Some('"') => break,
                        Some(inner) => quoted.push(inner),
                        None => {
                            return Err(AssistantError::InvalidInput(
                                "unterminated quoted identifier".to_string(),
                            ))
                        }
                    }
                }
                out.push(quoted.to_lowercase());
            }
            '$' => return reject("dollar signs"),
            ';' => return reject("multiple statements"),
            '-' if chars.peek() == Some(&'-') => return reject("comments"),
            '/' if chars.peek() == Some(&'*') => return reject("comments"),
            _ => {}
        }
    }
    if !word.is_empty() {
        out.push(word);
    }

    Ok(out)
}

/// In-memory ledger for development & testing
pub struct InMemoryLedger {
    rows: Arc<RwLock<Vec<StoredExpense>>>,
    budgets: Arc<RwLock<HashMap<i64, BudgetSettings>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(Vec::new())),
            budgets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LedgerWriter for InMemoryLedger {
    async fn add_entry(&self, entry: &LedgerEntry) -> Result<i64> {
        let mut rows = self.rows.write().await;
        let id = rows.len() as i64 + 1;
        rows.push(StoredExpense {
            id,
            entry: entry.clone(),
        });
        Ok(id)
    }

    async fn save_budget_settings(&self, settings: &BudgetSettings) -> Result<()> {
        validate_budget(settings)?;
        let mut budgets = self.budgets.write().await;
        budgets.insert(settings.user_id, settings.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl LedgerReader for InMemoryLedger {
    async fn recent_entries(&self, user_id: i64, limit: i64) -> Result<Vec<StoredExpense>> {
        let rows = self.rows.read().await;
        let mut items: Vec<StoredExpense> = rows
            .iter()
            .filter(|row| row.entry.user_id == user_id)
            .cloned()
            .collect();

        // date DESC, id DESC
        items.sort_by(|a, b| b.entry.date.cmp(&a.entry.date).then(b.id.cmp(&a.id)));
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    async fn total_between(&self, user_id: i64, from: NaiveDate, to: NaiveDate) -> Result<f64> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|row| row.entry.user_id == user_id)
            .filter(|row| row.entry.date >= from && row.entry.date <= to)
            .map(|row| row.entry.amount)
            .sum())
    }

    async fn category_totals(
        &self,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<CategoryTotal>> {
        let rows = self.rows.read().await;
        let mut totals: HashMap<&str, (f64, i64)> = HashMap::new();

        for row in rows
            .iter()
            .filter(|row| row.entry.user_id == user_id)
            .filter(|row| row.entry.date >= from && row.entry.date <= to)
        {
            let slot = totals.entry(row.entry.category.as_str()).or_insert((0.0, 0));
            slot.0 += row.entry.amount;
            slot.1 += 1;
        }

        let mut out: Vec<CategoryTotal> = totals
            .into_iter()
            .map(|(category, (total_amount, count))| CategoryTotal {
                category: category.to_string(),
                total_amount,
                count,
            })
            .collect();

        out.sort_by(|a, b| {
            b.total_amount
                .partial_cmp(&a.total_amount)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.category.cmp(&b.category))
        });
        out.truncate(limit);
        Ok(out)
    }

    async fn top_expenses(
        &self,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<StoredExpense>> {
        let rows = self.rows.read().await;
        let mut items: Vec<StoredExpense> = rows
            .iter()
            .filter(|row| row.entry.user_id == user_id)
            .filter(|row| row.entry.date >= from && row.entry.date <= to)
            .cloned()
            .collect();

        // amount DESC, id ASC
        items.sort_by(|a, b| {
            b.entry
                .amount
                .partial_cmp(&a.entry.amount)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        items.truncate(limit);
        Ok(items)
    }

    async fn budget_settings(&self, user_id: i64) -> Result<BudgetSettings> {
        let budgets = self.budgets.read().await;
        Ok(budgets
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| BudgetSettings::empty(user_id)))
    }

    async fn run_read_query(&self, _user_id: i64, sql: &str) -> Result<String> {
        validate_read_only(sql)?;
        Err(AssistantError::Ledger(
            "SQL queries require the Postgres ledger".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn entry(user_id: i64, amount: f64, category: &str, date: &str) -> LedgerEntry {
        LedgerEntry {
            user_id,
            amount,
            category: category.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            description: None,
            recurring: false,
            location: None,
            payment_method: "Card".to_string(),
        }
    }

    #[tokio::test]
    async fn test_add_and_recent_entries_scoped_by_user() {
        let ledger = InMemoryLedger::new();
        ledger.add_entry(&entry(1, 10.0, "Food", "2024-05-01")).await.unwrap();
        ledger.add_entry(&entry(1, 20.0, "Transport", "2024-05-03")).await.unwrap();
        ledger.add_entry(&entry(2, 99.0, "Food", "2024-05-03")).await.unwrap();

        let recent = ledger.recent_entries(1, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].entry.category, "Transport");

        let limited = ledger.recent_entries(1, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_weekly_summary() {
        let ledger = InMemoryLedger::new();
        ledger.add_entry(&entry(1, 12.5, "Food", "2024-05-07")).await.unwrap();
        ledger.add_entry(&entry(1, 7.5, "Food", "2024-05-05")).await.unwrap();
        ledger.add_entry(&entry(1, 30.0, "Bills", "2024-05-01")).await.unwrap();
        // Outside the window
        ledger.add_entry(&entry(1, 500.0, "Shopping", "2024-04-20")).await.unwrap();

        let to = NaiveDate::from_ymd_opt(2024, 5, 7).unwrap();
        let summary = weekly_summary(&ledger, 1, to).await.unwrap();

        assert_eq!(summary.from, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert!((summary.total - 50.0).abs() < f64::EPSILON);
        assert_eq!(summary.categories.len(), 2);
        assert_eq!(summary.categories[0].category, "Bills");
        assert_eq!(summary.categories[1].count, 2);

        let top: Vec<f64> = summary.top_expenses.iter().map(|e| e.entry.amount).collect();
        assert_eq!(top, vec![30.0, 12.5]);
    }

    #[tokio::test]
    async fn test_budget_settings_default_to_zero_and_upsert() {
        let ledger = InMemoryLedger::new();
        assert_eq!(ledger.budget_settings(9).await.unwrap(), BudgetSettings::empty(9));

        let mut settings = BudgetSettings {
            user_id: 9,
            monthly_budget: 1000.0,
            savings_goal: 500.0,
            actual_savings: 50.0,
        };
        ledger.save_budget_settings(&settings).await.unwrap();
        settings.actual_savings = 125.0;
        ledger.save_budget_settings(&settings).await.unwrap();

        assert_eq!(ledger.budget_settings(9).await.unwrap(), settings);
        assert_eq!(ledger.budget_settings(10).await.unwrap().monthly_budget, 0.0);

        settings.monthly_budget = -1.0;
        assert_err!(ledger.save_budget_settings(&settings).await);
    }

    #[tokio::test]
    async fn test_budget_status_uses_whole_calendar_month() {
        let ledger = InMemoryLedger::new();
        ledger
            .save_budget_settings(&BudgetSettings {
                user_id: 1,
                monthly_budget: 300.0,
                savings_goal: 200.0,
                actual_savings: 50.0,
            })
            .await
            .unwrap();
        ledger.add_entry(&entry(1, 120.0, "Bills", "2024-02-01")).await.unwrap();
        ledger.add_entry(&entry(1, 80.0, "Food", "2024-02-29")).await.unwrap();
        ledger.add_entry(&entry(1, 999.0, "Food", "2024-03-01")).await.unwrap();
        ledger.add_entry(&entry(2, 999.0, "Food", "2024-02-10")).await.unwrap();

        let today = NaiveDate::from_ymd_opt(2024, 2, 14).unwrap();
        let status = budget_status(&ledger, 1, today).await.unwrap();

        assert_eq!(status.month_start, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(status.month_end, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert!((status.month_spent - 200.0).abs() < f64::EPSILON);
        assert!((status.remaining_budget - 100.0).abs() < f64::EPSILON);
        assert!((status.savings_progress - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_month_bounds_in_december() {
        let (start, end) = month_bounds(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
    }

    #[tokio::test]
    async fn test_summary_rejects_non_positive_window() {
        let ledger = InMemoryLedger::new();
        let to = NaiveDate::from_ymd_opt(2024, 5, 7).unwrap();
        assert!(spending_summary(&ledger, 1, to, 0).await.is_err());
    }

    #[test]
    fn test_validate_read_only() {
        assert_eq!(
            validate_read_only("SELECT * FROM expenses;").unwrap(),
            "SELECT * FROM expenses"
        );
        assert_ok!(validate_read_only("with t as (select 1) select * from t"));
        assert_err!(validate_read_only("DELETE FROM expenses"));
        assert_err!(validate_read_only("SELECT 1; DROP TABLE expenses"));
        assert_err!(validate_read_only("   "));
    }

    #[test]
    fn test_read_only_rejects_other_relations() {
        assert_err!(validate_read_only(
            "SELECT user_id, SUM(amount) FROM public.expenses GROUP BY user_id"
        ));
        assert_err!(validate_read_only(r#"SELECT * FROM "PUBLIC"."expenses""#));
        assert_err!(validate_read_only("SELECT state FROM conversation_sessions"));
        assert_err!(validate_read_only("SELECT * FROM budget_settings"));
        assert_err!(validate_read_only("SELECT pg_read_file('/etc/passwd')"));
        assert_err!(validate_read_only("SELECT * FROM pg_catalog.pg_tables"));
        assert_err!(validate_read_only(
            "SELECT query_to_xml('select * from conversation_sessions', true, true, '')"
        ));
    }

    #[test]
    fn test_read_only_rejects_ambiguous_lexical_forms() {
        // The literal would close earlier under escape-string rules
        assert_err!(validate_read_only(
            "SELECT E'a\\'' FROM public.expenses --'"
        ));
        assert_err!(validate_read_only("SELECT $$x$$ FROM expenses"));
        assert_err!(validate_read_only("SELECT 1 /* note */ FROM expenses"));
        assert_err!(validate_read_only("SELECT 'open FROM expenses"));
    }

    #[test]
    fn test_read_only_ignores_names_inside_literals() {
        assert_ok!(validate_read_only(
            "SELECT * FROM expenses WHERE description = 'public; pg_ transport -- it''s fine'"
        ));
        assert_ok!(validate_read_only(
            r#"SELECT category AS "Category", SUM(amount) FROM expenses GROUP BY 1"#
        ));
    }
}
