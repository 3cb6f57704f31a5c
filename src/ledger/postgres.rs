//! Postgres-backed expense ledger

use super::{validate_budget, validate_read_only, LedgerReader, LedgerWriter};
use crate::error::AssistantError;
use crate::models::{BudgetSettings, CategoryTotal, LedgerEntry, StoredExpense};
use crate::Result;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Transaction setting the row-level policies read. Empty or unset outside
/// a scoped query transaction.
pub const SCOPE_SETTING: &str = "app.ledger_user_id";

/// Policy expression: true only while no query scope is set
pub(crate) fn unscoped() -> String {
    format!("COALESCE(current_setting('{}', true), '') = ''", SCOPE_SETTING)
}

/// Policy expression: every row when unscoped, else the scoped user's rows
fn owner_or_unscoped() -> String {
    format!(
        "{} OR user_id = NULLIF(current_setting('{}', true), '')::BIGINT",
        unscoped(),
        SCOPE_SETTING
    )
}

/// Idempotent `DO` block forcing row security on `table` with one policy.
/// Forced so the table owner is bound too.
pub(crate) fn row_scope_policy(table: &str, policy: &str, using: &str) -> String {
    format!(
        r#"DO $$
BEGIN
  ALTER TABLE {table} ENABLE ROW LEVEL SECURITY;
  ALTER TABLE {table} FORCE ROW LEVEL SECURITY;
  IF NOT EXISTS (
    SELECT 1 FROM pg_policies WHERE tablename = '{table}' AND policyname = '{policy}'
  ) THEN
    CREATE POLICY {policy} ON {table} USING ({using});
  END IF;
END
$$;"#
    )
}

/// Whether the row-level policy binds the connecting role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowSecurity {
    Enforced,
    /// Superusers and BYPASSRLS roles skip every policy
    Bypassed,
}

pub struct PgLedger {
    pool: PgPool,
    schema_ready: Arc<OnceCell<RowSecurity>>,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<RowSecurity> {
        let security = self
            .schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS expenses (
                      id BIGSERIAL PRIMARY KEY,
                      user_id BIGINT NOT NULL,
                      amount DOUBLE PRECISION NOT NULL,
                      category TEXT NOT NULL,
                      date DATE NOT NULL,
                      description TEXT,
                      recurring BOOLEAN NOT NULL DEFAULT FALSE,
                      location TEXT,
                      payment_method TEXT NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_expenses_user_date
                    ON expenses (user_id, date);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS budget_settings (
                      user_id BIGINT PRIMARY KEY,
                      monthly_budget DOUBLE PRECISION NOT NULL DEFAULT 0,
                      savings_goal DOUBLE PRECISION NOT NULL DEFAULT 0,
                      actual_savings DOUBLE PRECISION NOT NULL DEFAULT 0
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                for policy in [
                    row_scope_policy("expenses", "expenses_user_scope", &owner_or_unscoped()),
                    row_scope_policy(
                        "budget_settings",
                        "budget_settings_user_scope",
                        &owner_or_unscoped(),
                    ),
                ] {
                    sqlx::query(&policy).execute(&self.pool).await?;
                }

                let row = sqlx::query(
                    "SELECT (rolsuper OR rolbypassrls) AS bypass FROM pg_roles WHERE rolname = current_user",
                )
                .fetch_one(&self.pool)
                .await?;
                let bypass: bool = row.try_get("bypass")?;

                if bypass {
                    warn!("Database role bypasses row-level security, SQL ledger queries are disabled");
                    Ok::<_, sqlx::Error>(RowSecurity::Bypassed)
                } else {
                    Ok(RowSecurity::Enforced)
                }
            })
            .await
            .map_err(|e| {
                AssistantError::Ledger(format!("Failed to initialize ledger schema: {}", e))
            })?;

        Ok(*security)
    }
}

/// Wrap a user query so every reference to `expenses` only sees this user's rows,
/// and aggregate the result into one JSON array.
///
/// The row-level policy is what enforces the scope; the CTE keeps results
/// correct for the plain-text statement as the model wrote it.
fn scope_to_user(statement: &str) -> String {
    let scoped_cte = "expenses AS (SELECT * FROM public.expenses WHERE user_id = $1)";

    let scoped = match statement.get(..4) {
        Some(head) if head.eq_ignore_ascii_case("with") => {
            format!("WITH {}, {}", scoped_cte, statement[4..].trim_start())
        }
        _ => format!("WITH {} {}", scoped_cte, statement),
    };

    format!(
        "SELECT COALESCE(json_agg(row_to_json(q)), '[]'::json)::text AS rows FROM ({}) q",
        scoped
    )
}

#[async_trait::async_trait]
impl LedgerWriter for PgLedger {
    async fn add_entry(&self, entry: &LedgerEntry) -> Result<i64> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO expenses
              (user_id, amount, category, date, description, recurring, location, payment_method)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.amount)
        .bind(&entry.category)
        .bind(entry.date)
        .bind(&entry.description)
        .bind(entry.recurring)
        .bind(&entry.location)
        .bind(&entry.payment_method)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AssistantError::Ledger(format!("Failed to insert expense: {}", e)))?;

        let id: i64 = row.try_get("id")?;

        info!(
            expense_id = id,
            user_id = entry.user_id,
            amount = entry.amount,
            category = %entry.category,
            "Expense recorded"
        );

        Ok(id)
    }

    async fn save_budget_settings(&self, settings: &BudgetSettings) -> Result<()> {
        validate_budget(settings)?;
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO budget_settings (user_id, monthly_budget, savings_goal, actual_savings)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
              SET monthly_budget = EXCLUDED.monthly_budget,
                  savings_goal = EXCLUDED.savings_goal,
                  actual_savings = EXCLUDED.actual_savings
            "#,
        )
        .bind(settings.user_id)
        .bind(settings.monthly_budget)
        .bind(settings.savings_goal)
        .bind(settings.actual_savings)
        .execute(&self.pool)
        .await
        .map_err(|e| AssistantError::Ledger(format!("Failed to save budget settings: {}", e)))?;

        info!(user_id = settings.user_id, "Budget settings saved");
        Ok(())
    }
}

fn to_stored_expense(row: &PgRow) -> Result<StoredExpense> {
    Ok(StoredExpense {
        id: row.try_get("id")?,
        entry: LedgerEntry {
            user_id: row.try_get("user_id")?,
            amount: row.try_get("amount")?,
            category: row.try_get("category")?,
            date: row.try_get("date")?,
            description: row.try_get("description")?,
            recurring: row.try_get("recurring")?,
            location: row.try_get("location")?,
            payment_method: row.try_get("payment_method")?,
        },
    })
}

#[async_trait::async_trait]
impl LedgerReader for PgLedger {
    async fn recent_entries(&self, user_id: i64, limit: i64) -> Result<Vec<StoredExpense>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, user_id, amount, category, date, description, recurring, location, payment_method
            FROM expenses
            WHERE user_id = $1
            ORDER BY date DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(to_stored_expense).collect()
    }

    async fn total_between(&self, user_id: i64, from: NaiveDate, to: NaiveDate) -> Result<f64> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0)::DOUBLE PRECISION AS total
            FROM expenses
            WHERE user_id = $1 AND date >= $2 AND date <= $3
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("total")?)
    }

    async fn category_totals(
        &self,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<CategoryTotal>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT category, SUM(amount)::DOUBLE PRECISION AS total_amount, COUNT(*) AS count
            FROM expenses
            WHERE user_id = $1 AND date >= $2 AND date <= $3
            GROUP BY category
            ORDER BY total_amount DESC, category ASC
            LIMIT $4
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<CategoryTotal> {
                Ok(CategoryTotal {
                    category: row.try_get("category")?,
                    total_amount: row.try_get("total_amount")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }

    async fn top_expenses(
        &self,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<StoredExpense>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, user_id, amount, category, date, description, recurring, location, payment_method
            FROM expenses
            WHERE user_id = $1 AND date >= $2 AND date <= $3
            ORDER BY amount DESC, id ASC
            LIMIT $4
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(to_stored_expense).collect()
    }

    async fn budget_settings(&self, user_id: i64) -> Result<BudgetSettings> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            SELECT monthly_budget, savings_goal, actual_savings
            FROM budget_settings
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(BudgetSettings {
                user_id,
                monthly_budget: row.try_get("monthly_budget")?,
                savings_goal: row.try_get("savings_goal")?,
                actual_savings: row.try_get("actual_savings")?,
            }),
            None => Ok(BudgetSettings::empty(user_id)),
        }
    }

    async fn run_read_query(&self, user_id: i64, sql: &str) -> Result<String> {
        let statement = validate_read_only(sql)?;

        if self.ensure_schema().await? == RowSecurity::Bypassed {
            return Err(AssistantError::Ledger(
                "SQL queries need a database role without BYPASSRLS".to_string(),
            ));
        }

        let wrapped = scope_to_user(statement);
        debug!(user_id, sql = %statement, "Running read-only ledger query");

        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        sqlx::query("SELECT set_config($1, $2, true)")
            .bind(SCOPE_SETTING)
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(&wrapped)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AssistantError::Ledger(format!("Query failed: {}", e)))?;

        let rows: String = row.try_get("rows")?;
        tx.rollback().await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn unconnected_ledger() -> PgLedger {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://ledger@localhost:1/unused")
            .unwrap();
        PgLedger::new(pool)
    }

    #[tokio::test]
    async fn test_schema_qualified_query_never_reaches_the_database() {
        let ledger = unconnected_ledger();
        let err = ledger
            .run_read_query(
                1,
                "SELECT user_id, SUM(amount) FROM public.expenses GROUP BY user_id",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::InvalidInput(_)));
        assert!(err.to_string().contains("public"));

        let err = ledger
            .run_read_query(1, "SELECT state FROM conversation_sessions")
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::InvalidInput(_)));
    }

    #[test]
    fn test_expense_policy_scopes_by_setting() {
        let sql = row_scope_policy("expenses", "expenses_user_scope", &owner_or_unscoped());
        assert!(sql.contains("ALTER TABLE expenses FORCE ROW LEVEL SECURITY"));
        assert!(sql.contains(
            "user_id = NULLIF(current_setting('app.ledger_user_id', true), '')::BIGINT"
        ));
        assert!(sql.contains("COALESCE(current_setting('app.ledger_user_id', true), '') = ''"));
    }

    #[test]
    fn test_scope_plain_select() {
        let sql = scope_to_user("SELECT SUM(amount) FROM expenses WHERE category = 'Food'");
        assert!(sql.contains(
            "FROM (WITH expenses AS (SELECT * FROM public.expenses WHERE user_id = $1) SELECT SUM(amount)"
        ));
        assert!(sql.starts_with("SELECT COALESCE(json_agg"));
    }

    #[test]
    fn test_scope_merges_existing_cte() {
        let sql = scope_to_user("with monthly as (select * from expenses) select * from monthly");
        assert!(sql.contains(
            "WITH expenses AS (SELECT * FROM public.expenses WHERE user_id = $1), monthly as"
        ));
    }
}
