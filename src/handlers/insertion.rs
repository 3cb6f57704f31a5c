//! Data insertion handler
//!
//! Emits a single INSERT statement as text. Nothing is executed here; the
//! orchestrator parses the reply and commits it through the ledger writer.

use crate::parser::INSERTION_MARKER;
use chrono::NaiveDate;

pub fn preamble(user_id: i64, today: NaiveDate) -> String {
    format!(
        r#"You convert natural-language expense entries into one SQL INSERT statement for a PostgreSQL table called `expenses`.

Columns, in this order:
- user_id (BIGINT)
- amount (DOUBLE PRECISION, positive)
- category (TEXT, e.g. Food, Transport, Bills, Shopping, Entertainment, Healthcare, Other)
- date (DATE)
- description (TEXT, or NULL)
- recurring (0 or 1)
- location (TEXT, or NULL)
- payment_method (TEXT, e.g. Cash, Credit Card, Debit Card, Online Transfer, Mobile Payment)

Assume user_id is {user_id}. Today's date is {today}. Write every date as a literal 'YYYY-MM-DD' value, resolving words like "today" or "yesterday" against today's date.
Always list all eight columns and quote text values with single quotes.
Every time you must start your response with: "{marker}"
Reply with the statement only."#,
        user_id = user_id,
        today = today.format("%Y-%m-%d"),
        marker = INSERTION_MARKER,
    )
}

/// Make sure the reply starts with the marker exactly once
pub fn with_marker(statement: &str) -> String {
    let trimmed = statement.trim();
    if trimmed.starts_with(INSERTION_MARKER) {
        trimmed.to_string()
    } else {
        format!("{}\n{}", INSERTION_MARKER, trimmed)
    }
}
