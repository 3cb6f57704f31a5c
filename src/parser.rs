//! Structured-output parser
//!
//! Turns the insertion handler's textual INSERT statement into a typed
//! `LedgerEntry`. Anything that does not start with the marker is an
//! ordinary reply and passes through untouched. Anything that does, but
//! cannot be parsed exactly, is a parse failure: no partial entries.

use crate::error::AssistantError;
use crate::models::LedgerEntry;
use crate::Result;
use chrono::NaiveDate;

/// Literal prefix of every insertion handler reply
pub const INSERTION_MARKER: &str = "Here is the SQL statement:";

/// Columns in the order the VALUES list must follow
pub const LEDGER_COLUMNS: [&str; 8] = [
    "user_id",
    "amount",
    "category",
    "date",
    "description",
    "recurring",
    "location",
    "payment_method",
];

/// What a handler reply turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedOutput {
    /// Not an insertion payload; show as-is
    Reply(String),
    /// A complete entry ready for the ledger
    Entry(LedgerEntry),
}

/// A single coerced literal from the VALUES list
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Date(NaiveDate),
    Text(String),
    Float(f64),
    Int(i64),
    /// Unquoted token that is not a number
    Raw(String),
}

pub fn is_insertion_payload(text: &str) -> bool {
    text.trim_start().starts_with(INSERTION_MARKER)
}

/// Parse a handler reply.
///
/// `user_id` is the authenticated identity; whatever user id the statement
/// carries is discarded. `today` resolves `CURRENT_DATE`.
pub fn parse(text: &str, user_id: i64, today: NaiveDate) -> Result<ParsedOutput> {
    if !is_insertion_payload(text) {
        return Ok(ParsedOutput::Reply(text.to_string()));
    }

    let list = extract_values_list(text)
        .ok_or_else(|| AssistantError::Parse("no VALUES clause found".to_string()))?;

    let values = split_values(list)?
        .iter()
        .map(|token| coerce(token, today))
        .collect::<Result<Vec<_>>>()?;

    to_entry(values, user_id).map(ParsedOutput::Entry)
}

/// Body of the first parenthesised list after a `VALUES` keyword
fn extract_values_list(text: &str) -> Option<&str> {
    let lowered = text.to_ascii_lowercase();
    let bytes = text.as_bytes();

    let mut search_from = 0;
    while let Some(found) = lowered[search_from..].find("values") {
        let start = search_from + found;
        let end = start + "values".len();
        search_from = end;

        let word_start = start == 0 || !is_word_byte(bytes[start - 1]);
        let word_end = end >= bytes.len() || !is_word_byte(bytes[end]);
        if !(word_start && word_end) {
            continue;
        }

        let rest = &text[end..];
        let open = rest.len() - rest.trim_start().len();
        if !rest[open..].starts_with('(') {
            continue;
        }

        let body_start = end + open + 1;
        return closing_paren(&text[body_start..]).map(|close| &text[body_start..body_start + close]);
    }

    None
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Byte offset of the `)` that closes an already-opened `(`, ignoring quoted text
fn closing_paren(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = body.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match quote {
            Some(q) => {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    if chars.peek().map(|(_, n)| *n == q).unwrap_or(false) {
                        chars.next();
                    } else {
                        quote = None;
                    }
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' if depth == 0 => return Some(i),
                ')' => depth -= 1,
                _ => {}
            },
        }
    }

    None
}

/// Split on commas that are outside quotes and nested parentheses
fn split_values(list: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut chars = list.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                } else if c == q {
                    if chars.peek() == Some(&q) {
                        current.push(q);
                        chars.next();
                    } else {
                        quote = None;
                    }
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                '(' => {
                    depth += 1;
                    current.push(c);
                }
                ')' => {
                    depth = depth.saturating_sub(1);
                    current.push(c);
                }
                ',' if depth == 0 => tokens.push(std::mem::take(&mut current)),
                _ => current.push(c),
            },
        }
    }

    if quote.is_some() {
        return Err(AssistantError::Parse("unterminated quoted value".to_string()));
    }

    tokens.push(current);

    Ok(tokens
        .into_iter()
        .map(|t| {
            let t = t.trim();
            t.strip_suffix(',').unwrap_or(t).trim().to_string()
        })
        .collect())
}

fn coerce(token: &str, today: NaiveDate) -> Result<SqlValue> {
    if token.eq_ignore_ascii_case("null") {
        return Ok(SqlValue::Null);
    }
    if token.eq_ignore_ascii_case("current_date") {
        return Ok(SqlValue::Date(today));
    }

    if let Some(q) = token.chars().next().filter(|c| *c == '\'' || *c == '"') {
        if token.len() >= 2 && token.ends_with(q) {
            return Ok(SqlValue::Text(unescape(&token[1..token.len() - 1], q)));
        }
    }

    if token.contains('.') {
        return token
            .parse::<f64>()
            .map(SqlValue::Float)
            .map_err(|_| AssistantError::Parse(format!("'{}' is not a number", token)));
    }

    Ok(token
        .parse::<i64>()
        .map(SqlValue::Int)
        .unwrap_or_else(|_| SqlValue::Raw(token.to_string())))
}

fn unescape(inner: &str, quote: char) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else if c == quote && chars.peek() == Some(&quote) {
            out.push(quote);
            chars.next();
        } else {
            out.push(c);
        }
    }

    out
}

fn to_entry(values: Vec<SqlValue>, user_id: i64) -> Result<LedgerEntry> {
    // Statements either carry all eight columns or leave user_id out.
    let fields: Vec<SqlValue> = match values.len() {
        8 => values.into_iter().skip(1).collect(),
        7 => values,
        n => {
            return Err(AssistantError::Parse(format!(
                "expected {} values, found {}",
                LEDGER_COLUMNS.len(),
                n
            )))
        }
    };

    let mut it = fields.into_iter();
    let mut next = || it.next().unwrap_or(SqlValue::Null);

    let amount = match next() {
        SqlValue::Float(f) if f.is_finite() => f,
        SqlValue::Int(i) => i as f64,
        other => return Err(field_error("amount", &other)),
    };

    let category = required_text("category", next())?;

    let date = match next() {
        SqlValue::Date(d) => d,
        SqlValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|_| AssistantError::Parse(format!("invalid date '{}'", s)))?,
        other => return Err(field_error("date", &other)),
    };

    let description = optional_text("description", next())?;

    let recurring = match next() {
        SqlValue::Null => false,
        SqlValue::Int(0) => false,
        SqlValue::Int(1) => true,
        SqlValue::Raw(s) | SqlValue::Text(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "1" => true,
            "false" | "f" | "no" | "0" => false,
            _ => return Err(AssistantError::Parse(format!("invalid recurring flag '{}'", s))),
        },
        other => return Err(field_error("recurring", &other)),
    };

    let location = optional_text("location", next())?;
    let payment_method = required_text("payment_method", next())?;

    Ok(LedgerEntry {
        user_id,
        amount,
        category,
        date,
        description,
        recurring,
        location,
        payment_method,
    })
}

fn required_text(field: &str, value: SqlValue) -> Result<String> {
    match value {
        SqlValue::Text(s) if !s.trim().is_empty() => Ok(s),
        other => Err(field_error(field, &other)),
    }
}

fn optional_text(field: &str, value: SqlValue) -> Result<Option<String>> {
    match value {
        SqlValue::Null => Ok(None),
        SqlValue::Text(s) if s.trim().is_empty() => Ok(None),
        SqlValue::Text(s) => Ok(Some(s)),
        SqlValue::Int(i) => Ok(Some(i.to_string())),
        SqlValue::Float(f) => Ok(Some(f.to_string())),
        other => Err(field_error(field, &other)),
    }
}

fn field_error(field: &str, value: &SqlValue) -> AssistantError {
    AssistantError::Parse(format!("unexpected value for {}: {:?}", field, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 15).unwrap()
    }

    fn parse_entry(text: &str) -> LedgerEntry {
        match parse(text, 42, today()).unwrap() {
            ParsedOutput::Entry(entry) => entry,
            other => panic!("expected entry, got {:?}", other),
        }
    }

    #[test]
    fn test_seven_value_statement() {
        let entry = parse_entry(
            "Here is the SQL statement: INSERT INTO expenses (...) VALUES \
             (25.50, 'Food', CURRENT_DATE, 'lunch', 0, 'Cafe', 'Card')",
        );
        assert_eq!(
            entry,
            LedgerEntry {
                user_id: 42,
                amount: 25.5,
                category: "Food".to_string(),
                date: today(),
                description: Some("lunch".to_string()),
                recurring: false,
                location: Some("Cafe".to_string()),
                payment_method: "Card".to_string(),
            }
        );
    }

    #[test]
    fn test_eight_value_statement_ignores_user_id() {
        let entry = parse_entry(
            "Here is the SQL statement:\n```sql\nINSERT INTO expenses (user_id, amount, category, date, \
             description, recurring, location, payment_method)\nvalues (1, 45.99, 'Groceries', \
             '2024-07-14', NULL, 1, NULL, 'Debit Card');\n```",
        );
        assert_eq!(entry.user_id, 42);
        assert_eq!(entry.amount, 45.99);
        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2024, 7, 14).unwrap());
        assert_eq!(entry.description, None);
        assert!(entry.recurring);
        assert_eq!(entry.location, None);
        assert_eq!(entry.payment_method, "Debit Card");
    }

    #[test]
    fn test_quoted_commas_and_escapes() {
        let entry = parse_entry(
            r#"Here is the SQL statement: INSERT INTO expenses VALUES (1, 12, "Food", CURRENT_DATE, 'Joe\'s burgers, fries', FALSE, 'Bob''s Diner', 'Cash')"#,
        );
        assert_eq!(entry.amount, 12.0);
        assert_eq!(entry.description.as_deref(), Some("Joe's burgers, fries"));
        assert_eq!(entry.location.as_deref(), Some("Bob's Diner"));
        assert!(!entry.recurring);
    }

    #[test]
    fn test_plain_reply_passes_through() {
        let out = parse("You spent $120 on food last month.", 1, today()).unwrap();
        assert_eq!(
            out,
            ParsedOutput::Reply("You spent $120 on food last month.".to_string())
        );
    }

    #[test]
    fn test_malformed_statement_fails() {
        let err = parse("Here is the SQL statement: not a real insert", 1, today()).unwrap_err();
        assert!(matches!(err, AssistantError::Parse(_)));
    }

    #[test]
    fn test_wrong_arity_fails() {
        let err = parse(
            "Here is the SQL statement: INSERT INTO expenses VALUES (10.0, 'Food', CURRENT_DATE)",
            1,
            today(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("found 3"));
    }

    #[test]
    fn test_bad_field_types_fail() {
        // amount quoted as text
        assert!(parse(
            "Here is the SQL statement: INSERT INTO expenses VALUES ('ten', 'Food', CURRENT_DATE, NULL, 0, NULL, 'Cash')",
            1,
            today()
        )
        .is_err());

        // malformed decimal
        assert!(parse(
            "Here is the SQL statement: INSERT INTO expenses VALUES (1.2.3, 'Food', CURRENT_DATE, NULL, 0, NULL, 'Cash')",
            1,
            today()
        )
        .is_err());

        // missing payment method
        assert!(parse(
            "Here is the SQL statement: INSERT INTO expenses VALUES (5.0, 'Food', CURRENT_DATE, NULL, 0, NULL, NULL)",
            1,
            today()
        )
        .is_err());
    }

    #[test]
    fn test_unterminated_quote_fails() {
        assert!(parse(
            "Here is the SQL statement: INSERT INTO expenses VALUES (5.0, 'Food, CURRENT_DATE, NULL, 0, NULL, 'Cash')",
            1,
            today()
        )
        .is_err());
    }

    #[test]
    fn test_values_keyword_must_be_a_word() {
        assert_eq!(extract_values_list("my_values (1, 2)"), None);
        assert_eq!(extract_values_list("VALUES(1, 'a)b', 3)"), Some("1, 'a)b', 3"));
    }

    #[test]
    fn test_split_strips_trailing_comma_and_whitespace() {
        let tokens = split_values(" 1 ,'a, b',  NULL ").unwrap();
        assert_eq!(tokens, vec!["1", "'a, b'", "NULL"]);
    }
}
