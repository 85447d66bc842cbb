//! SQL value types produced by column mappings and bound by sinks.
//!
//! Every value a mapping emits is one of a handful of scalars. Text is the
//! common case; numbers come from scientific-notation coercion or from
//! non-string literals in the configuration, and dates only appear after
//! the batched sink has coerced a date column.

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

/// A nullable scalar bound to one target column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// Boolean literal (bit).
    Bool(bool),

    /// Integer literal (bigint).
    I64(i64),

    /// Double precision number.
    F64(f64),

    /// Text value.
    Text(String),

    /// Calendar date (after date-column coercion).
    Date(NaiveDate),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Borrow the text of a `Text` value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value as a SQL literal for logging.
    ///
    /// Only used for diagnostics; statements themselves always bind parameters.
    #[must_use]
    pub fn to_sql_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            SqlValue::I64(i) => i.to_string(),
            SqlValue::F64(f) => f.to_string(),
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Bool(b) => write!(f, "{}", b),
            SqlValue::I64(i) => write!(f, "{}", i),
            SqlValue::F64(v) => write!(f, "{}", v),
            SqlValue::Text(s) => f.write_str(s),
            SqlValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

/// Replace each `@Pn` placeholder of a statement with the rendered value.
///
/// Placeholders are substituted from the highest index down so `@P1` never
/// clobbers the prefix of `@P10`.
pub fn render_sql(sql: &str, values: &[SqlValue]) -> String {
    let mut rendered = sql.to_string();
    for (i, value) in values.iter().enumerate().rev() {
        rendered = rendered.replace(&format!("@P{}", i + 1), &value.to_sql_literal());
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_literal_escapes_quotes() {
        let v = SqlValue::Text("O'Brien".to_string());
        assert_eq!(v.to_sql_literal(), "'O''Brien'");
    }

    #[test]
    fn test_sql_literal_null_and_numbers() {
        assert_eq!(SqlValue::Null.to_sql_literal(), "NULL");
        assert_eq!(SqlValue::F64(1e10).to_sql_literal(), "10000000000");
        assert_eq!(SqlValue::I64(-3).to_sql_literal(), "-3");
        assert_eq!(SqlValue::Bool(true).to_sql_literal(), "1");
    }

    #[test]
    fn test_render_sql_multi_digit_placeholders() {
        let sql = (1..=11)
            .map(|i| format!("@P{}", i))
            .collect::<Vec<_>>()
            .join(",");
        let values: Vec<SqlValue> = (1..=11).map(|i| SqlValue::I64(i)).collect();
        assert_eq!(render_sql(&sql, &values), "1,2,3,4,5,6,7,8,9,10,11");
    }

    #[test]
    fn test_render_sql_insert() {
        let sql = "INSERT INTO WELL (UWI,NAME) VALUES (@P1, @P2)";
        let values = vec![SqlValue::from("100"), SqlValue::Null];
        assert_eq!(
            render_sql(sql, &values),
            "INSERT INTO WELL (UWI,NAME) VALUES ('100', NULL)"
        );
    }
}
