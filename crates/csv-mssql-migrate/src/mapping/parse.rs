//! Parser for mapping source expressions.

use super::{ConcatPart, Expr};
use crate::core::SqlValue;
use crate::error::{MigrateError, Result};
use regex::Regex;

/// Marks a source entry as an expression rather than a literal.
const EXPR_PREFIX: char = '$';

/// A function argument as written.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    /// `'text'` with the quotes stripped; inner whitespace is kept.
    Quoted(String),

    /// Anything else, trimmed.
    Bare(String),
}

impl Arg {
    fn into_text(self) -> String {
        match self {
            Arg::Quoted(s) | Arg::Bare(s) => s,
        }
    }

    fn into_column(self, function: &str) -> Result<String> {
        match self {
            Arg::Bare(name) if !name.is_empty() => Ok(name),
            Arg::Bare(_) => Err(MigrateError::Config(format!(
                "{}(): empty column name",
                function
            ))),
            Arg::Quoted(text) => Err(MigrateError::Config(format!(
                "{}(): expected a column name, got literal '{}'",
                function, text
            ))),
        }
    }
}

/// Parse one configured source entry.
///
/// Strings starting with `$` are expressions; any other scalar is a literal.
pub fn parse_expr(value: &serde_yaml::Value) -> Result<Expr> {
    match value {
        serde_yaml::Value::String(s) => match s.strip_prefix(EXPR_PREFIX) {
            Some(body) => parse_reference(body),
            None => literal_from_yaml(value),
        },
        _ => literal_from_yaml(value),
    }
}

/// Convert a YAML scalar into a literal expression. Strings are kept as
/// written, including the empty string.
pub fn literal_from_yaml(value: &serde_yaml::Value) -> Result<Expr> {
    let literal = match value {
        serde_yaml::Value::Null => SqlValue::Null,
        serde_yaml::Value::Bool(b) => SqlValue::Bool(*b),
        serde_yaml::Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::I64(i),
            None => SqlValue::F64(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_yaml::Value::String(s) => SqlValue::Text(s.clone()),
        other => {
            return Err(MigrateError::Config(format!(
                "mapping source must be a scalar, got {:?}",
                other
            )))
        }
    };
    Ok(Expr::Literal(literal))
}

/// Literal of a `static` section, where an empty string means NULL.
pub fn static_literal(value: &serde_yaml::Value) -> Result<Expr> {
    match value {
        serde_yaml::Value::String(s) if s.is_empty() => Ok(Expr::Literal(SqlValue::Null)),
        _ => literal_from_yaml(value),
    }
}

fn parse_reference(body: &str) -> Result<Expr> {
    let body = body.trim();

    if let Some(inner) = call_args(body, "hash")? {
        let args = split_args(inner)?;
        if args.is_empty() {
            return Err(MigrateError::Arity {
                function: "hash",
                expected: "at least 1",
                found: 0,
            });
        }
        let columns = args
            .into_iter()
            .map(|a| a.into_column("hash"))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Expr::HashOf(columns));
    }

    if let Some(inner) = call_args(body, "replace")? {
        let args = split_args(inner)?;
        if args.len() != 3 {
            return Err(MigrateError::Arity {
                function: "replace",
                expected: "3",
                found: args.len(),
            });
        }
        let mut args = args.into_iter();
        let column = next_arg(&mut args)?.into_column("replace")?;
        let pattern_text = next_arg(&mut args)?.into_text();
        let replacement = next_arg(&mut args)?.into_text();
        let pattern = Regex::new(&pattern_text).map_err(|source| MigrateError::InvalidPattern {
            pattern: pattern_text.clone(),
            source,
        })?;
        return Ok(Expr::ReplaceOf {
            column,
            pattern,
            replacement,
        });
    }

    if let Some(inner) = call_args(body, "concat")? {
        let args = split_args(inner)?;
        if args.is_empty() {
            return Err(MigrateError::Arity {
                function: "concat",
                expected: "at least 1",
                found: 0,
            });
        }
        let parts = args
            .into_iter()
            .map(|a| match a {
                Arg::Quoted(text) => Ok(ConcatPart::Text(text)),
                bare => bare.into_column("concat").map(ConcatPart::Column),
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(Expr::ConcatOf(parts));
    }

    if body.is_empty() {
        return Err(MigrateError::Config("empty column reference '$'".into()));
    }
    if body.ends_with(')') {
        if let Some((name, _)) = body.split_once('(') {
            return Err(MigrateError::Config(format!(
                "unknown function {:?}",
                name.trim()
            )));
        }
    }
    Ok(Expr::ColumnRef(body.to_string()))
}

fn next_arg(args: &mut impl Iterator<Item = Arg>) -> Result<Arg> {
    args.next()
        .ok_or_else(|| MigrateError::Config("missing function argument".into()))
}

/// Return the text between the parentheses of `name(...)`, if `body` is a
/// call of that function.
///
/// A bare column that merely starts with the function name (`hashcode`) is
/// not a call.
fn call_args<'a>(body: &'a str, name: &str) -> Result<Option<&'a str>> {
    let Some(rest) = body.strip_prefix(name) else {
        return Ok(None);
    };
    let Some(rest) = rest.trim_start().strip_prefix('(') else {
        return Ok(None);
    };
    match rest.trim_end().strip_suffix(')') {
        Some(inner) => Ok(Some(inner)),
        None => Err(MigrateError::Config(format!(
            "{}(: missing closing parenthesis",
            name
        ))),
    }
}

/// Split an argument list on commas that are not inside single quotes.
fn split_args(inner: &str) -> Result<Vec<Arg>> {
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for c in inner.chars() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            ',' if !in_quote => args.push(classify(std::mem::take(&mut current))),
            _ => current.push(c),
        }
    }
    if in_quote {
        return Err(MigrateError::Config(format!(
            "unterminated quote in argument list {:?}",
            inner
        )));
    }
    args.push(classify(current));
    Ok(args)
}

fn classify(raw: String) -> Arg {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        Arg::Quoted(trimmed[1..trimmed.len() - 1].to_string())
    } else {
        Arg::Bare(trimmed.to_string())
    }
}
