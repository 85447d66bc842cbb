//! Column-mapping expressions.
//!
//! Each configured `source: target` pair becomes a [`ColumnMapping`]. The
//! source side is either a literal, emitted unchanged for every row, or a
//! `$` expression:
//!
//! | Form                        | Meaning                                        |
//! |-----------------------------|------------------------------------------------|
//! | `$name`                     | raw value of input column `name`               |
//! | `$hash(c1, c2, ...)`        | 20 hex chars of the MD5 of the concatenation   |
//! | `$replace(col, re, repl)`   | regex substitute-all on `col`                  |
//! | `$concat(p1, p2, ...)`      | `'literal'` parts and column values, joined    |
//!
//! Expressions are parsed once per section and bound to a header once per
//! source, so evaluating a row never looks anything up by name.

mod eval;
mod parse;

pub use eval::{BoundMappings, HeaderIndex, HASH_LEN, MAX_LENGTH_KEEP};
pub use parse::{literal_from_yaml, parse_expr, static_literal};

use crate::config::{SectionConfig, SinkOptions};
use crate::core::SqlValue;
use crate::error::{MigrateError, Result};
use regex::Regex;

/// A parsed mapping expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Raw value of an input column.
    ColumnRef(String),

    /// Constant emitted for every row.
    Literal(SqlValue),

    /// Truncated MD5 of the listed columns' raw values, in order.
    HashOf(Vec<String>),

    /// Regex substitution over one column.
    ReplaceOf {
        column: String,
        pattern: Regex,
        replacement: String,
    },

    /// Concatenation of literal text and column values.
    ConcatOf(Vec<ConcatPart>),
}

/// One argument of `concat()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcatPart {
    /// Quoted literal text, quotes stripped.
    Text(String),

    /// Raw value of an input column.
    Column(String),
}

impl Expr {
    /// Input columns this expression reads, in argument order.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Expr::ColumnRef(name) => vec![name.as_str()],
            Expr::Literal(_) => Vec::new(),
            Expr::HashOf(names) => names.iter().map(String::as_str).collect(),
            Expr::ReplaceOf { column, .. } => vec![column.as_str()],
            Expr::ConcatOf(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ConcatPart::Column(name) => Some(name.as_str()),
                    ConcatPart::Text(_) => None,
                })
                .collect(),
        }
    }

    /// Whether the expression is a constant.
    pub fn is_literal(&self) -> bool {
        matches!(self, Expr::Literal(_))
    }
}

/// A parsed source expression paired with its target column.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub source: Expr,
    pub target: String,
}

/// The ordered mappings of one section plus the policies that shape evaluation.
#[derive(Debug, Clone)]
pub struct MappingSet {
    mappings: Vec<ColumnMapping>,
    max_length_columns: Vec<String>,
}

impl MappingSet {
    /// Parse every column entry of a section.
    ///
    /// Entries of a `static` section are literals whatever they look like,
    /// and an empty one is NULL.
    pub fn from_section(section: &SectionConfig, options: &SinkOptions) -> Result<Self> {
        let mut mappings = Vec::with_capacity(section.columns.len());
        for entry in &section.columns {
            let source = if section.is_static() {
                static_literal(&entry.source)?
            } else {
                parse_expr(&entry.source).map_err(|e| match e {
                    MigrateError::Config(msg) => MigrateError::Config(format!(
                        "{:?}, column {}: {}",
                        section.name, entry.target, msg
                    )),
                    other => other,
                })?
            };
            mappings.push(ColumnMapping {
                source,
                target: entry.target.trim().to_string(),
            });
        }
        Ok(Self::new(mappings, options.max_length_columns().to_vec()))
    }

    /// Build a set from already parsed mappings.
    pub fn new(mappings: Vec<ColumnMapping>, max_length_columns: Vec<String>) -> Self {
        Self {
            mappings,
            max_length_columns,
        }
    }

    pub fn mappings(&self) -> &[ColumnMapping] {
        &self.mappings
    }

    /// Target column names in mapping order.
    pub fn target_columns(&self) -> Vec<String> {
        self.mappings.iter().map(|m| m.target.clone()).collect()
    }

    /// Whether no mapping reads an input column.
    pub fn is_constant(&self) -> bool {
        self.mappings.iter().all(|m| m.source.is_literal())
    }

    /// The single row produced by a section with no input.
    pub fn literal_row(&self) -> Result<Vec<SqlValue>> {
        self.mappings
            .iter()
            .map(|m| match &m.source {
                Expr::Literal(v) => Ok(v.clone()),
                other => Err(MigrateError::Config(format!(
                    "column {} reads {:?} but the source has no input columns",
                    m.target,
                    other.columns()
                ))),
            })
            .collect()
    }

    /// Resolve every column reference against a source header.
    pub fn bind(&self, header: &HeaderIndex, source_name: &str) -> Result<BoundMappings<'_>> {
        BoundMappings::bind(self, header, source_name)
    }

    pub(crate) fn truncates(&self, input_column: &str, target_column: &str) -> bool {
        self.max_length_columns
            .iter()
            .any(|c| c == input_column || c == target_column)
    }
}
