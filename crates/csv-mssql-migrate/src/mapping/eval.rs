//! Evaluation of bound mappings against one record.

use super::{ConcatPart, Expr, MappingSet};
use crate::core::SqlValue;
use crate::error::{MigrateError, Result};
use csv::StringRecord;
use regex::Regex;
use std::collections::HashMap;

/// Hex characters kept from the MD5 digest of `hash()`.
///
/// 20 hex chars are 80 bits, so the value is a surrogate key rather than a
/// collision-proof identifier: about one collision is expected after 2^40
/// distinct inputs. Nothing checks uniqueness before insert; a unique index
/// on the target column is the place to catch one.
pub const HASH_LEN: usize = 20;

/// Trailing characters kept by the max-length policy.
pub const MAX_LENGTH_KEEP: usize = 20;

/// Field name to position, built from a source's header record.
#[derive(Debug, Clone, Default)]
pub struct HeaderIndex {
    positions: HashMap<String, usize>,
    width: usize,
}

impl HeaderIndex {
    /// Index a header. Duplicate names are rejected: with two `NAME` columns
    /// there is no way to tell which one `$NAME` means.
    pub fn from_header<I, S>(names: I, source_name: &str) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut positions = HashMap::new();
        let mut width = 0;
        for (i, name) in names.into_iter().enumerate() {
            let name = name.as_ref().to_string();
            if positions.contains_key(&name) {
                return Err(MigrateError::DuplicateHeader {
                    column: name,
                    source_name: source_name.to_string(),
                });
            }
            positions.insert(name, i);
            width = i + 1;
        }
        Ok(Self { positions, width })
    }

    /// Position of a named field.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// Number of fields every data row must have.
    pub fn width(&self) -> usize {
        self.width
    }
}

#[derive(Debug)]
enum BoundExpr<'m> {
    Column { index: usize, truncate: bool },
    Literal(&'m SqlValue),
    Hash(Vec<usize>),
    Replace {
        index: usize,
        pattern: &'m Regex,
        replacement: &'m str,
    },
    Concat(Vec<BoundPart<'m>>),
}

#[derive(Debug)]
enum BoundPart<'m> {
    Text(&'m str),
    Field(usize),
}

/// A mapping set with every column reference resolved to a position.
#[derive(Debug)]
pub struct BoundMappings<'m> {
    exprs: Vec<BoundExpr<'m>>,
}

impl<'m> BoundMappings<'m> {
    pub(super) fn bind(set: &'m MappingSet, header: &HeaderIndex, source_name: &str) -> Result<Self> {
        let lookup = |name: &str| {
            header
                .position(name)
                .ok_or_else(|| MigrateError::UnknownColumn {
                    column: name.to_string(),
                    source_name: source_name.to_string(),
                })
        };

        let mut exprs = Vec::with_capacity(set.mappings().len());
        for mapping in set.mappings() {
            let bound = match &mapping.source {
                Expr::ColumnRef(name) => BoundExpr::Column {
                    index: lookup(name.as_str())?,
                    truncate: set.truncates(name, &mapping.target),
                },
                Expr::Literal(value) => BoundExpr::Literal(value),
                Expr::HashOf(names) => BoundExpr::Hash(
                    names
                        .iter()
                        .map(|n| lookup(n.as_str()))
                        .collect::<Result<Vec<_>>>()?,
                ),
                Expr::ReplaceOf {
                    column,
                    pattern,
                    replacement,
                } => BoundExpr::Replace {
                    index: lookup(column.as_str())?,
                    pattern,
                    replacement: replacement.as_str(),
                },
                Expr::ConcatOf(parts) => BoundExpr::Concat(
                    parts
                        .iter()
                        .map(|p| match p {
                            ConcatPart::Text(t) => Ok(BoundPart::Text(t.as_str())),
                            ConcatPart::Column(c) => lookup(c.as_str()).map(BoundPart::Field),
                        })
                        .collect::<Result<Vec<_>>>()?,
                ),
            };
            exprs.push(bound);
        }
        Ok(Self { exprs })
    }

    /// Produce the ordered output values for one record.
    ///
    /// The record must be as wide as the header the mappings were bound to.
    pub fn evaluate(&self, record: &StringRecord) -> Vec<SqlValue> {
        let field = |i: usize| record.get(i).unwrap_or_default();

        self.exprs
            .iter()
            .map(|expr| match expr {
                BoundExpr::Literal(value) => (*value).clone(),
                BoundExpr::Column { index, truncate } => {
                    let raw = field(*index);
                    if *truncate {
                        finish(keep_trailing(raw, MAX_LENGTH_KEEP))
                    } else {
                        finish(raw)
                    }
                }
                BoundExpr::Hash(indexes) => {
                    let joined: String = indexes.iter().map(|i| field(*i)).collect();
                    let digest = format!("{:x}", md5::compute(joined.as_bytes()));
                    finish(&digest[..HASH_LEN])
                }
                BoundExpr::Replace {
                    index,
                    pattern,
                    replacement,
                } => finish(&pattern.replace_all(field(*index), *replacement)),
                BoundExpr::Concat(parts) => {
                    let joined: String = parts
                        .iter()
                        .map(|p| match p {
                            BoundPart::Text(t) => *t,
                            BoundPart::Field(i) => field(*i),
                        })
                        .collect();
                    finish(&joined)
                }
            })
            .collect()
    }
}

/// Post-process an evaluated string: trim, empty becomes NULL, and text in
/// scientific notation becomes a number, since SQL Server rejects strings
/// like `1E10` for numeric columns. Exponents out of `f64` range stay text.
fn finish(raw: &str) -> SqlValue {
    let value = raw.trim();
    if value.is_empty() {
        return SqlValue::Null;
    }
    if value.contains('E') {
        match value.parse::<f64>() {
            Ok(number) if number.is_finite() => return SqlValue::F64(number),
            _ => {}
        }
    }
    SqlValue::Text(value.to_string())
}

fn keep_trailing(raw: &str, keep: usize) -> &str {
    let count = raw.chars().count();
    if count <= keep {
        return raw;
    }
    match raw.char_indices().nth(count - keep) {
        Some((offset, _)) => &raw[offset..],
        None => raw,
    }
}
