//! Target database access and insertion sinks.

mod batch;
mod mssql;
mod row;

pub use batch::{BatchInsertSink, BatchState};
pub use mssql::MssqlConnection;
pub use row::RowInsertSink;

use crate::config::SinkOptions;
use crate::core::SqlValue;
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;

/// SQL Server rejects statements with more than 2100 parameters.
pub const MAX_PARAMS_PER_STATEMENT: usize = 2000;

/// SQL Server rejects a VALUES list with more than 1000 rows.
pub const MAX_ROWS_PER_VALUES: usize = 1000;

/// Statement-level access to the target database.
///
/// Table and column identifiers are used verbatim; values are always bound
/// as `@P1..@Pn` parameters.
#[async_trait]
pub trait TargetConnection: Send {
    /// Execute one statement and return the number of rows affected.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Stream rows to a table with the bulk-load protocol.
    async fn bulk_load(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64>;
}

/// Receives mapped rows for one target table.
#[async_trait]
pub trait Sink: Send {
    /// Write, or queue, one row of values in target column order.
    async fn accept(&mut self, values: Vec<SqlValue>) -> Result<()>;

    /// Flush anything pending and release the sink's resources.
    async fn close(&mut self) -> Result<()>;

    /// Counters so far.
    fn stats(&self) -> SinkStats;
}

/// Row and batch counters of one sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub rows_accepted: u64,
    pub rows_written: u64,
    pub rows_failed: u64,
    pub batches_committed: u64,
}

/// Build the sink selected by `options` for one table.
pub fn build_sink<'c, C: TargetConnection + 'c>(
    conn: &'c mut C,
    table: &str,
    columns: Vec<String>,
    options: &SinkOptions,
) -> Box<dyn Sink + 'c> {
    if options.bulk {
        Box::new(BatchInsertSink::new(conn, table, columns, options))
    } else {
        Box::new(RowInsertSink::new(
            conn,
            table,
            columns,
            options.error_policy(),
        ))
    }
}

/// `INSERT INTO table (c1, c2) VALUES (@P1, @P2), (@P3, @P4), ...` for `rows` rows.
pub(crate) fn insert_statement(table: &str, columns: &[String], rows: usize) -> String {
    let width = columns.len();
    let groups: Vec<String> = (0..rows)
        .map(|r| {
            let placeholders: Vec<String> = (1..=width)
                .map(|c| format!("@P{}", r * width + c))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        columns.join(", "),
        groups.join(", ")
    )
}

/// Rows per multi-row INSERT for a given column count.
pub(crate) fn rows_per_statement(width: usize) -> usize {
    if width == 0 {
        return MAX_ROWS_PER_VALUES;
    }
    (MAX_PARAMS_PER_STATEMENT / width).clamp(1, MAX_ROWS_PER_VALUES)
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory connection that records what a sink sends.

    use super::*;
    use crate::error::MigrateError;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Execute { sql: String, params: Vec<SqlValue> },
        BulkLoad { table: String, rows: usize },
    }

    #[derive(Debug, Default)]
    pub struct RecordingConnection {
        pub calls: Vec<Call>,
        /// Fail any statement whose text contains this fragment.
        pub fail_on: Option<String>,
        /// Fail any statement binding this text value.
        pub fail_on_value: Option<String>,
    }

    impl RecordingConnection {
        pub fn failing_on(fragment: &str) -> Self {
            Self {
                fail_on: Some(fragment.to_string()),
                ..Default::default()
            }
        }

        pub fn failing_on_value(value: &str) -> Self {
            Self {
                fail_on_value: Some(value.to_string()),
                ..Default::default()
            }
        }

        pub fn statements(&self) -> Vec<&str> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Execute { sql, .. } => Some(sql.as_str()),
                    Call::BulkLoad { .. } => None,
                })
                .collect()
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.statements()
                .iter()
                .filter(|s| s.starts_with(prefix))
                .count()
        }

        /// Rows sent through INSERT statements or bulk loads.
        pub fn rows_inserted(&self, columns: usize) -> usize {
            self.calls
                .iter()
                .map(|c| match c {
                    Call::Execute { sql, params } if sql.starts_with("INSERT") => {
                        params.len() / columns
                    }
                    Call::BulkLoad { rows, .. } => *rows,
                    _ => 0,
                })
                .sum()
        }
    }

    #[async_trait]
    impl TargetConnection for RecordingConnection {
        async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
            self.calls.push(Call::Execute {
                sql: sql.to_string(),
                params: params.to_vec(),
            });
            if let Some(fragment) = &self.fail_on {
                if sql.contains(fragment.as_str()) {
                    return Err(MigrateError::write("", None, "injected failure"));
                }
            }
            if let Some(value) = &self.fail_on_value {
                if params.iter().any(|p| p.as_text() == Some(value.as_str())) {
                    return Err(MigrateError::write("", None, "injected failure"));
                }
            }
            Ok(if sql.starts_with("INSERT") {
                params.len() as u64
            } else {
                0
            })
        }

        async fn bulk_load(
            &mut self,
            table: &str,
            _columns: &[String],
            rows: &[Vec<SqlValue>],
        ) -> Result<u64> {
            self.calls.push(Call::BulkLoad {
                table: table.to_string(),
                rows: rows.len(),
            });
            Ok(rows.len() as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_statement_placeholders() {
        let cols = vec!["UWI".to_string(), "NAME".to_string()];
        assert_eq!(
            insert_statement("WELL", &cols, 1),
            "INSERT INTO WELL (UWI, NAME) VALUES (@P1, @P2)"
        );
        assert_eq!(
            insert_statement("WELL", &cols, 2),
            "INSERT INTO WELL (UWI, NAME) VALUES (@P1, @P2), (@P3, @P4)"
        );
    }

    #[test]
    fn test_rows_per_statement_limits() {
        assert_eq!(rows_per_statement(1), MAX_ROWS_PER_VALUES);
        assert_eq!(rows_per_statement(10), 200);
        assert_eq!(rows_per_statement(5000), 1);
    }
}
