//! Row-at-a-time insertion.

use super::{insert_statement, Sink, SinkStats, TargetConnection};
use crate::config::ErrorPolicy;
use crate::core::{render_sql, SqlValue};
use crate::error::{MigrateError, Result};
use async_trait::async_trait;
use tracing::{debug, error, info};

/// Executes one parameterized INSERT per accepted row.
///
/// The statement text is built on the first row and reused for every row
/// after it. Failures either propagate or are logged and skipped, depending
/// on the error policy.
pub struct RowInsertSink<'c, C: TargetConnection> {
    conn: &'c mut C,
    table: String,
    columns: Vec<String>,
    policy: ErrorPolicy,
    statement: Option<String>,
    closed: bool,
    stats: SinkStats,
}

impl<'c, C: TargetConnection> RowInsertSink<'c, C> {
    pub fn new(conn: &'c mut C, table: &str, columns: Vec<String>, policy: ErrorPolicy) -> Self {
        Self {
            conn,
            table: table.to_string(),
            columns,
            policy,
            statement: None,
            closed: false,
            stats: SinkStats::default(),
        }
    }

    /// Whether the INSERT statement has been prepared.
    pub fn is_prepared(&self) -> bool {
        self.statement.is_some()
    }
}

#[async_trait]
impl<'c, C: TargetConnection> Sink for RowInsertSink<'c, C> {
    async fn accept(&mut self, values: Vec<SqlValue>) -> Result<()> {
        if self.closed {
            return Err(MigrateError::SinkClosed(self.table.clone()));
        }
        self.stats.rows_accepted += 1;

        let sql = match &self.statement {
            Some(sql) => sql.clone(),
            None => {
                let sql = insert_statement(&self.table, &self.columns, 1);
                debug!("Prepared: {}", sql);
                self.statement = Some(sql.clone());
                sql
            }
        };
        debug!("{}", render_sql(&sql, &values));

        match self.conn.execute(&sql, &values).await {
            Ok(_) => {
                self.stats.rows_written += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.rows_failed += 1;
                match self.policy {
                    ErrorPolicy::Abort => Err(e),
                    ErrorPolicy::Continue => {
                        error!("Insert into {} failed: {}", self.table, e);
                        info!("{}", render_sql(&sql, &values));
                        Ok(())
                    }
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.statement.take().is_some() {
            debug!(
                "Released INSERT for {} after {} rows",
                self.table, self.stats.rows_accepted
            );
        }
        self.closed = true;
        Ok(())
    }

    fn stats(&self) -> SinkStats {
        self.stats
    }
}
