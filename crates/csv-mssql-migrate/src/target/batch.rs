//! Batched, transactional insertion.
//!
//! Rows accumulate inside one transaction until the batch threshold is
//! reached, then the batch is written and committed as a unit. Each batch is
//! atomic; a run as a whole is not, so batches committed before a failure
//! stay committed.
//!
//! ```text
//!           accept            flush (threshold or close)
//!   Idle ───────────▶ Open ───────────────────────────▶ Idle
//!    │                  │
//!    └── close ─────────┴── close (flush if pending) ──▶ Closed
//! ```

use super::{insert_statement, rows_per_statement, Sink, SinkStats, TargetConnection};
use crate::config::{BulkMethod, SinkOptions};
use crate::core::{render_sql, SqlValue};
use crate::error::{MigrateError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Calendar format of date columns.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Lifecycle of a batched sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// No transaction and no pending rows.
    Idle,

    /// A transaction is open and rows are pending.
    Open,

    /// Finished; further rows are rejected.
    Closed,
}

/// Sink that commits rows in batches of `bulk_limit`.
pub struct BatchInsertSink<'c, C: TargetConnection> {
    conn: &'c mut C,
    table: String,
    columns: Vec<String>,
    date_columns: Vec<bool>,
    method: BulkMethod,
    limit: usize,
    state: BatchState,
    pending: Vec<Vec<SqlValue>>,
    stats: SinkStats,
}

impl<'c, C: TargetConnection> BatchInsertSink<'c, C> {
    pub fn new(conn: &'c mut C, table: &str, columns: Vec<String>, options: &SinkOptions) -> Self {
        let date_columns = columns.iter().map(|c| options.is_date_column(c)).collect();
        let limit = usize::try_from(options.bulk_limit.max(1)).unwrap_or(usize::MAX);
        Self {
            conn,
            table: table.to_string(),
            columns,
            date_columns,
            method: options.bulk_method,
            limit,
            state: BatchState::Idle,
            pending: Vec::new(),
            stats: SinkStats::default(),
        }
    }

    /// Current lifecycle state.
    pub fn phase(&self) -> BatchState {
        self.state
    }

    /// Rows waiting for the next commit.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Idle → Open: begin the batch transaction.
    async fn open(&mut self) -> Result<()> {
        debug_assert_eq!(self.state, BatchState::Idle);
        self.conn.execute("BEGIN TRANSACTION", &[]).await?;
        self.pending.reserve(self.limit.min(10_000));
        self.state = BatchState::Open;
        debug!("Opened batch for {}", self.table);
        Ok(())
    }

    /// Open → Idle: write the pending rows and commit them.
    ///
    /// On failure the transaction is rolled back if still open, the pending
    /// rows are dropped, and the sink returns to `Idle`.
    async fn flush(&mut self) -> Result<()> {
        let rows = std::mem::take(&mut self.pending);
        self.state = BatchState::Idle;
        let count = rows.len() as u64;
        let started = Instant::now();

        match self.write_and_commit(&rows).await {
            Ok(()) => {
                self.stats.rows_written += count;
                self.stats.batches_committed += 1;
                info!(
                    "Committed {} rows to {} in {:.2}s (batch {})",
                    count,
                    self.table,
                    started.elapsed().as_secs_f64(),
                    self.stats.batches_committed
                );
                Ok(())
            }
            Err(e) => {
                self.stats.rows_failed += count;
                error!("Batch of {} rows for {} failed: {}", count, self.table, e);
                if let Err(rollback) = self
                    .conn
                    .execute("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION", &[])
                    .await
                {
                    warn!("Rollback for {} failed: {}", self.table, rollback);
                }
                Err(e)
            }
        }
    }

    /// Any → Closed: flush what is pending, then refuse further rows.
    async fn finish(&mut self) -> Result<()> {
        let result = match self.state {
            BatchState::Open => self.flush().await,
            BatchState::Idle | BatchState::Closed => Ok(()),
        };
        self.state = BatchState::Closed;
        result
    }

    async fn write_and_commit(&mut self, rows: &[Vec<SqlValue>]) -> Result<()> {
        match self.method {
            BulkMethod::Tds => {
                self.conn.bulk_load(&self.table, &self.columns, rows).await?;
            }
            BulkMethod::Insert => {
                for chunk in rows.chunks(rows_per_statement(self.columns.len())) {
                    let sql = insert_statement(&self.table, &self.columns, chunk.len());
                    let params: Vec<SqlValue> = chunk.iter().flatten().cloned().collect();
                    if tracing::enabled!(tracing::Level::TRACE) {
                        tracing::trace!("{}", render_sql(&sql, &params));
                    }
                    self.conn.execute(&sql, &params).await?;
                }
            }
        }
        self.conn.execute("COMMIT TRANSACTION", &[]).await?;
        Ok(())
    }

    /// Parse date-column text into dates; other values pass through.
    fn coerce_dates(&self, values: &mut [SqlValue]) -> Result<()> {
        for (i, value) in values.iter_mut().enumerate() {
            if !self.date_columns.get(i).copied().unwrap_or(false) {
                continue;
            }
            let parsed = match value {
                SqlValue::Null | SqlValue::Date(_) => continue,
                SqlValue::Text(text) => NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(|e| {
                    MigrateError::DataCoercion {
                        column: self.columns[i].clone(),
                        value: text.clone(),
                        message: format!("expected {}: {}", DATE_FORMAT, e),
                    }
                })?,
                other => {
                    return Err(MigrateError::DataCoercion {
                        column: self.columns[i].clone(),
                        value: other.to_string(),
                        message: "not a date".to_string(),
                    })
                }
            };
            *value = SqlValue::Date(parsed);
        }
        Ok(())
    }
}

#[async_trait]
impl<'c, C: TargetConnection> Sink for BatchInsertSink<'c, C> {
    async fn accept(&mut self, mut values: Vec<SqlValue>) -> Result<()> {
        if self.state == BatchState::Closed {
            return Err(MigrateError::SinkClosed(self.table.clone()));
        }
        self.coerce_dates(&mut values)?;

        if self.state == BatchState::Idle {
            self.open().await?;
        }
        self.pending.push(values);
        self.stats.rows_accepted += 1;

        if self.pending.len() >= self.limit {
            self.flush().await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.finish().await
    }

    fn stats(&self) -> SinkStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::testing::{Call, RecordingConnection};

    fn options(limit: u64) -> SinkOptions {
        SinkOptions {
            bulk: true,
            bulk_limit: limit,
            ..Default::default()
        }
    }

    fn columns() -> Vec<String> {
        vec!["UWI".to_string(), "spud_date".to_string()]
    }

    fn row(i: usize) -> Vec<SqlValue> {
        vec![SqlValue::from(i.to_string()), SqlValue::from("2020-01-31")]
    }

    #[tokio::test]
    async fn test_threshold_three_seven_rows() {
        let mut conn = RecordingConnection::default();
        {
            let mut sink = BatchInsertSink::new(&mut conn, "WELL", columns(), &options(3));
            for i in 0..7 {
                sink.accept(row(i)).await.unwrap();
                match i {
                    2 | 5 => assert_eq!(sink.phase(), BatchState::Idle),
                    _ => assert_eq!(sink.phase(), BatchState::Open),
                }
            }
            assert_eq!(sink.stats().batches_committed, 2);
            assert_eq!(sink.pending(), 1);

            sink.close().await.unwrap();
            assert_eq!(sink.phase(), BatchState::Closed);
            let stats = sink.stats();
            assert_eq!(stats.batches_committed, 3);
            assert_eq!(stats.rows_written, 7);
        }
        assert_eq!(conn.count("BEGIN TRANSACTION"), 3);
        assert_eq!(conn.count("COMMIT TRANSACTION"), 3);
        assert_eq!(conn.rows_inserted(2), 7);
    }

    #[tokio::test]
    async fn test_close_without_rows_commits_nothing() {
        let mut conn = RecordingConnection::default();
        {
            let mut sink = BatchInsertSink::new(&mut conn, "WELL", columns(), &options(3));
            sink.close().await.unwrap();
            assert_eq!(sink.phase(), BatchState::Closed);
            sink.close().await.unwrap();
        }
        assert!(conn.calls.is_empty());
    }

    #[tokio::test]
    async fn test_close_after_exact_flush_is_noop() {
        let mut conn = RecordingConnection::default();
        {
            let mut sink = BatchInsertSink::new(&mut conn, "WELL", columns(), &options(2));
            sink.accept(row(1)).await.unwrap();
            sink.accept(row(2)).await.unwrap();
            assert_eq!(sink.phase(), BatchState::Idle);
            sink.close().await.unwrap();
        }
        assert_eq!(conn.count("COMMIT TRANSACTION"), 1);
    }

    #[tokio::test]
    async fn test_date_columns_are_coerced() {
        let mut conn = RecordingConnection::default();
        {
            let mut sink = BatchInsertSink::new(&mut conn, "WELL", columns(), &options(10));
            sink.accept(row(1)).await.unwrap();
            sink.accept(vec![SqlValue::from("2"), SqlValue::Null]).await.unwrap();
            sink.close().await.unwrap();
        }
        let insert = conn
            .calls
            .iter()
            .find_map(|c| match c {
                Call::Execute { sql, params } if sql.starts_with("INSERT") => Some(params.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            insert[1],
            SqlValue::Date(NaiveDate::from_ymd_opt(2020, 1, 31).unwrap())
        );
        assert_eq!(insert[3], SqlValue::Null);
    }

    #[tokio::test]
    async fn test_bad_date_is_fatal_and_not_queued() {
        let mut conn = RecordingConnection::default();
        let mut sink = BatchInsertSink::new(&mut conn, "WELL", columns(), &options(10));
        sink.accept(row(1)).await.unwrap();
        let err = sink
            .accept(vec![SqlValue::from("2"), SqlValue::from("31/01/2020")])
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, MigrateError::DataCoercion { .. }));
        assert_eq!(sink.pending(), 1);
        assert_eq!(sink.phase(), BatchState::Open);
    }

    #[tokio::test]
    async fn test_explicit_date_columns_override_default() {
        let mut opts = options(10);
        opts.date_columns = Some(vec!["UWI".to_string()]);
        let mut conn = RecordingConnection::default();
        let mut sink = BatchInsertSink::new(&mut conn, "WELL", columns(), &opts);
        // spud_date is not listed, so free text passes; UWI must be a date.
        sink.accept(vec![SqlValue::from("2021-05-06"), SqlValue::from("unknown")])
            .await
            .unwrap();
        assert!(sink
            .accept(vec![SqlValue::from("100"), SqlValue::Null])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_failed_flush_rolls_back_and_returns_to_idle() {
        let mut conn = RecordingConnection::failing_on("INSERT");
        {
            let mut sink = BatchInsertSink::new(&mut conn, "WELL", columns(), &options(2));
            sink.accept(row(1)).await.unwrap();
            assert!(sink.accept(row(2)).await.is_err());
            assert_eq!(sink.phase(), BatchState::Idle);
            assert_eq!(sink.stats().rows_failed, 2);
            assert_eq!(sink.stats().batches_committed, 0);
            sink.close().await.unwrap();
        }
        assert_eq!(conn.count("IF @@TRANCOUNT > 0 ROLLBACK"), 1);
        assert_eq!(conn.count("COMMIT TRANSACTION"), 0);
    }

    #[tokio::test]
    async fn test_earlier_batches_stay_committed() {
        let mut conn = RecordingConnection::failing_on_value("4");
        {
            let mut sink = BatchInsertSink::new(&mut conn, "WELL", columns(), &options(2));
            for i in 1..=3 {
                sink.accept(row(i)).await.unwrap();
            }
            assert!(sink.accept(row(4)).await.is_err());
            let stats = sink.stats();
            assert_eq!(stats.batches_committed, 1);
            assert_eq!(stats.rows_written, 2);
        }
        assert_eq!(conn.count("COMMIT TRANSACTION"), 1);
    }

    #[tokio::test]
    async fn test_tds_method_uses_bulk_load() {
        let mut opts = options(2);
        opts.bulk_method = BulkMethod::Tds;
        let mut conn = RecordingConnection::default();
        {
            let mut sink = BatchInsertSink::new(&mut conn, "WELL", columns(), &opts);
            for i in 0..3 {
                sink.accept(row(i)).await.unwrap();
            }
            sink.close().await.unwrap();
        }
        assert_eq!(
            conn.calls
                .iter()
                .filter(|c| matches!(c, Call::BulkLoad { .. }))
                .count(),
            2
        );
        assert_eq!(conn.rows_inserted(2), 3);
    }

    #[tokio::test]
    async fn test_large_batch_is_chunked() {
        let cols: Vec<String> = (0..500).map(|i| format!("C{}", i)).collect();
        let mut conn = RecordingConnection::default();
        {
            let mut sink = BatchInsertSink::new(&mut conn, "WIDE", cols.clone(), &options(10));
            for _ in 0..10 {
                sink.accept(vec![SqlValue::from("x"); 500]).await.unwrap();
            }
            assert_eq!(sink.stats().batches_committed, 1);
        }
        // 2000 params / 500 columns = 4 rows per statement
        assert_eq!(conn.count("INSERT"), 3);
        assert_eq!(conn.rows_inserted(500), 10);
    }

    #[tokio::test]
    async fn test_closed_sink_rejects_rows() {
        let mut conn = RecordingConnection::default();
        let mut sink = BatchInsertSink::new(&mut conn, "WELL", columns(), &options(2));
        sink.close().await.unwrap();
        assert!(matches!(
            sink.accept(row(1)).await,
            Err(MigrateError::SinkClosed(_))
        ));
    }
}
