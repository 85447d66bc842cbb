//! SQL Server connection over tiberius.

use super::TargetConnection;
use crate::config::DatabaseConfig;
use crate::core::SqlValue;
use crate::error::{MigrateError, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use std::borrow::Cow;
use std::collections::HashSet;
use std::time::Duration;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, ToSql, TokenRow};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

/// A single client connection to the target database.
pub struct MssqlConnection {
    client: Client<Compat<TcpStream>>,
    /// Table and column lists already checked for bulk load.
    bulk_checked: HashSet<(String, Vec<String>)>,
}

impl MssqlConnection {
    /// Connect and authenticate, giving up after `connection_timeout` seconds.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.connection_timeout.max(1));
        let tiberius_config = build_config(config);

        let client = tokio::time::timeout(timeout, async {
            let tcp = TcpStream::connect(tiberius_config.get_addr())
                .await
                .map_err(|e| tiberius::error::Error::Io {
                    kind: e.kind(),
                    message: e.to_string(),
                })?;
            tcp.set_nodelay(true).ok();
            Client::connect(tiberius_config, tcp.compat_write()).await
        })
        .await
        .map_err(|_| {
            MigrateError::Target(tiberius::error::Error::Io {
                kind: std::io::ErrorKind::TimedOut,
                message: format!("no connection after {}s", timeout.as_secs()),
            })
        })??;

        info!(
            "Connected to MSSQL target: {}:{}/{}",
            config.server, config.port, config.database
        );
        Ok(Self {
            client,
            bulk_checked: HashSet::new(),
        })
    }

    /// Round-trip a trivial query.
    pub async fn ping(&mut self) -> Result<()> {
        self.client.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    /// Column names of `table` in physical order.
    async fn table_columns(&mut self, table: &str) -> Result<Vec<String>> {
        let query = r#"
            SELECT c.name
            FROM sys.columns c
            WHERE c.object_id = OBJECT_ID(@P1)
            ORDER BY c.column_id
        "#;
        let rows = self
            .client
            .query(query, &[&table])
            .await?
            .into_first_result()
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: &str = row.get(0).ok_or_else(|| {
                MigrateError::write(table, None, "missing column name in sys.columns")
            })?;
            columns.push(name.to_string());
        }
        Ok(columns)
    }

    /// Close the underlying connection.
    pub async fn close(self) -> Result<()> {
        self.client.close().await?;
        Ok(())
    }
}

fn build_config(db: &DatabaseConfig) -> Config {
    let mut config = Config::new();
    config.host(&db.server);
    config.port(db.port);
    config.database(&db.database);
    config.authentication(AuthMethod::sql_server(&db.username, &db.password));

    if db.encrypt {
        config.encryption(EncryptionLevel::Required);
    } else {
        config.encryption(EncryptionLevel::NotSupported);
    }
    if db.trust_server_cert {
        config.trust_cert();
    }
    config
}

#[async_trait]
impl TargetConnection for MssqlConnection {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let boxed: Vec<Box<dyn ToSql>> = params.iter().map(sql_value_to_sql_param).collect();
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|p| p.as_ref()).collect();
        let result = self.client.execute(sql, &refs).await?;
        Ok(result.total())
    }

    async fn bulk_load(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let key = (table.to_string(), columns.to_vec());
        if !self.bulk_checked.contains(&key) {
            let table_columns = self.table_columns(table).await?;
            check_bulk_columns(table, &table_columns, columns)?;
            self.bulk_checked.insert(key);
        }

        let mut request = self.client.bulk_insert(table).await?;
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(MigrateError::write(
                    table,
                    None,
                    format!(
                        "bulk row {} has {} values for {} columns",
                        i + 1,
                        row.len(),
                        columns.len()
                    ),
                ));
            }
            let mut token_row = TokenRow::new();
            for value in row {
                token_row.push(sql_value_to_column_data(value));
            }
            request.send(token_row).await?;
        }
        let total = request.finalize().await?.total();
        debug!("Bulk loaded {} rows into {}", total, table);
        Ok(total)
    }
}

/// Bulk load sends every column of the table in physical order, so the
/// mapped columns must be exactly that list. Names compare case-insensitively
/// as in the default collation.
fn check_bulk_columns(table: &str, table_columns: &[String], mapped: &[String]) -> Result<()> {
    if table_columns.is_empty() {
        return Err(MigrateError::Config(format!(
            "bulk load target {} not found or has no columns",
            table
        )));
    }
    let matches = table_columns.len() == mapped.len()
        && table_columns
            .iter()
            .zip(mapped)
            .all(|(t, m)| t.eq_ignore_ascii_case(m.trim()));
    if !matches {
        return Err(MigrateError::Config(format!(
            "bulk load into {} needs the mapped columns in table order: table has [{}], section maps [{}]",
            table,
            table_columns.join(", "),
            mapped.join(", ")
        )));
    }
    Ok(())
}

/// Convert a value into a bound statement parameter.
fn sql_value_to_sql_param(value: &SqlValue) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null => Box::new(Option::<String>::None),
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::I64(i) => Box::new(*i),
        SqlValue::F64(f) => Box::new(*f),
        SqlValue::Text(s) => Box::new(s.clone()),
        // Dates bind as datetime2 at midnight so they load into date and
        // datetime columns alike.
        SqlValue::Date(d) => Box::new(d.and_time(NaiveTime::MIN)),
    }
}

/// Convert a value into TDS column data for the bulk-load protocol.
fn sql_value_to_column_data(value: &SqlValue) -> ColumnData<'static> {
    match value {
        SqlValue::Null => ColumnData::String(None),
        SqlValue::Bool(b) => ColumnData::Bit(Some(*b)),
        SqlValue::I64(i) => ColumnData::I64(Some(*i)),
        SqlValue::F64(f) => {
            if f.is_nan() || f.is_infinite() {
                // MSSQL doesn't support NaN/Infinity, convert to NULL
                warn!("Converting F64 NaN/Infinity to NULL for MSSQL compatibility");
                ColumnData::F64(None)
            } else {
                ColumnData::F64(Some(*f))
            }
        }
        SqlValue::Text(s) => ColumnData::String(Some(Cow::Owned(s.clone()))),
        SqlValue::Date(d) => {
            // DateTime2 rather than Date: tiberius bulk load mis-encodes DATE.
            let days = match NaiveDate::from_ymd_opt(1, 1, 1) {
                Some(epoch) => (*d - epoch).num_days(),
                None => -1,
            };
            if days < 0 || days > u32::MAX as i64 {
                warn!("Date out of valid range (days={}), converting to NULL", days);
                return ColumnData::DateTime2(None);
            }
            let date = tiberius::time::Date::new(days as u32);
            let time = tiberius::time::Time::new(0, 7);
            ColumnData::DateTime2(Some(tiberius::time::DateTime2::new(date, time)))
        }
    }
}
