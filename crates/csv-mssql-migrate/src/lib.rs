//! # csv-mssql-migrate
//!
//! Loads delimited text files into SQL Server tables as described by a YAML
//! migration file.
//!
//! Each section of the file names a list of sources (plain files, or zip
//! archives whose entries are read one by one), a target table, and an
//! ordered set of column mappings:
//!
//! - **Mapping expressions** (`$col`, `$hash(..)`, `$replace(..)`,
//!   `$concat(..)`) parsed once and bound to each source header
//! - **Row-at-a-time inserts** with an abort or continue error policy
//! - **Batched inserts** committed every `bulk_limit` rows, either as
//!   multi-row INSERTs or through the TDS bulk-load protocol
//! - **Static sections** that insert one row of constants
//!
//! ## Example
//!
//! ```rust,no_run
//! use csv_mssql_migrate::{Config, Migrator, MssqlConnection};
//!
//! # async fn example() -> csv_mssql_migrate::Result<()> {
//! let config = Config::load("migration.yaml")?;
//! let migrator = Migrator::new(&config, config.options.clone())?;
//! let mut conn = MssqlConnection::connect(&config.database).await?;
//! let report = migrator.run(&mut conn).await?;
//! println!("Wrote {} rows", report.rows_written);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod mapping;
pub mod orchestrator;
pub mod source;
pub mod target;

// Re-exports for convenient access
pub use crate::core::{render_sql, SqlValue};
pub use config::{BulkMethod, Config, DatabaseConfig, ErrorPolicy, SectionConfig, SinkOptions};
pub use error::{MigrateError, Result};
pub use mapping::{BoundMappings, Expr, HeaderIndex, MappingSet};
pub use orchestrator::{MigrationReport, Migrator, SectionReport, SourceReport};
pub use source::{CsvRowSource, SourceLocator, SourceSpec};
pub use target::{
    BatchInsertSink, BatchState, MssqlConnection, RowInsertSink, Sink, SinkStats,
    TargetConnection,
};
