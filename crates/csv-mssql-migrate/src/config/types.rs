//! Configuration type definitions.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source keyword for a section that inserts one row of literals.
pub const STATIC_SOURCE: &str = "static";

/// Input columns truncated by the `max20` policy when no list is configured.
pub const DEFAULT_MAX20_COLUMNS: [&str; 2] = ["RECALL_LOG_ID", "RECALL_TRACE_ID"];

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target database (MSSQL) configuration.
    pub database: DatabaseConfig,

    /// Sink and error-policy options. Command-line flags override these.
    #[serde(default)]
    pub options: SinkOptions,

    /// Migration sections, in file order.
    #[serde(deserialize_with = "ordered_sections", serialize_with = "serialize_sections")]
    pub migration: Vec<SectionConfig>,
}

/// Target database (MSSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub server: String,

    /// Database port (default: 1433). Accepts a number or a quoted string.
    #[serde(default = "default_mssql_port", deserialize_with = "port_from_any")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub username: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Require an encrypted connection (default: false).
    #[serde(default)]
    pub encrypt: bool,

    /// Trust the server certificate without validation (default: true).
    #[serde(default = "default_true")]
    pub trust_server_cert: bool,

    /// Connection timeout in seconds (default: 300).
    #[serde(default = "default_conn_timeout")]
    pub connection_timeout: u64,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("connection_timeout", &self.connection_timeout)
            .finish()
    }
}

/// How a batched sink ships a flushed batch to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkMethod {
    /// Multi-row parameterized INSERT statements inside the batch transaction.
    #[default]
    Insert,

    /// TDS bulk load. The mapped columns must match the table's column order.
    Tds,
}

/// What to do when writing a row or draining a source fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Propagate the error and stop the run.
    Abort,

    /// Log the error and carry on with the next row or source.
    Continue,
}

/// Options shared by the evaluator and the sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkOptions {
    /// Abort on write failure instead of logging and continuing.
    #[serde(default)]
    pub exit_on_error: bool,

    /// Use the batched, transactional sink.
    #[serde(default)]
    pub bulk: bool,

    /// Rows per committed batch.
    #[serde(default = "default_bulk_limit")]
    pub bulk_limit: u64,

    /// Wire path used when a batch is flushed.
    #[serde(default)]
    pub bulk_method: BulkMethod,

    /// Columns coerced to dates in batched mode. When unset, every column
    /// whose name contains `date` is coerced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_columns: Option<Vec<String>>,

    /// Keep only the trailing 20 characters of the listed columns.
    #[serde(default)]
    pub max20: bool,

    /// Columns affected by `max20`.
    #[serde(default = "default_max20_columns")]
    pub max20_columns: Vec<String>,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            exit_on_error: false,
            bulk: false,
            bulk_limit: default_bulk_limit(),
            bulk_method: BulkMethod::default(),
            date_columns: None,
            max20: false,
            max20_columns: default_max20_columns(),
        }
    }
}

impl SinkOptions {
    /// Error policy derived from `exit_on_error`.
    pub fn error_policy(&self) -> ErrorPolicy {
        if self.exit_on_error {
            ErrorPolicy::Abort
        } else {
            ErrorPolicy::Continue
        }
    }

    /// Whether a target column is coerced to a date in batched mode.
    pub fn is_date_column(&self, column: &str) -> bool {
        match &self.date_columns {
            Some(list) if !list.is_empty() => list.iter().any(|c| c.trim() == column),
            _ => column.contains("date"),
        }
    }

    /// The truncation allow-list, empty when the policy is off.
    pub fn max_length_columns(&self) -> &[String] {
        if self.max20 {
            &self.max20_columns
        } else {
            &[]
        }
    }
}

/// One migration section: a set of sources feeding one target table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionConfig {
    /// Section name (the YAML key).
    #[serde(skip)]
    pub name: String,

    /// Comma-separated file/archive list, or `static`.
    #[serde(default)]
    pub source: String,

    /// Target table, used verbatim.
    #[serde(default)]
    pub target: String,

    /// Column mappings in file order.
    #[serde(
        default,
        deserialize_with = "ordered_columns",
        serialize_with = "serialize_columns"
    )]
    pub columns: Vec<ColumnEntry>,
}

impl SectionConfig {
    /// Whether this section inserts a single row of literals.
    pub fn is_static(&self) -> bool {
        self.source.trim() == STATIC_SOURCE
    }

    /// Target column names in mapping order.
    pub fn target_columns(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.target.clone()).collect()
    }
}

/// Raw `source-expression: target-column` pair from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnEntry {
    /// Expression or literal; any YAML scalar.
    pub source: serde_yaml::Value,

    /// Target column name.
    pub target: String,
}

fn ordered_sections<'de, D>(deserializer: D) -> std::result::Result<Vec<SectionConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let mapping = serde_yaml::Mapping::deserialize(deserializer)?;
    let mut sections = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let name = match key {
            serde_yaml::Value::String(s) => s,
            other => {
                return Err(de::Error::custom(format!(
                    "section names must be strings, got {:?}",
                    other
                )))
            }
        };
        if value.is_null() {
            return Err(de::Error::custom(format!("section {:?} is empty", name)));
        }
        let mut section: SectionConfig = serde_yaml::from_value(value)
            .map_err(|e| de::Error::custom(format!("section {:?}: {}", name, e)))?;
        section.name = name;
        sections.push(section);
    }
    Ok(sections)
}

fn serialize_sections<S>(sections: &[SectionConfig], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(sections.len()))?;
    for section in sections {
        map.serialize_entry(&section.name, section)?;
    }
    map.end()
}

fn ordered_columns<'de, D>(deserializer: D) -> std::result::Result<Vec<ColumnEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let mapping = Option::<serde_yaml::Mapping>::deserialize(deserializer)?.unwrap_or_default();
    mapping
        .into_iter()
        .map(|(source, target)| match target {
            serde_yaml::Value::String(target) => Ok(ColumnEntry { source, target }),
            other => Err(de::Error::custom(format!(
                "target column for {:?} must be a string, got {:?}",
                source, other
            ))),
        })
        .collect()
}

fn serialize_columns<S>(columns: &[ColumnEntry], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(columns.len()))?;
    for column in columns {
        map.serialize_entry(&column.source, &column.target)?;
    }
    map.end()
}

fn port_from_any<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(p) => Ok(p),
        Port::Text(s) if s.trim().is_empty() => Ok(default_mssql_port()),
        Port::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid port {:?}", s))),
    }
}

// Default value functions for serde
fn default_mssql_port() -> u16 {
    1433
}

fn default_true() -> bool {
    true
}

fn default_conn_timeout() -> u64 {
    300
}

fn default_bulk_limit() -> u64 {
    100_000
}

fn default_max20_columns() -> Vec<String> {
    DEFAULT_MAX20_COLUMNS.iter().map(|s| s.to_string()).collect()
}
