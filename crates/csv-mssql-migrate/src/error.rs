//! Error types for the migration library.

use crate::orchestrator::MigrationReport;
use thiserror::Error;

/// Exit code for configuration errors (bad YAML, unknown columns, bad expressions).
pub const EXIT_CONFIG_ERROR: u8 = 1;

/// Exit code for data errors that cannot be skipped (date coercion).
pub const EXIT_DATA_ERROR: u8 = 2;

/// Exit code for target database failures.
pub const EXIT_TARGET_ERROR: u8 = 3;

/// Exit code for file and archive errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A mapping references a column the source header does not define.
    #[error("Unable to find column {column:?} in source {source_name}")]
    UnknownColumn { column: String, source_name: String },

    /// A mapping function was called with the wrong number of arguments.
    #[error("{function}() takes {expected} argument(s), got {found}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        found: usize,
    },

    /// A replace() pattern failed to compile.
    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The header of a row source names the same column twice.
    #[error("Duplicate header {column:?} in source {source_name}")]
    DuplicateHeader { column: String, source_name: String },

    /// A data row has a different width than the header.
    #[error("Wrong width at row {row} of {source_name}: expected {expected} fields, found {found}")]
    RowShape {
        source_name: String,
        row: u64,
        expected: usize,
        found: usize,
    },

    /// A value could not be converted for a typed target column.
    #[error("Cannot convert {value:?} for column {column}: {message}")]
    DataCoercion {
        column: String,
        value: String,
        message: String,
    },

    /// Statement or transaction failure while writing rows.
    #[error("Write failed for {source_name}{}: {message}", row_suffix(.row))]
    Write {
        source_name: String,
        row: Option<u64>,
        message: String,
    },

    /// The sink was used after it was closed.
    #[error("Sink for table {0} is closed")]
    SinkClosed(String),

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tiberius::error::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Delimited text could not be read.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Zip archive could not be read.
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A run stopped part-way. The report covers the work done before the
    /// failure, including batches that stay committed.
    #[error("{error}")]
    Aborted {
        error: Box<MigrateError>,
        report: Box<MigrationReport>,
    },
}

impl MigrateError {
    /// Create a Write error for a row of a named source.
    pub fn write(source_name: impl Into<String>, row: Option<u64>, message: impl ToString) -> Self {
        MigrateError::Write {
            source_name: source_name.into(),
            row,
            message: message.to_string(),
        }
    }

    /// Attach source/row context to a failure coming out of a sink.
    ///
    /// Errors that already carry their own classification pass through unchanged.
    pub fn with_row_context(self, source_name: &str, row: Option<u64>) -> Self {
        match self {
            MigrateError::Target(e) => MigrateError::write(source_name, row, e),
            MigrateError::Write { message, .. } => MigrateError::write(source_name, row, message),
            other => other,
        }
    }

    /// Whether the error must stop the whole run, whatever the error policy says.
    ///
    /// Configuration defects are never data dependent, and a value that fails
    /// coercion cannot be removed from an in-flight batch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.cause(),
            MigrateError::Config(_)
                | MigrateError::UnknownColumn { .. }
                | MigrateError::Arity { .. }
                | MigrateError::InvalidPattern { .. }
                | MigrateError::DuplicateHeader { .. }
                | MigrateError::DataCoercion { .. }
                | MigrateError::Yaml(_)
        )
    }

    /// The underlying error of an aborted run, or the error itself.
    pub fn cause(&self) -> &MigrateError {
        match self {
            MigrateError::Aborted { error, .. } => error.cause(),
            other => other,
        }
    }

    /// Report of the work done before a run was aborted.
    pub fn partial_report(&self) -> Option<&MigrationReport> {
        match self {
            MigrateError::Aborted { report, .. } => Some(report.as_ref()),
            _ => None,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self.cause() {
            MigrateError::Config(_)
            | MigrateError::UnknownColumn { .. }
            | MigrateError::Arity { .. }
            | MigrateError::InvalidPattern { .. }
            | MigrateError::Yaml(_)
            | MigrateError::Json(_) => EXIT_CONFIG_ERROR,
            MigrateError::DuplicateHeader { .. }
            | MigrateError::RowShape { .. }
            | MigrateError::DataCoercion { .. }
            | MigrateError::Csv(_) => EXIT_DATA_ERROR,
            MigrateError::Write { .. } | MigrateError::SinkClosed(_) | MigrateError::Target(_) => {
                EXIT_TARGET_ERROR
            }
            MigrateError::Io(_) | MigrateError::Archive(_) => EXIT_IO_ERROR,
            MigrateError::Aborted { error, .. } => error.exit_code(),
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let cause = self.cause();
        let mut output = format!("Error: {}\n", cause);

        let mut source = std::error::Error::source(cause);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

fn row_suffix(row: &Option<u64>) -> String {
    row.map(|r| format!(" at row {}", r)).unwrap_or_default()
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_fatal() {
        assert!(MigrateError::Config("x".into()).is_fatal());
        assert!(MigrateError::UnknownColumn {
            column: "A".into(),
            source_name: "a.csv".into()
        }
        .is_fatal());
        assert!(MigrateError::DataCoercion {
            column: "start_date".into(),
            value: "soon".into(),
            message: "bad".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_write_errors_follow_policy() {
        let err = MigrateError::write("a.csv", Some(4), "deadlock");
        assert!(!err.is_fatal());
        assert_eq!(err.exit_code(), EXIT_TARGET_ERROR);
        assert_eq!(err.to_string(), "Write failed for a.csv at row 4: deadlock");
    }

    #[test]
    fn test_write_error_without_row() {
        let err = MigrateError::write("wells", None, "commit failed");
        assert_eq!(err.to_string(), "Write failed for wells: commit failed");
    }

    #[test]
    fn test_row_context_rewrites_write_errors_only() {
        let err = MigrateError::write("", None, "timeout").with_row_context("b.zip!x.csv", Some(9));
        match err {
            MigrateError::Write {
                source_name, row, ..
            } => {
                assert_eq!(source_name, "b.zip!x.csv");
                assert_eq!(row, Some(9));
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = MigrateError::Config("bad".into()).with_row_context("a.csv", Some(1));
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[test]
    fn test_row_shape_is_not_fatal() {
        let err = MigrateError::RowShape {
            source_name: "a.csv".into(),
            row: 2,
            expected: 3,
            found: 2,
        };
        assert_eq!(err.exit_code(), EXIT_DATA_ERROR);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_format_detailed_includes_cause() {
        let err = MigrateError::InvalidPattern {
            pattern: "(".into(),
            source: regex::Regex::new("(").unwrap_err(),
        };
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: Invalid pattern"));
        assert!(detailed.contains("Caused by"));
    }
}
