//! Configuration validation.

use super::{Config, SectionConfig};
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.database.server.trim().is_empty() {
        return Err(MigrateError::Config("database.server is required".into()));
    }
    if config.database.database.trim().is_empty() {
        return Err(MigrateError::Config("database.database is required".into()));
    }
    if config.database.username.trim().is_empty() {
        return Err(MigrateError::Config("database.username is required".into()));
    }

    if config.migration.is_empty() {
        return Err(MigrateError::Config(
            "migration must define at least one section".into(),
        ));
    }
    for section in &config.migration {
        validate_section(section)?;
    }

    if config.options.bulk_limit == 0 {
        return Err(MigrateError::Config(
            "options.bulk_limit must be at least 1".into(),
        ));
    }

    Ok(())
}

fn validate_section(section: &SectionConfig) -> Result<()> {
    if section.source.trim().is_empty() {
        return Err(MigrateError::Config(format!(
            "{:?}: source field is empty",
            section.name
        )));
    }
    if section.target.trim().is_empty() {
        return Err(MigrateError::Config(format!(
            "{:?}: target field is empty",
            section.name
        )));
    }
    if section.columns.is_empty() {
        return Err(MigrateError::Config(format!(
            "{:?}: columns field is empty",
            section.name
        )));
    }
    if let Some(column) = section.columns.iter().find(|c| c.target.trim().is_empty()) {
        return Err(MigrateError::Config(format!(
            "{:?}: empty target column for {:?}",
            section.name, column.source
        )));
    }
    Ok(())
}

/// Check that every requested section exists.
pub fn validate_section_filter(config: &Config, names: &[String]) -> Result<()> {
    for name in names {
        let name = name.trim();
        if !config.migration.iter().any(|s| s.name == name) {
            return Err(MigrateError::Config(format!(
                "section {:?} is not defined in the configuration",
                name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnEntry, DatabaseConfig, SinkOptions};

    fn valid_config() -> Config {
        Config {
            database: DatabaseConfig {
                server: "localhost".to_string(),
                port: 1433,
                database: "target_db".to_string(),
                username: "sa".to_string(),
                password: "password".to_string(),
                encrypt: false,
                trust_server_cert: true,
                connection_timeout: 300,
            },
            options: SinkOptions::default(),
            migration: vec![SectionConfig {
                name: "wells".to_string(),
                source: "wells.csv".to_string(),
                target: "WELL".to_string(),
                columns: vec![ColumnEntry {
                    source: serde_yaml::Value::from("$UWI"),
                    target: "UWI".to_string(),
                }],
            }],
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_server() {
        let mut config = valid_config();
        config.database.server = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_section_source() {
        let mut config = valid_config();
        config.migration[0].source = " ".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("source field is empty"));
    }

    #[test]
    fn test_missing_section_target() {
        let mut config = valid_config();
        config.migration[0].target = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_columns() {
        let mut config = valid_config();
        config.migration[0].columns.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_bulk_limit() {
        let mut config = valid_config();
        config.options.bulk_limit = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_database_config_debug_redacts_password() {
        let mut config = valid_config();
        config.database.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.database);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }
}
