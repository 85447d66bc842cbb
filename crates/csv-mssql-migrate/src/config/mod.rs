//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Sections to run: all of them, or the named ones in configuration order.
    pub fn select_sections(&self, names: &[String]) -> Result<Vec<&SectionConfig>> {
        validation::validate_section_filter(self, names)?;
        Ok(self
            .migration
            .iter()
            .filter(|s| names.is_empty() || names.iter().any(|n| n.trim() == s.name))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
database:
  server: db.local
  port: "1433"
  database: WELLS
  username: loader
  password: secret
options:
  bulk: true
  bulk_limit: 500
  date_columns: [spud_date]
migration:
  wells:
    source: data/wells.csv,data/more.zip
    target: WELL
    columns:
      $UWI: UWI
      "$hash(UWI, NAME)": WELL_ID
      LEGACY: SOURCE_SYSTEM
      42: VERSION
      true: ACTIVE
  defaults:
    source: static
    target: SETTINGS
    columns:
      migrated: STATUS
"#;

    #[test]
    fn test_sections_keep_file_order() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let names: Vec<&str> = config.migration.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["wells", "defaults"]);
        assert!(config.migration[1].is_static());
    }

    #[test]
    fn test_columns_keep_order_and_types() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let wells = &config.migration[0];
        assert_eq!(
            wells.target_columns(),
            vec!["UWI", "WELL_ID", "SOURCE_SYSTEM", "VERSION", "ACTIVE"]
        );
        assert_eq!(wells.columns[3].source, serde_yaml::Value::from(42));
        assert_eq!(wells.columns[4].source, serde_yaml::Value::Bool(true));
    }

    #[test]
    fn test_string_port_and_options() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.database.port, 1433);
        assert!(config.options.bulk);
        assert_eq!(config.options.bulk_limit, 500);
        assert!(config.options.is_date_column("spud_date"));
        assert!(!config.options.is_date_column("update_date"));
    }

    #[test]
    fn test_select_sections_filters_by_name() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let selected = config.select_sections(&["defaults".to_string()]).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].target, "SETTINGS");

        let all = config.select_sections(&[]).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_select_unknown_section_fails() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert!(config.select_sections(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_unknown_section_key_rejected() {
        let yaml = r#"
database: { server: a, database: b, username: c }
migration:
  wells:
    source: a.csv
    target: WELL
    colums:
      $A: A
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }
}
