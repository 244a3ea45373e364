//! Configuration types for a script generation run.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScriptError};

/// Source database (MSSQL) connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Encrypt connection (default: "true").
    #[serde(default = "default_true_string")]
    pub encrypt: String,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

impl SourceConfig {
    /// Validate fields that cannot be checked by type alone.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ScriptError::Config("source host must not be empty".into()));
        }
        if self.database.is_empty() {
            return Err(ScriptError::Config(
                "source database must not be empty".into(),
            ));
        }
        if self.user.is_empty() {
            return Err(ScriptError::Config("source user must not be empty".into()));
        }
        match self.encrypt.as_str() {
            "true" | "false" | "dangerously_disabled" => Ok(()),
            other => Err(ScriptError::Config(format!(
                "encrypt must be true, false or dangerously_disabled, got \"{}\"",
                other
            ))),
        }
    }
}

/// Options controlling how the output script is produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptOptions {
    /// Name of the database the script will create and load.
    pub destination_database: String,

    /// Schemas whose tables are skipped entirely.
    #[serde(default)]
    pub exclude_schemas: BTreeSet<String>,

    /// Rewrite CamelCase identifiers to snake_case.
    #[serde(default)]
    pub underscore_identifiers: bool,

    /// Cap on rows emitted per table. None means all rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_limit: Option<u64>,
}

impl ScriptOptions {
    pub fn validate(&self) -> Result<()> {
        if self.destination_database.is_empty() {
            return Err(ScriptError::Config(
                "destination database must not be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            destination_database: String::new(),
            exclude_schemas: BTreeSet::new(),
            underscore_identifiers: false,
            row_limit: None,
        }
    }
}

// Default value functions for serde
fn default_mssql_port() -> u16 {
    1433
}

fn default_true_string() -> String {
    "true".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceConfig {
        SourceConfig {
            host: "db.example.com".into(),
            port: 1433,
            database: "Northwind".into(),
            user: "sa".into(),
            password: "secret".into(),
            encrypt: "true".into(),
            trust_server_cert: false,
        }
    }

    #[test]
    fn valid_source_passes() {
        assert!(source().validate().is_ok());
    }

    #[test]
    fn empty_host_rejected() {
        let mut cfg = source();
        cfg.host.clear();
        assert!(matches!(cfg.validate(), Err(ScriptError::Config(_))));
    }

    #[test]
    fn bad_encrypt_value_rejected() {
        let mut cfg = source();
        cfg.encrypt = "maybe".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_options_need_database_name() {
        assert!(ScriptOptions::default().validate().is_err());
    }
}
