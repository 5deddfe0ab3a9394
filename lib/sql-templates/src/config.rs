//! Template store configuration.
//!
//! Every field has a default, so an empty YAML/JSON object (or
//! `StoreConfig::default()`) is a working configuration.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::QueryError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Load every source eagerly in [`TemplateStore::load`](crate::TemplateStore::load).
    /// When false, lookups read the single relevant document on demand.
    pub preload: bool,
    /// Glob patterns of template documents.
    pub sources: Vec<String>,
    /// Directory searched by the lazy path for `<Namespace>.<extension>`.
    pub base_path: PathBuf,
    pub extension: String,
    pub validation: ValidationConfig,
    pub logging: LoggingConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            preload: true,
            sources: vec!["sql/*.yml".to_string(), "sql/*.yaml".to_string()],
            base_path: PathBuf::from("sql"),
            extension: "yml".to_string(),
            validation: ValidationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn from_yaml(text: &str) -> Result<Self, QueryError> {
        serde_yaml::from_str(text).map_err(|e| QueryError::Parse {
            source_name: "store configuration".to_string(),
            message: e.to_string(),
        })
    }

    /// Default configuration reading only `sources`.
    pub fn with_sources<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub validate_at_startup: bool,
    /// Abort loading on the first failure instead of logging it.
    pub strict: bool,
    pub validate_sql_syntax: bool,
    pub validate_required_parameters: bool,
    pub validate_result_descriptor: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            validate_at_startup: true,
            strict: false,
            validate_sql_syntax: true,
            validate_required_parameters: true,
            validate_result_descriptor: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub log_parameters: bool,
    pub log_execution_time: bool,
    pub log_generated_sql: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_parameters: false,
            log_execution_time: true,
            log_generated_sql: false,
        }
    }
}
