use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Known keys listed in a not-found message before the list is truncated.
const MAX_LISTED_KEYS: usize = 50;

/// Which injection pattern a rejected predicate fragment matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionCategory {
    /// `' OR '1'='1` and friends
    Tautology,
    /// `; DROP ...`, `; DELETE ...`
    StackedStatement,
    /// `--` or `/* ... */`
    Comment,
    /// `UNION SELECT`
    Union,
    /// `EXEC sp_x` / `EXECUTE(...)`
    Exec,
}

impl fmt::Display for InjectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InjectionCategory::Tautology => "quoted OR/AND tautology",
            InjectionCategory::StackedStatement => "stacked mutating statement",
            InjectionCategory::Comment => "inline comment marker",
            InjectionCategory::Union => "UNION SELECT",
            InjectionCategory::Exec => "EXEC/EXECUTE invocation",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Query not found: {name}. Available queries: {}", list_keys(available))]
    NotFound { name: String, available: Vec<String> },

    #[error("Invalid template '{key}': {reason}")]
    InvalidTemplate { key: String, reason: String },

    #[error("Invalid predicate: {reason}. Fragment: '{fragment}'")]
    InvalidPredicate { reason: String, fragment: String },

    #[error("Predicate fragment matches injection pattern ({category}). Fragment: '{fragment}'")]
    InjectionPattern {
        category: InjectionCategory,
        fragment: String,
    },

    #[error("Usage error: {0}")]
    UsageMisuse(String),

    #[error("Startup validation failed in strict mode: {}", failures.join("; "))]
    StrictValidation { failures: Vec<String> },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse template document {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    #[error("Invalid template source pattern: {0}")]
    Pattern(String),

    #[error("Parameter '{0}' not present in statement")]
    UnknownParameter(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Row mapping error: {0}")]
    Mapping(#[from] serde_json::Error),
}

impl QueryError {
    /// True for the predicate-safety family (empty fragment, missing
    /// parameter token, injection pattern, hardcoded literal).
    pub fn is_invalid_predicate(&self) -> bool {
        matches!(
            self,
            QueryError::InvalidPredicate { .. } | QueryError::InjectionPattern { .. }
        )
    }

    pub(crate) fn invalid_template(key: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryError::InvalidTemplate {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_predicate(reason: impl Into<String>, fragment: &str) -> Self {
        QueryError::InvalidPredicate {
            reason: reason.into(),
            fragment: fragment.to_string(),
        }
    }
}

fn list_keys(keys: &[String]) -> String {
    if keys.is_empty() {
        return "(none)".to_string();
    }
    let mut listed = keys
        .iter()
        .take(MAX_LISTED_KEYS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if keys.len() > MAX_LISTED_KEYS {
        listed.push_str(&format!(" ... ({} more)", keys.len() - MAX_LISTED_KEYS));
    }
    listed
}
