//! Boundary to the database that actually runs statements.

use async_trait::async_trait;

use crate::error::QueryError;
use crate::template::QueryTemplate;
use crate::value::Value;

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// What a row-returning statement maps its rows to. Purely descriptive for
/// executors; rows are always returned as [`Row`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultDescriptor {
    pub result_type: Option<String>,
    pub result_mapping: Option<String>,
}

impl ResultDescriptor {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn of_type(result_type: impl Into<String>) -> Self {
        Self {
            result_type: Some(result_type.into()),
            result_mapping: None,
        }
    }

    pub fn from_template(template: &QueryTemplate) -> Self {
        Self {
            result_type: template.effective_result_type().map(str::to_string),
            result_mapping: template.result_mapping.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.result_type.is_none() && self.result_mapping.is_none()
    }
}

/// Prepares statements for execution.
///
/// Implemented by database-specific pool types (e.g. the PostgreSQL pool in
/// `sql-templates-postgres`).
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    type Statement: PreparedStatement;

    /// Prepare `sql`, which may contain `:name` placeholders.
    async fn prepare(
        &self,
        sql: &str,
        descriptor: ResultDescriptor,
    ) -> Result<Self::Statement, QueryError>;
}

/// A prepared statement awaiting binds.
#[async_trait]
pub trait PreparedStatement: Send {
    /// Bind `value` to the `:name` placeholder.
    ///
    /// Returns [`QueryError::UnknownParameter`] when the statement has no such
    /// placeholder; callers log and skip that case.
    fn bind(&mut self, name: &str, value: Value) -> Result<(), QueryError>;

    /// Run a row-returning statement.
    async fn fetch_rows(self) -> Result<Vec<Row>, QueryError>;

    /// Run a mutating statement and return the number of affected rows.
    async fn execute_update(self) -> Result<u64, QueryError>;
}
