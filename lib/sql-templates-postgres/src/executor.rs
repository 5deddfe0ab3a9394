//! PostgreSQL implementation of StatementExecutor.

const DEFAULT_MAX_CONNECTIONS: u32 = 16;

use std::collections::BTreeSet;
use std::ops::Deref;

use async_trait::async_trait;
use sql_templates::{PreparedStatement, QueryError, ResultDescriptor, Row, StatementExecutor, Value};
use sqlx::Arguments;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use tracing::{debug, trace};

use crate::placeholders::{PositionalSql, to_positional, to_positional_with_nulls};
use crate::rows::row_to_json;

fn execution_error(e: impl std::fmt::Display) -> QueryError {
    QueryError::Execution(e.to_string())
}

/// Wrapper around sqlx::PgPool that implements StatementExecutor.
#[derive(Clone, Debug)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    /// Create a new PgPool from an sqlx PgPool.
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self(pool)
    }

    /// Connect to a PostgreSQL database.
    pub async fn connect(url: &str) -> Result<Self, QueryError> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(url)
            .await
            .map_err(execution_error)?;
        Ok(Self(pool))
    }

    /// Get the inner sqlx::PgPool.
    pub fn inner(&self) -> &sqlx::PgPool {
        &self.0
    }
}

impl Deref for PgPool {
    type Target = sqlx::PgPool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Bind a Value to PgArguments.
fn bind_value(args: &mut PgArguments, value: &Value) -> Result<(), QueryError> {
    match value {
        Value::String(s) => args.add(s.as_str()),
        Value::Int(n) => args.add(*n),
        // PostgreSQL doesn't have unsigned, use i64
        Value::UInt(n) => args.add(i64::try_from(*n).map_err(execution_error)?),
        Value::Float(n) => args.add(*n),
        Value::Bool(b) => args.add(*b),
        Value::Strings(v) => args.add(v.as_slice()),
        Value::Ints(v) => args.add(v.as_slice()),
        Value::Datetime(dt) => args.add(*dt),
        // Bound as JSONB
        Value::Map(_) => args.add(value.to_json()),
        // Statements render nulls inline; only reached for a direct call.
        Value::Null => args.add(None::<String>),
    }
    .map_err(execution_error)
}

/// A statement rewritten to positional placeholders, collecting binds until
/// it is executed.
#[derive(Debug)]
pub struct PgStatement {
    pool: sqlx::PgPool,
    source: String,
    positional: PositionalSql,
    values: Vec<Option<Value>>,
}

impl PgStatement {
    fn new(pool: sqlx::PgPool, sql: &str) -> Self {
        let positional = to_positional(sql);
        let values = vec![None; positional.names.len()];
        Self {
            pool,
            source: sql.to_string(),
            positional,
            values,
        }
    }

    pub fn sql(&self) -> &str {
        &self.positional.sql
    }

    /// Final SQL and arguments. Null and unbound parameters become `NULL`
    /// literals; the rest are bound in their renumbered order.
    fn render(&self) -> Result<(String, PgArguments), QueryError> {
        let mut nulls = BTreeSet::new();
        for (name, value) in self.positional.names.iter().zip(&self.values) {
            match value {
                None => {
                    debug!(parameter = %name, "No value bound, using NULL");
                    nulls.insert(name.clone());
                }
                Some(Value::Null) => {
                    nulls.insert(name.clone());
                }
                Some(_) => {}
            }
        }

        if nulls.is_empty() {
            let mut args = PgArguments::default();
            for value in self.values.iter().flatten() {
                bind_value(&mut args, value)?;
            }
            return Ok((self.positional.sql.clone(), args));
        }

        let rendered = to_positional_with_nulls(&self.source, &nulls);
        let mut args = PgArguments::default();
        for name in &rendered.names {
            let value = self
                .positional
                .position(name)
                .and_then(|index| self.values[index].as_ref())
                .ok_or_else(|| QueryError::UnknownParameter(name.clone()))?;
            bind_value(&mut args, value)?;
        }
        Ok((rendered.sql, args))
    }
}

#[async_trait]
impl PreparedStatement for PgStatement {
    fn bind(&mut self, name: &str, value: Value) -> Result<(), QueryError> {
        let index = self
            .positional
            .position(name)
            .ok_or_else(|| QueryError::UnknownParameter(name.to_string()))?;
        self.values[index] = Some(value);
        Ok(())
    }

    async fn fetch_rows(self) -> Result<Vec<Row>, QueryError> {
        let (sql, args) = self.render()?;
        let rows = sqlx::query_with(&sql, args)
            .fetch_all(&self.pool)
            .await
            .map_err(execution_error)?;
        rows.iter().map(row_to_json).collect()
    }

    async fn execute_update(self) -> Result<u64, QueryError> {
        let (sql, args) = self.render()?;
        let result = sqlx::query_with(&sql, args)
            .execute(&self.pool)
            .await
            .map_err(execution_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl StatementExecutor for PgPool {
    type Statement = PgStatement;

    async fn prepare(
        &self,
        sql: &str,
        descriptor: ResultDescriptor,
    ) -> Result<Self::Statement, QueryError> {
        let statement = PgStatement::new(self.0.clone(), sql);
        trace!(
            sql = %statement.sql(),
            parameters = statement.positional.names.len(),
            result_type = ?descriptor.result_type,
            "Prepared statement"
        );
        Ok(statement)
    }
}
