//! PostgreSQL statement executor for sql-templates.
//!
//! [`PgPool`] implements [`StatementExecutor`](sql_templates::StatementExecutor):
//! statements are rewritten from `:name` placeholders to PostgreSQL's `$n`
//! form, binds are collected by name, and result rows come back as JSON
//! objects ready for serde mapping.
//!
//! # Usage
//!
//! ```text
//! use std::sync::Arc;
//! use sql_templates::{DynamicQueries, Predicate, Predicates, StoreConfig, TemplateStore};
//! use sql_templates_postgres::PgPool;
//!
//! let mut store = TemplateStore::new(StoreConfig::default());
//! store.load()?;
//! let pool = PgPool::connect("postgres://localhost/app").await?;
//! let queries = DynamicQueries::new(Arc::new(store), pool);
//!
//! let filters = Predicates::new().with("status", Predicate::when("o.status = :status", status)?);
//! let orders: Vec<Order> = queries.fetch_named("OrderMapper.findOrders", &filters).await?;
//! ```

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod executor;
mod placeholders;
mod rows;

pub use executor::{PgPool, PgStatement};
pub use placeholders::{PositionalSql, to_positional};
pub use rows::row_to_json;

// Re-export core types for convenience
pub use sql_templates::{
    DynamicQueries, DynamicRepository, Predicate, Predicates, QueryError, StoreConfig,
    TemplateStore, Value,
};
