//! SQL Templates - versioned query templates with safe dynamic predicates.
//!
//! Statements are authored once in YAML template documents, grouped by
//! namespace, and executed later with a varying set of optional conditions.
//! Conditions are never spliced in as text built from caller input: each one
//! is a parameterized fragment that passed a lexical safety check when it was
//! constructed.
//!
//! # Core Concepts
//!
//! - **Template**: a named statement (`namespace.id`) plus metadata such as
//!   whether it accepts predicates and what its rows map to.
//! - **Predicate**: an optional `:param` fragment, its value, and a rule
//!   deciding whether it is included in a given execution.
//! - **Assembly**: appending the applicable predicates to a template's SQL at
//!   its top-level `WHERE` (or adding one).
//!
//! # Components
//!
//! - [`TemplateStore`]: loads, validates and resolves templates
//! - [`Predicate`] / [`Predicates`]: the dynamic condition model
//! - [`assemble`]: builds the final statement and its parameter bindings
//! - [`StatementExecutor`]: boundary to the database
//! - [`DynamicQueries`] / [`DynamicRepository`]: run templates end to end

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::unwrap_in_result,
        clippy::panic
    )
)]

mod assembler;
mod config;
mod error;
mod executor;
mod predicate;
mod repository;
mod safety;
mod sql;
mod store;
mod template;
mod value;

pub use assembler::{AssembledStatement, ParameterBindingSet, assemble, complete_fixed_parameters};
pub use config::{LoggingConfig, StoreConfig, ValidationConfig};
pub use error::{InjectionCategory, QueryError};
pub use executor::{PreparedStatement, ResultDescriptor, Row, StatementExecutor};
pub use predicate::{ConditionError, Connector, Predicate, Predicates};
pub use repository::{DynamicQueries, DynamicRepository};
pub use safety::{detect_injection, validate_predicate, validate_template_syntax};
pub use sql::{
    SqlVerb, WhereClause, balanced_parens, classify_verb, clean, count_parameters,
    extract_named_parameters, extract_table_name, is_read_only, locate_top_level_where,
    requires_result_descriptor,
};
pub use store::{ResolvedTemplate, StoreStats, TemplateStore, ValidationReport, short_key};
pub use template::{ParameterDecl, QueryDefinition, QueryTemplate, TemplateDocument};
pub use value::{Value, is_valid_string};
