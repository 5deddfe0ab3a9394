//! Query orchestration: resolve a template, assemble it, bind, execute.
//!
//! - `DynamicQueries<E>`: runs named templates and ad-hoc statements against
//!   a [`StatementExecutor`]
//! - `DynamicRepository<T, Id, E>`: typed facade over `DynamicQueries` for one
//!   entity type

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::assembler::{AssembledStatement, ParameterBindingSet, assemble, complete_fixed_parameters};
use crate::config::LoggingConfig;
use crate::error::QueryError;
use crate::executor::{PreparedStatement, ResultDescriptor, Row, StatementExecutor};
use crate::predicate::Predicates;
use crate::sql::{SqlVerb, classify_verb, clean, extract_table_name};
use crate::store::{ResolvedTemplate, TemplateStore};

/// Which execution path a call takes; the verb of the statement must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Path {
    Rows,
    Update,
}

impl Path {
    fn check(self, key: &str, verb: SqlVerb) -> Result<(), QueryError> {
        match self {
            Path::Rows if !verb.requires_result_descriptor() => Err(QueryError::UsageMisuse(
                format!(
                    "Query '{}' is a {} statement; use the update path instead",
                    key, verb
                ),
            )),
            Path::Update if verb.requires_result_descriptor() => Err(QueryError::UsageMisuse(
                format!(
                    "Query '{}' is a {} statement; use a fetch path instead",
                    key, verb
                ),
            )),
            _ => Ok(()),
        }
    }
}

/// Runs templates from a loaded [`TemplateStore`] against an executor.
pub struct DynamicQueries<E: StatementExecutor> {
    store: Arc<TemplateStore>,
    executor: E,
    logging: LoggingConfig,
}

impl<E: StatementExecutor> DynamicQueries<E> {
    /// Logging behaviour is taken from the store's configuration.
    pub fn new(store: Arc<TemplateStore>, executor: E) -> Self {
        let logging = store.config().logging.clone();
        Self {
            store,
            executor,
            logging,
        }
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Run a dynamic SELECT template with optional predicates.
    pub async fn fetch_named<T: DeserializeOwned>(
        &self,
        name: &str,
        predicates: &Predicates,
    ) -> Result<Vec<T>, QueryError> {
        map_rows(self.fetch_raw(name, predicates).await?)
    }

    /// Rows of a SELECT template as JSON objects, without mapping.
    pub async fn fetch_raw(
        &self,
        name: &str,
        predicates: &Predicates,
    ) -> Result<Vec<Row>, QueryError> {
        let resolved = self.store.resolve(name)?;
        let statement = prepare_dynamic(&resolved, predicates, Path::Rows)?;
        self.run_rows(
            &resolved.key,
            statement,
            ResultDescriptor::from_template(&resolved.template),
        )
        .await
    }

    /// Run a SELECT template with fixed parameters. Declared optional
    /// parameters left out of `parameters` are bound to null.
    pub async fn fetch_named_with_params<T: DeserializeOwned>(
        &self,
        name: &str,
        parameters: &ParameterBindingSet,
    ) -> Result<Vec<T>, QueryError> {
        let resolved = self.store.resolve(name)?;
        let statement = prepare_fixed(&resolved, parameters, Path::Rows)?;
        let rows = self
            .run_rows(
                &resolved.key,
                statement,
                ResultDescriptor::from_template(&resolved.template),
            )
            .await?;
        map_rows(rows)
    }

    /// Run caller-supplied SQL with optional predicates appended.
    pub async fn fetch_dynamic<T: DeserializeOwned>(
        &self,
        base_sql: &str,
        predicates: &Predicates,
        descriptor: ResultDescriptor,
    ) -> Result<Vec<T>, QueryError> {
        Path::Rows.check("<dynamic>", classify_verb(&clean(base_sql)))?;
        let statement = assemble(base_sql, predicates);
        map_rows(self.run_rows("<dynamic>", statement, descriptor).await?)
    }

    /// First row of a SELECT template, if any. More than one row is logged.
    pub async fn fetch_single<T: DeserializeOwned>(
        &self,
        name: &str,
        predicates: &Predicates,
    ) -> Result<Option<T>, QueryError> {
        let rows = self.fetch_raw(name, predicates).await?;
        first_row(name, rows)
    }

    /// First row of a SELECT template run with fixed parameters.
    pub async fn fetch_single_with_params<T: DeserializeOwned>(
        &self,
        name: &str,
        parameters: &ParameterBindingSet,
    ) -> Result<Option<T>, QueryError> {
        let resolved = self.store.resolve(name)?;
        let statement = prepare_fixed(&resolved, parameters, Path::Rows)?;
        let rows = self
            .run_rows(
                &resolved.key,
                statement,
                ResultDescriptor::from_template(&resolved.template),
            )
            .await?;
        first_row(name, rows)
    }

    /// Run a mutating template with fixed parameters.
    pub async fn execute_update_with_params(
        &self,
        name: &str,
        parameters: &ParameterBindingSet,
    ) -> Result<u64, QueryError> {
        let resolved = self.store.resolve(name)?;
        let statement = prepare_fixed(&resolved, parameters, Path::Update)?;
        self.run_update(&resolved.key, statement).await
    }

    /// Run a mutating template with optional predicates appended.
    pub async fn execute_update_with_predicates(
        &self,
        name: &str,
        predicates: &Predicates,
    ) -> Result<u64, QueryError> {
        let resolved = self.store.resolve(name)?;
        let statement = prepare_dynamic(&resolved, predicates, Path::Update)?;
        self.run_update(&resolved.key, statement).await
    }

    async fn run_rows(
        &self,
        key: &str,
        statement: AssembledStatement,
        descriptor: ResultDescriptor,
    ) -> Result<Vec<Row>, QueryError> {
        let started = Instant::now();
        let prepared = self.prepare_and_bind(key, statement, descriptor).await?;
        let rows = prepared.fetch_rows().await?;
        self.log_elapsed(key, started, rows.len() as u64, "rows");
        Ok(rows)
    }

    async fn run_update(&self, key: &str, statement: AssembledStatement) -> Result<u64, QueryError> {
        let table = extract_table_name(&statement.sql);
        let started = Instant::now();
        let prepared = self
            .prepare_and_bind(key, statement, ResultDescriptor::none())
            .await?;
        let affected = prepared.execute_update().await?;
        info!(query = %key, table = %table, affected, "Update executed");
        self.log_elapsed(key, started, affected, "affected");
        Ok(affected)
    }

    async fn prepare_and_bind(
        &self,
        key: &str,
        statement: AssembledStatement,
        descriptor: ResultDescriptor,
    ) -> Result<E::Statement, QueryError> {
        if self.logging.enabled && self.logging.log_generated_sql {
            info!(query = %key, sql = %statement.sql, "Generated SQL");
        }
        if self.logging.enabled && self.logging.log_parameters {
            info!(query = %key, parameters = ?statement.parameters, "Query parameters");
        }

        let mut prepared = self.executor.prepare(&statement.sql, descriptor).await?;
        for (name, value) in statement.parameters {
            match prepared.bind(&name, value) {
                Ok(()) => {}
                Err(QueryError::UnknownParameter(_)) => {
                    debug!(query = %key, parameter = %name, "Parameter not present in statement, skipped");
                }
                Err(e) => {
                    warn!(query = %key, parameter = %name, error = %e, "Failed to bind parameter, skipped");
                }
            }
        }
        Ok(prepared)
    }

    fn log_elapsed(&self, key: &str, started: Instant, count: u64, unit: &'static str) {
        if !self.logging.log_execution_time {
            return;
        }
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if self.logging.enabled {
            info!(query = %key, elapsed_ms, count, unit, "Query executed");
        } else {
            debug!(query = %key, elapsed_ms, count, unit, "Query executed");
        }
    }
}

/// Static/dynamic compatibility is checked before anything is assembled.
fn prepare_dynamic(
    resolved: &ResolvedTemplate,
    predicates: &Predicates,
    path: Path,
) -> Result<AssembledStatement, QueryError> {
    if !resolved.template.dynamic && !predicates.is_empty() {
        return Err(QueryError::UsageMisuse(format!(
            "Query '{}' is not dynamic and does not accept predicates; use the fixed-parameter path",
            resolved.key
        )));
    }
    path.check(&resolved.key, resolved.template.verb())?;
    Ok(assemble(&resolved.sql, predicates))
}

fn prepare_fixed(
    resolved: &ResolvedTemplate,
    parameters: &ParameterBindingSet,
    path: Path,
) -> Result<AssembledStatement, QueryError> {
    path.check(&resolved.key, resolved.template.verb())?;
    Ok(AssembledStatement {
        sql: resolved.sql.to_string(),
        parameters: complete_fixed_parameters(&resolved.template, parameters)?,
    })
}

fn map_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, QueryError> {
    rows.into_iter()
        .map(|row| Ok(serde_json::from_value(serde_json::Value::Object(row))?))
        .collect()
}

fn first_row<T: DeserializeOwned>(name: &str, rows: Vec<Row>) -> Result<Option<T>, QueryError> {
    if rows.len() > 1 {
        warn!(query = %name, rows = rows.len(), "Single-result query returned multiple rows, using the first");
    }
    match rows.into_iter().next() {
        Some(row) => Ok(Some(serde_json::from_value(serde_json::Value::Object(row))?)),
        None => Ok(None),
    }
}

/// Typed access to templated queries for one entity type.
///
/// `Id` is the entity's identifier type; it only documents the repository's
/// shape and is not used for dispatch.
pub struct DynamicRepository<T, Id, E: StatementExecutor> {
    queries: Arc<DynamicQueries<E>>,
    _marker: PhantomData<fn() -> (T, Id)>,
}

impl<T, Id, E> DynamicRepository<T, Id, E>
where
    T: DeserializeOwned,
    E: StatementExecutor,
{
    pub fn new(queries: Arc<DynamicQueries<E>>) -> Self {
        Self {
            queries,
            _marker: PhantomData,
        }
    }

    pub fn queries(&self) -> &DynamicQueries<E> {
        &self.queries
    }

    /// Result descriptor used for ad-hoc statements: the entity's type name.
    fn entity_descriptor() -> ResultDescriptor {
        let full = std::any::type_name::<T>();
        ResultDescriptor::of_type(full.rsplit("::").next().unwrap_or(full))
    }

    pub async fn execute_named_query(
        &self,
        name: &str,
        predicates: &Predicates,
    ) -> Result<Vec<T>, QueryError> {
        self.queries.fetch_named(name, predicates).await
    }

    pub async fn execute_named_query_with_params(
        &self,
        name: &str,
        parameters: &ParameterBindingSet,
    ) -> Result<Vec<T>, QueryError> {
        self.queries.fetch_named_with_params(name, parameters).await
    }

    pub async fn execute_dynamic_query(
        &self,
        base_sql: &str,
        predicates: &Predicates,
    ) -> Result<Vec<T>, QueryError> {
        self.queries
            .fetch_dynamic(base_sql, predicates, Self::entity_descriptor())
            .await
    }

    pub async fn execute_raw_query(
        &self,
        name: &str,
        predicates: &Predicates,
    ) -> Result<Vec<Row>, QueryError> {
        self.queries.fetch_raw(name, predicates).await
    }

    /// First row mapped to `R`, which need not be the entity type.
    pub async fn execute_single_result<R: DeserializeOwned>(
        &self,
        name: &str,
        predicates: &Predicates,
    ) -> Result<Option<R>, QueryError> {
        self.queries.fetch_single(name, predicates).await
    }

    pub async fn execute_single_result_with_params(
        &self,
        name: &str,
        parameters: &ParameterBindingSet,
    ) -> Result<Option<T>, QueryError> {
        self.queries.fetch_single_with_params(name, parameters).await
    }

    pub async fn execute_update(
        &self,
        name: &str,
        parameters: &ParameterBindingSet,
    ) -> Result<u64, QueryError> {
        self.queries.execute_update_with_params(name, parameters).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Predicate;
    use crate::template::QueryTemplate;

    fn resolved(template: QueryTemplate) -> ResolvedTemplate {
        ResolvedTemplate {
            key: template.full_key(),
            sql: Arc::from(template.sql.as_str()),
            template: Arc::new(template),
        }
    }

    fn filters() -> Predicates {
        Predicates::new().with("id", Predicate::when("u.id = :id", 7i64).unwrap())
    }

    #[test]
    fn static_template_rejects_predicates_before_assembly() {
        let mut template = QueryTemplate::new("Users", "all", "SELECT * FROM users");
        template.dynamic = false;
        let err = prepare_dynamic(&resolved(template.clone()), &filters(), Path::Rows).unwrap_err();
        assert!(matches!(err, QueryError::UsageMisuse(ref m) if m.contains("not dynamic")));

        let statement = prepare_dynamic(&resolved(template), &Predicates::new(), Path::Rows).unwrap();
        assert_eq!(statement.sql, "SELECT * FROM users");
    }

    #[test]
    fn verb_must_match_path() {
        let update = resolved(QueryTemplate::new("Users", "touch", "UPDATE users SET seen = now()"));
        assert!(matches!(
            prepare_dynamic(&update, &Predicates::new(), Path::Rows),
            Err(QueryError::UsageMisuse(_))
        ));
        assert!(prepare_dynamic(&update, &filters(), Path::Update).is_ok());

        let select = resolved(QueryTemplate::new("Users", "all", "SELECT * FROM users"));
        assert!(matches!(
            prepare_fixed(&select, &ParameterBindingSet::new(), Path::Update),
            Err(QueryError::UsageMisuse(_))
        ));
    }

    #[test]
    fn single_row_mapping() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Named {
            name: String,
        }
        let row = |name: &str| {
            let mut row = Row::new();
            row.insert("name".into(), serde_json::json!(name));
            row
        };

        let first: Option<Named> = first_row("q", vec![row("a"), row("b")]).unwrap();
        assert_eq!(first, Some(Named { name: "a".into() }));
        let none: Option<Named> = first_row("q", Vec::new()).unwrap();
        assert!(none.is_none());

        let err = map_rows::<Named>(vec![Row::new()]).unwrap_err();
        assert!(matches!(err, QueryError::Mapping(_)));
    }
}
