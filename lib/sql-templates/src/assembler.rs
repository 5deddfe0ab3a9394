//! Merges a base statement with the predicates that currently apply.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::error::QueryError;
use crate::predicate::Predicates;
use crate::sql::locate_top_level_where;
use crate::template::QueryTemplate;
use crate::value::Value;

/// Named parameter values for one assembled statement.
pub type ParameterBindingSet = BTreeMap<String, Value>;

/// Final SQL plus the parameters to bind on it.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledStatement {
    pub sql: String,
    pub parameters: ParameterBindingSet,
}

impl AssembledStatement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: ParameterBindingSet::new(),
        }
    }
}

/// Append every applicable predicate to `base`.
///
/// Applicability is evaluated exactly once per predicate. When nothing
/// applies the base SQL is returned unchanged.
pub fn assemble(base: &str, predicates: &Predicates) -> AssembledStatement {
    if predicates.is_empty() {
        return AssembledStatement::new(base);
    }

    let applicable: Vec<_> = predicates
        .iter()
        .filter(|(name, predicate)| {
            let applies = predicate.applies();
            trace!(predicate = %name, applies, "Evaluated predicate");
            applies
        })
        .collect();

    if applicable.is_empty() {
        debug!(total = predicates.len(), "No predicates apply, using base statement");
        return AssembledStatement::new(base);
    }

    let clause = locate_top_level_where(base);
    let mut sql = String::with_capacity(base.len() + 32 * applicable.len());
    sql.push_str(base);
    sql.push_str(clause.prefix);

    let mut parameters = ParameterBindingSet::new();
    for (index, (name, predicate)) in applicable.iter().enumerate() {
        if index > 0 {
            sql.push(' ');
            sql.push_str(predicate.get_connector().as_sql());
            sql.push(' ');
        }
        sql.push_str(predicate.fragment());
        parameters.extend(predicate.bindings(name));
    }

    debug!(
        applied = applicable.len(),
        total = predicates.len(),
        parameters = parameters.len(),
        "Assembled dynamic statement"
    );

    AssembledStatement { sql, parameters }
}

/// Binding set for a fixed-parameter call. Declared optional parameters the
/// caller left out are bound to null; a missing required one is an error.
pub fn complete_fixed_parameters(
    template: &QueryTemplate,
    provided: &ParameterBindingSet,
) -> Result<ParameterBindingSet, QueryError> {
    let mut complete = provided.clone();

    for declared in &template.parameters {
        if complete.contains_key(&declared.name) {
            continue;
        }
        if declared.required {
            return Err(QueryError::UsageMisuse(format!(
                "Required parameter '{}' missing for query '{}'",
                declared.name,
                template.full_key()
            )));
        }
        complete.insert(declared.name.clone(), Value::Null);
    }

    Ok(complete)
}
