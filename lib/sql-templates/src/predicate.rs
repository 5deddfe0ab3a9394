//! Optional SQL conditions evaluated per execution.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::QueryError;
use crate::safety::validate_predicate;
use crate::sql::extract_named_parameters;
use crate::value::Value;

/// Error raised by a fallible applicability rule.
pub type ConditionError = Box<dyn std::error::Error + Send + Sync>;

type Condition = Arc<dyn Fn() -> Result<bool, ConditionError> + Send + Sync>;

fn condition<F>(rule: F) -> Condition
where
    F: Fn() -> Result<bool, ConditionError> + Send + Sync + 'static,
{
    Arc::new(rule)
}

/// How a predicate joins the one appended before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connector {
    #[default]
    And,
    Or,
}

impl Connector {
    pub fn as_sql(self) -> &'static str {
        match self {
            Connector::And => "AND",
            Connector::Or => "OR",
        }
    }
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A parameterized SQL fragment, its value, and the rule deciding whether it
/// is included in an assembled statement.
///
/// Construction runs the predicate-safety policy; only [`Predicate::unchecked`]
/// skips it, and predicates built that way report
/// [`is_security_certified`](Predicate::is_security_certified) as `false`.
#[derive(Clone)]
pub struct Predicate {
    fragment: String,
    value: Value,
    connector: Connector,
    condition: Condition,
    certified: bool,
}

impl Predicate {
    fn build(
        fragment: impl Into<String>,
        value: Value,
        connector: Connector,
        condition: Condition,
    ) -> Result<Self, QueryError> {
        let fragment = fragment.into();
        validate_predicate(&fragment, &value)?;
        Ok(Self {
            fragment,
            value,
            connector,
            condition,
            certified: true,
        })
    }

    fn with_rule(
        fragment: impl Into<String>,
        value: Value,
        rule: fn(&Value) -> bool,
    ) -> Result<Self, QueryError> {
        let captured = value.clone();
        Self::build(
            fragment,
            value,
            Connector::And,
            condition(move || Ok(rule(&captured))),
        )
    }

    /// Applies when the value passes the default validity check.
    pub fn when(fragment: impl Into<String>, value: impl Into<Value>) -> Result<Self, QueryError> {
        Self::with_rule(fragment, value.into(), Value::is_valid)
    }

    /// Like [`when`](Self::when) with an explicit connector.
    pub fn when_with(
        fragment: impl Into<String>,
        value: impl Into<Value>,
        connector: Connector,
    ) -> Result<Self, QueryError> {
        Ok(Self::when(fragment, value)?.connector(connector))
    }

    pub fn when_not_null(
        fragment: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Self, QueryError> {
        Self::with_rule(fragment, value.into(), |v| !v.is_null())
    }

    pub fn when_not_empty(
        fragment: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Self, QueryError> {
        Self::with_rule(fragment, value.into(), Value::is_not_empty)
    }

    pub fn when_positive(
        fragment: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Self, QueryError> {
        Self::with_rule(fragment, value.into(), Value::is_positive_number)
    }

    pub fn when_like(
        fragment: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Self, QueryError> {
        Self::with_rule(fragment, value.into(), Value::is_valid_like_pattern)
    }

    pub fn when_true(fragment: impl Into<String>, value: Option<bool>) -> Result<Self, QueryError> {
        Self::with_rule(fragment, value.into(), |v| matches!(v, Value::Bool(true)))
    }

    pub fn when_false(fragment: impl Into<String>, value: Option<bool>) -> Result<Self, QueryError> {
        Self::with_rule(fragment, value.into(), |v| matches!(v, Value::Bool(false)))
    }

    /// A static condition that is always appended, e.g. `deleted_at IS NULL`.
    pub fn always(fragment: impl Into<String>) -> Result<Self, QueryError> {
        Self::build(fragment, Value::Null, Connector::And, condition(|| Ok(true)))
    }

    pub fn never(fragment: impl Into<String>) -> Result<Self, QueryError> {
        Self::build(fragment, Value::Null, Connector::And, condition(|| Ok(false)))
    }

    /// Applies when `condition` returns true.
    pub fn with_condition<F>(
        fragment: impl Into<String>,
        value: impl Into<Value>,
        condition: F,
    ) -> Result<Self, QueryError>
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self::build(
            fragment,
            value.into(),
            Connector::And,
            self::condition(move || Ok(condition())),
        )
    }

    /// Applies when `condition` returns `Ok(true)`; an `Err` means the
    /// predicate does not apply.
    pub fn try_condition<F>(
        fragment: impl Into<String>,
        value: impl Into<Value>,
        condition: F,
    ) -> Result<Self, QueryError>
    where
        F: Fn() -> Result<bool, ConditionError> + Send + Sync + 'static,
    {
        Self::build(fragment, value.into(), Connector::And, Arc::new(condition))
    }

    /// Builds a predicate without the safety policy.
    ///
    /// Only for trusted fragments that cannot be expressed with named
    /// parameters, such as team-authored `EXISTS (...)` subqueries. Never pass
    /// caller input here.
    pub fn unchecked(fragment: impl Into<String>, value: impl Into<Value>) -> Self {
        let fragment = fragment.into();
        let value = value.into();
        warn!(
            fragment = %fragment,
            "Building predicate without safety validation"
        );
        let captured = value.clone();
        Self {
            fragment,
            value,
            connector: Connector::And,
            condition: condition(move || Ok(captured.is_valid() || captured.is_null())),
            certified: false,
        }
    }

    /// Replace the connector used to join this predicate to the previous one.
    pub fn connector(mut self, connector: Connector) -> Self {
        self.connector = connector;
        self
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn get_connector(&self) -> Connector {
        self.connector
    }

    pub fn is_security_certified(&self) -> bool {
        self.certified
    }

    /// Evaluate the applicability rule. A failing rule means "does not apply".
    pub fn applies(&self) -> bool {
        match (self.condition)() {
            Ok(applies) => applies,
            Err(e) => {
                debug!(
                    fragment = %self.fragment,
                    error = %e,
                    "Predicate condition failed, treating as not applicable"
                );
                false
            }
        }
    }

    /// Parameters this predicate contributes when bound under `name`.
    pub fn bindings(&self, name: &str) -> Vec<(String, Value)> {
        match &self.value {
            Value::Null => Vec::new(),
            Value::Map(entries) => entries
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            other => vec![(name.to_string(), other.clone())],
        }
    }

    /// Parameters keyed by the fragment's own tokens, for combining.
    fn own_parameters(&self) -> BTreeMap<String, Value> {
        match &self.value {
            Value::Null => BTreeMap::new(),
            Value::Map(entries) => entries.clone(),
            other => {
                let names = extract_named_parameters(&self.fragment);
                if names.len() == 1 {
                    names.into_iter().map(|n| (n, other.clone())).collect()
                } else {
                    debug!(
                        fragment = %self.fragment,
                        "Cannot key a single value to a multi-parameter fragment; dropping it from the combination"
                    );
                    BTreeMap::new()
                }
            }
        }
    }

    fn combine(self, other: Predicate, connector: Connector) -> Predicate {
        let fragment = match connector {
            Connector::And => format!("{} AND {}", self.fragment, other.fragment),
            Connector::Or => format!("({} OR {})", self.fragment, other.fragment),
        };
        let mut parameters = self.own_parameters();
        parameters.extend(other.own_parameters());
        let value = if parameters.is_empty() {
            Value::Null
        } else {
            Value::Map(parameters)
        };

        let certified = self.certified && other.certified;
        let outer_connector = self.connector;
        let (left, right) = (self, other);
        let rule = match connector {
            Connector::And => condition(move || Ok(left.applies() && right.applies())),
            Connector::Or => condition(move || Ok(left.applies() || right.applies())),
        };

        Predicate {
            fragment,
            value,
            connector: outer_connector,
            condition: rule,
            certified,
        }
    }

    /// Both predicates, joined with AND; applies when both do.
    pub fn and(self, other: Predicate) -> Predicate {
        self.combine(other, Connector::And)
    }

    /// Either predicate, parenthesized; applies when either does.
    pub fn or(self, other: Predicate) -> Predicate {
        self.combine(other, Connector::Or)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("fragment", &self.fragment)
            .field("value", &self.value)
            .field("connector", &self.connector)
            .field("certified", &self.certified)
            .finish_non_exhaustive()
    }
}

/// Predicates keyed by parameter name, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Predicates {
    entries: Vec<(String, Predicate)>,
}

impl Predicates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; a replaced predicate keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, predicate: Predicate) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = predicate,
            None => self.entries.push((name, predicate)),
        }
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, predicate: Predicate) -> Self {
        self.insert(name, predicate);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Predicate> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Predicate)> {
        self.entries.iter().map(|(n, p)| (n.as_str(), p))
    }
}

impl<K: Into<String>> FromIterator<(K, Predicate)> for Predicates {
    fn from_iter<I: IntoIterator<Item = (K, Predicate)>>(iter: I) -> Self {
        let mut predicates = Predicates::new();
        for (name, predicate) in iter {
            predicates.insert(name, predicate);
        }
        predicates
    }
}
