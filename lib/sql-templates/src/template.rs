//! Query template definitions and the document schema they are loaded from.
//!
//! A template document looks like:
//!
//! ```yaml
//! namespace: UserMapper
//! queries:
//!   - id: findActiveUsers
//!     resultType: User
//!     sql: |
//!       SELECT * FROM users WHERE active = true
//!     parameters:
//!       - name: tenant
//!         required: true
//! ```

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::QueryError;
use crate::sql::{SqlVerb, classify_verb, clean, extract_named_parameters};

/// A template document as written on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateDocument {
    pub namespace: Option<String>,
    pub description: Option<String>,
    pub queries: Vec<QueryDefinition>,
}

/// One query entry of a document, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryDefinition {
    pub id: Option<String>,
    pub description: Option<String>,
    pub sql: Option<String>,
    pub dynamic: bool,
    pub result_type: Option<String>,
    /// Legacy alias of `resultType`; `resultType` wins when both are set.
    pub result_class: Option<String>,
    pub result_mapping: Option<String>,
    /// Informational only.
    pub cacheable: bool,
    pub parameters: Vec<ParameterDecl>,
}

impl Default for QueryDefinition {
    fn default() -> Self {
        Self {
            id: None,
            description: None,
            sql: None,
            dynamic: true,
            result_type: None,
            result_class: None,
            result_mapping: None,
            cacheable: true,
            parameters: Vec::new(),
        }
    }
}

/// A declared parameter of a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterDecl {
    pub name: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub description: Option<String>,
}

impl TemplateDocument {
    pub fn from_yaml(source_name: &str, text: &str) -> Result<Self, QueryError> {
        serde_yaml::from_str(text).map_err(|e| QueryError::Parse {
            source_name: source_name.to_string(),
            message: e.to_string(),
        })
    }

    pub fn has_namespace(&self) -> bool {
        self.namespace
            .as_deref()
            .is_some_and(|ns| !ns.trim().is_empty())
    }

    /// Validated templates of this document under `namespace`. Entries
    /// without an id or SQL text are skipped with a warning.
    pub fn into_templates(self, namespace: &str, source_name: &str) -> Vec<QueryTemplate> {
        self.queries
            .into_iter()
            .filter_map(|definition| QueryTemplate::from_definition(namespace, definition, source_name))
            .collect()
    }
}

/// A validated, immutable query template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    pub namespace: String,
    pub id: String,
    /// Raw SQL as authored; the store keeps a cleaned copy alongside.
    pub sql: String,
    pub dynamic: bool,
    pub result_type: Option<String>,
    pub result_mapping: Option<String>,
    pub cacheable: bool,
    pub description: Option<String>,
    pub parameters: Vec<ParameterDecl>,
}

impl QueryTemplate {
    /// A dynamic template with no result descriptor or declared parameters.
    pub fn new(namespace: impl Into<String>, id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
            sql: sql.into(),
            dynamic: true,
            result_type: None,
            result_mapping: None,
            cacheable: true,
            description: None,
            parameters: Vec::new(),
        }
    }

    fn from_definition(
        namespace: &str,
        definition: QueryDefinition,
        source_name: &str,
    ) -> Option<Self> {
        let id = match definition.id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => {
                warn!(source = %source_name, "Skipping query with missing id");
                return None;
            }
        };
        let sql = match definition.sql {
            Some(sql) if !sql.trim().is_empty() => sql,
            _ => {
                warn!(source = %source_name, id = %id, "Skipping query with missing SQL");
                return None;
            }
        };

        Some(Self {
            namespace: namespace.to_string(),
            id,
            sql,
            dynamic: definition.dynamic,
            result_type: non_blank(definition.result_type.or(definition.result_class)),
            result_mapping: non_blank(definition.result_mapping),
            cacheable: definition.cacheable,
            description: definition.description,
            parameters: definition.parameters,
        })
    }

    pub fn full_key(&self) -> String {
        if self.namespace.is_empty() {
            self.id.clone()
        } else {
            format!("{}.{}", self.namespace, self.id)
        }
    }

    /// Statement kind of the comment-free SQL.
    pub fn verb(&self) -> SqlVerb {
        classify_verb(&clean(&self.sql))
    }

    pub fn requires_result_descriptor(&self) -> bool {
        self.verb().requires_result_descriptor()
    }

    /// `resultType`, falling back to the legacy `resultClass`.
    pub fn effective_result_type(&self) -> Option<&str> {
        self.result_type.as_deref()
    }

    pub fn has_result_descriptor(&self) -> bool {
        self.result_type.is_some() || self.result_mapping.is_some()
    }

    pub fn has_parameters(&self) -> bool {
        !self.parameters.is_empty()
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDecl> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn is_parameter_required(&self, name: &str) -> bool {
        self.parameter(name).is_some_and(|p| p.required)
    }

    /// Row-returning statements declare exactly one of result type and
    /// result mapping; other statements declare neither.
    pub fn validate_result_descriptor(&self) -> Result<(), QueryError> {
        let key = self.full_key();
        if self.requires_result_descriptor() {
            if !self.has_result_descriptor() {
                return Err(QueryError::invalid_template(
                    key,
                    "Query must define either 'resultType' (or 'resultClass') or 'resultMapping'",
                ));
            }
            if self.result_type.is_some() && self.result_mapping.is_some() {
                return Err(QueryError::invalid_template(
                    key,
                    "Query cannot define both 'resultType'/'resultClass' and 'resultMapping'",
                ));
            }
        } else if self.has_result_descriptor() {
            return Err(QueryError::invalid_template(
                key,
                format!(
                    "{} statements must not define 'resultType' or 'resultMapping'",
                    self.verb()
                ),
            ));
        }
        Ok(())
    }

    /// Every required declared parameter appears as a `:name` token outside
    /// comments.
    pub fn validate_required_parameters(&self) -> Result<(), QueryError> {
        let tokens = extract_named_parameters(&clean(&self.sql));
        for parameter in self.parameters.iter().filter(|p| p.required) {
            if !tokens.contains(&parameter.name) {
                return Err(QueryError::invalid_template(
                    self.full_key(),
                    format!("Required parameter '{}' not found in SQL", parameter.name),
                ));
            }
        }
        Ok(())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
namespace: UserMapper
description: user queries
queries:
  - id: findActiveUsers
    resultClass: User
    sql: |
      SELECT * FROM users
      WHERE active = true
  - id: deactivate
    dynamic: false
    sql: UPDATE users SET active = false WHERE id = :id
    parameters:
      - name: id
        type: Long
        required: true
  - id: ""
    sql: SELECT 1
  - id: noSql
  - id: futureField
    sql: SELECT 2
    somethingNew: 42
"#;

    #[test]
    fn parses_document_and_skips_incomplete_entries() {
        let document = TemplateDocument::from_yaml("UserMapper.yml", DOCUMENT).unwrap();
        assert!(document.has_namespace());

        let templates = document.into_templates("UserMapper", "UserMapper.yml");
        let ids: Vec<&str> = templates.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["findActiveUsers", "deactivate", "futureField"]);

        let find = &templates[0];
        assert!(find.dynamic);
        assert!(find.cacheable);
        assert_eq!(find.result_type.as_deref(), Some("User"));
        assert_eq!(find.full_key(), "UserMapper.findActiveUsers");

        let deactivate = &templates[1];
        assert!(!deactivate.dynamic);
        assert!(deactivate.is_parameter_required("id"));
        assert_eq!(
            deactivate.parameter("id").and_then(|p| p.type_name.as_deref()),
            Some("Long")
        );
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = TemplateDocument::from_yaml("bad.yml", "queries: [").unwrap_err();
        assert!(matches!(err, QueryError::Parse { .. }));
    }

    #[test]
    fn result_descriptor_rules() {
        let mut select = QueryTemplate::new("Ns", "q", "SELECT * FROM t");
        assert!(select.validate_result_descriptor().is_err());

        select.result_type = Some("Row".into());
        assert!(select.validate_result_descriptor().is_ok());

        select.result_mapping = Some("RowMapping".into());
        assert!(select.validate_result_descriptor().is_err());

        let mut update = QueryTemplate::new("Ns", "u", "UPDATE t SET a = 1");
        assert!(update.validate_result_descriptor().is_ok());
        update.result_type = Some("Row".into());
        assert!(update.validate_result_descriptor().is_err());
    }

    #[test]
    fn required_parameters_must_appear_in_sql() {
        let mut template = QueryTemplate::new("Ns", "q", "SELECT * FROM t WHERE id = :id");
        template.parameters.push(ParameterDecl {
            name: "id".into(),
            required: true,
            ..Default::default()
        });
        assert!(template.validate_required_parameters().is_ok());

        template.parameters.push(ParameterDecl {
            name: "tenant".into(),
            required: true,
            ..Default::default()
        });
        let err = template.validate_required_parameters().unwrap_err();
        assert!(err.to_string().contains("tenant"));
    }

    #[test]
    fn required_parameters_match_whole_tokens_outside_comments() {
        let required = |name: &str| ParameterDecl {
            name: name.into(),
            required: true,
            ..Default::default()
        };

        let mut prefixed = QueryTemplate::new("Ns", "q", "SELECT * FROM t WHERE id = :idx");
        prefixed.parameters.push(required("id"));
        assert!(prefixed.validate_required_parameters().is_err());

        let mut commented = QueryTemplate::new(
            "Ns",
            "q",
            "SELECT * FROM t -- filter on :tenant\nWHERE id = :id",
        );
        commented.parameters.push(required("id"));
        assert!(commented.validate_required_parameters().is_ok());
        commented.parameters.push(required("tenant"));
        let err = commented.validate_required_parameters().unwrap_err();
        assert!(err.to_string().contains("tenant"));
    }

    #[test]
    fn leading_comment_does_not_hide_the_verb() {
        let mut template = QueryTemplate::new(
            "Ns",
            "active",
            "-- active users only\nSELECT * FROM users WHERE active = true",
        );
        assert_eq!(template.verb(), SqlVerb::Select);
        assert!(template.requires_result_descriptor());
        template.result_type = Some("User".into());
        assert!(template.validate_result_descriptor().is_ok());

        let update = QueryTemplate::new("Ns", "touch", "/* audit */ UPDATE users SET seen = now()");
        assert_eq!(update.verb(), SqlVerb::Update);
    }
}
