//! Lexical safety checks for SQL text.
//!
//! Two policies with different trust levels:
//!
//! - [`validate_template_syntax`] for statements authored in versioned
//!   template documents. Only basic shape is checked.
//! - [`validate_predicate`] for predicate fragments built at runtime, which may
//!   end up carrying caller-supplied values. Literal values must never be
//!   embedded in the fragment; everything goes through named parameters.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{InjectionCategory, QueryError};
use crate::sql::{SqlVerb, balanced_parens, classify_verb, extract_named_parameters, pattern};
use crate::value::Value;

static INJECTION_PATTERNS: Lazy<Vec<(InjectionCategory, Regex)>> = Lazy::new(|| {
    vec![
        (
            InjectionCategory::Tautology,
            pattern(r"(?i)'\s*(?:OR|AND)\s*'?\d*'?\s*=\s*'?\d*'?"),
        ),
        (
            InjectionCategory::StackedStatement,
            pattern(r"(?i);\s*(?:DROP|DELETE|UPDATE|INSERT|ALTER)\b"),
        ),
        (InjectionCategory::Comment, pattern(r"--|/\*[\s\S]*?\*/")),
        (
            InjectionCategory::Union,
            pattern(r"(?i)\bUNION\s+(?:ALL\s+)?SELECT\b"),
        ),
        (
            InjectionCategory::Exec,
            pattern(r"(?i)\bEXEC(?:UTE)?(?:\s+\w+|\s*\()"),
        ),
    ]
});

static HARDCODED_CLAUSE_LITERAL: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?i)\b(?:WHERE|AND|OR)\s+\w+\.?\w*\s*=\s*'(?:[^:'][^']*)?'"));

static HARDCODED_LITERAL: Lazy<Regex> = Lazy::new(|| pattern(r"=\s*'(?:[^:'][^']*)?'"));

/// Basic shape check for a template statement.
pub fn validate_template_syntax(key: &str, sql: &str) -> Result<(), QueryError> {
    if sql.trim().is_empty() {
        return Err(QueryError::invalid_template(key, "SQL must not be empty"));
    }

    if classify_verb(sql) == SqlVerb::Unknown {
        return Err(QueryError::invalid_template(
            key,
            "SQL must start with SELECT, INSERT, UPDATE, DELETE, WITH, CREATE, DROP, ALTER, CALL, or EXEC",
        ));
    }

    if !balanced_parens(sql) {
        return Err(QueryError::invalid_template(
            key,
            "Unbalanced parentheses in SQL",
        ));
    }

    Ok(())
}

/// Which injection pattern, if any, the fragment matches.
pub fn detect_injection(fragment: &str) -> Option<InjectionCategory> {
    INJECTION_PATTERNS
        .iter()
        .find(|(_, regex)| regex.is_match(fragment))
        .map(|(category, _)| *category)
}

/// Full safety check for a runtime predicate fragment and its value.
pub fn validate_predicate(fragment: &str, value: &Value) -> Result<(), QueryError> {
    if fragment.trim().is_empty() {
        return Err(QueryError::invalid_predicate(
            "SQL fragment must not be empty",
            fragment,
        ));
    }

    if !value.is_null() && extract_named_parameters(fragment).is_empty() {
        return Err(QueryError::invalid_predicate(
            "SQL fragment must use named parameters (:param) when a value is provided",
            fragment,
        ));
    }

    if let Some(category) = detect_injection(fragment) {
        return Err(QueryError::InjectionPattern {
            category,
            fragment: fragment.to_string(),
        });
    }

    if HARDCODED_CLAUSE_LITERAL.is_match(fragment) {
        return Err(QueryError::invalid_predicate(
            "SQL fragment contains a hardcoded string literal in a WHERE/AND/OR clause; use named parameters (:param)",
            fragment,
        ));
    }

    if HARDCODED_LITERAL.is_match(fragment) {
        return Err(QueryError::invalid_predicate(
            "SQL fragment compares against a hardcoded string literal without parameter binding; use named parameters (:param)",
            fragment,
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value() -> Value {
        Value::from("x")
    }

    #[test]
    fn template_syntax_requires_known_leading_keyword() {
        assert!(validate_template_syntax("A.q", "SELECT 1").is_ok());
        assert!(validate_template_syntax("A.q", "with x as (select 1) select * from x").is_ok());
        assert!(validate_template_syntax("A.q", "EXEC refresh_stats").is_ok());

        let err = validate_template_syntax("A.q", "VACUUM").unwrap_err();
        assert!(matches!(err, QueryError::InvalidTemplate { ref key, .. } if key == "A.q"));
        assert!(validate_template_syntax("A.q", "   ").is_err());
    }

    #[test]
    fn template_syntax_requires_balanced_parentheses() {
        let err = validate_template_syntax("A.q", "SELECT (1").unwrap_err();
        assert!(err.to_string().contains("Unbalanced parentheses"));
    }

    #[test]
    fn value_requires_a_named_parameter() {
        let err = validate_predicate("u.name = name", &value()).unwrap_err();
        assert!(err.to_string().contains("named parameters"));
        assert!(validate_predicate("u.name = :name", &value()).is_ok());
        assert!(validate_predicate("u.deleted_at IS NULL", &Value::Null).is_ok());
    }

    #[test]
    fn empty_fragment_is_rejected() {
        assert!(validate_predicate("  ", &Value::Null).is_err());
    }

    #[test]
    fn injection_categories() {
        let cases = [
            ("' OR '1'='1", InjectionCategory::Tautology),
            ("x = :x; DROP TABLE users", InjectionCategory::StackedStatement),
            ("x = :x -- trailing", InjectionCategory::Comment),
            ("x = :x /* hidden */", InjectionCategory::Comment),
            ("x = :x UNION SELECT secret FROM vault", InjectionCategory::Union),
            ("x = :x OR EXEC xp_cmdshell", InjectionCategory::Exec),
            ("x = :x OR EXECUTE(:cmd)", InjectionCategory::Exec),
        ];
        for (fragment, expected) in cases {
            match validate_predicate(fragment, &value()) {
                Err(QueryError::InjectionPattern { category, .. }) => {
                    assert_eq!(category, expected, "fragment: {fragment}")
                }
                other => panic!("expected injection error for {fragment}, got {other:?}"),
            }
        }
    }

    #[test]
    fn hardcoded_literals_are_rejected() {
        let err = validate_predicate("1 = 1 AND u.name = 'admin'", &Value::Null).unwrap_err();
        assert!(err.to_string().contains("WHERE/AND/OR"));

        let err = validate_predicate("u.role = 'admin'", &Value::Null).unwrap_err();
        assert!(err.to_string().contains("without parameter binding"));

        let err = validate_predicate("u.name = ''", &Value::Null).unwrap_err();
        assert!(err.to_string().contains("without parameter binding"));
        let err = validate_predicate("u.active = true AND u.name = ''", &Value::Null).unwrap_err();
        assert!(err.to_string().contains("WHERE/AND/OR"));

        assert!(validate_predicate("u.name = :name", &value()).is_ok());
    }

    #[test]
    fn stacked_statement_at_end_of_fragment() {
        for fragment in ["u.id = :id; DROP", "u.id = :id;delete", "u.id = :id ; ALTER"] {
            assert!(
                matches!(
                    validate_predicate(fragment, &Value::Int(1)),
                    Err(QueryError::InjectionPattern {
                        category: InjectionCategory::StackedStatement,
                        ..
                    })
                ),
                "fragment: {fragment}"
            );
        }
        assert!(validate_predicate("u.id = :id AND u.dropped = false", &Value::Int(1)).is_ok());
    }

    #[test]
    fn column_names_resembling_keywords_are_not_flagged() {
        assert!(validate_predicate("t.executed_at >= :since", &value()).is_ok());
        assert!(validate_predicate("t.reunion_id = :id", &value()).is_ok());
    }
}
