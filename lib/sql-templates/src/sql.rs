//! Stateless helpers over raw SQL text.
//!
//! Everything here is lexical: no parsing into an AST, no schema awareness.
//! The helpers are shared by the template store (cleaning, verb checks), the
//! safety validator (parameter extraction, parenthesis balance) and the
//! statement assembler (top-level WHERE detection).

use std::collections::BTreeSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

static COMMENTS: Lazy<Regex> = Lazy::new(|| pattern(r"--[^\r\n]*|/\*[\s\S]*?\*/"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| pattern(r"\s+"));
static NAMED_PARAMETER: Lazy<Regex> = Lazy::new(|| pattern(r":([A-Za-z_][A-Za-z0-9_]*)"));
static SELECT_TABLE: Lazy<Regex> = Lazy::new(|| pattern(r"(?i)\bFROM\s+([\w.]+)"));
static INSERT_TABLE: Lazy<Regex> = Lazy::new(|| pattern(r"(?i)\bINTO\s+([\w.]+)"));
static MUTATION_TABLE: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?i)^(?:UPDATE|DELETE\s+FROM)\s+([\w.]+)"));

/// Compile a pattern that is a literal in this crate.
#[allow(clippy::expect_used)]
pub(crate) fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("built-in SQL pattern must compile")
}

/// Statement kind, decided by the first keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlVerb {
    /// `SELECT` or a `WITH` common table expression.
    Select,
    Insert,
    Update,
    Delete,
    /// `CREATE`, `DROP`, `ALTER`
    Ddl,
    /// `CALL`, `EXEC`, `EXECUTE`
    Procedure,
    Unknown,
}

impl SqlVerb {
    /// Only statements that return rows need a result type or mapping.
    pub fn requires_result_descriptor(self) -> bool {
        matches!(self, SqlVerb::Select | SqlVerb::Procedure)
    }
}

impl fmt::Display for SqlVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlVerb::Select => "SELECT",
            SqlVerb::Insert => "INSERT",
            SqlVerb::Update => "UPDATE",
            SqlVerb::Delete => "DELETE",
            SqlVerb::Ddl => "DDL",
            SqlVerb::Procedure => "PROCEDURE",
            SqlVerb::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Where assembled predicates go relative to the base statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WhereClause {
    /// Index of the top-level `WHERE` token, if the statement has one.
    pub position: Option<usize>,
    /// `" AND "` when a top-level WHERE exists, `" WHERE "` otherwise.
    pub prefix: &'static str,
}

impl WhereClause {
    pub fn exists(&self) -> bool {
        self.position.is_some()
    }
}

/// Strip `--` and `/* */` comments and collapse whitespace runs.
///
/// Comments are replaced by a single space so that removing one can never
/// splice two tokens together; this keeps `clean` idempotent.
pub fn clean(sql: &str) -> String {
    if sql.trim().is_empty() {
        return String::new();
    }
    let without_comments = COMMENTS.replace_all(sql, " ");
    WHITESPACE
        .replace_all(&without_comments, " ")
        .trim()
        .to_string()
}

/// True when every `)` closes an earlier `(` and none are left open.
pub fn balanced_parens(sql: &str) -> bool {
    let mut depth: i64 = 0;
    for c in sql.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Find the statement's own WHERE clause, ignoring any inside subqueries.
pub fn locate_top_level_where(sql: &str) -> WhereClause {
    let mut depth: i64 = 0;

    for (index, token) in sql.split_whitespace().enumerate() {
        for c in token.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
        }
        if depth == 0 && token.eq_ignore_ascii_case("WHERE") {
            return WhereClause {
                position: Some(index),
                prefix: " AND ",
            };
        }
    }

    WhereClause {
        position: None,
        prefix: " WHERE ",
    }
}

/// Names of all `:name` tokens. Only ASCII identifiers are recognized.
pub fn extract_named_parameters(sql: &str) -> BTreeSet<String> {
    NAMED_PARAMETER
        .captures_iter(sql)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn count_parameters(sql: &str) -> usize {
    extract_named_parameters(sql).len()
}

/// Leading keyword of the statement, upper-cased.
fn leading_keyword(sql: &str) -> String {
    sql.trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase()
}

pub fn classify_verb(sql: &str) -> SqlVerb {
    match leading_keyword(sql).as_str() {
        "SELECT" | "WITH" => SqlVerb::Select,
        "INSERT" => SqlVerb::Insert,
        "UPDATE" => SqlVerb::Update,
        "DELETE" => SqlVerb::Delete,
        "CREATE" | "DROP" | "ALTER" => SqlVerb::Ddl,
        "CALL" | "EXEC" | "EXECUTE" => SqlVerb::Procedure,
        _ => SqlVerb::Unknown,
    }
}

pub fn requires_result_descriptor(verb: SqlVerb) -> bool {
    verb.requires_result_descriptor()
}

pub fn is_read_only(sql: &str) -> bool {
    matches!(leading_keyword(sql).as_str(), "SELECT" | "WITH")
}

/// Main table of a simple statement, for log lines. `"unknown"` otherwise.
pub fn extract_table_name(sql: &str) -> String {
    let cleaned = clean(sql);
    let found = match classify_verb(&cleaned) {
        SqlVerb::Select => SELECT_TABLE.captures(&cleaned),
        SqlVerb::Insert => INSERT_TABLE.captures(&cleaned),
        SqlVerb::Update | SqlVerb::Delete => MUTATION_TABLE.captures(&cleaned),
        _ => None,
    };
    found
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
