//! Rewriting `:name` placeholders into PostgreSQL's positional `$n` form.

use std::collections::BTreeSet;

/// SQL with positional placeholders and the parameter name behind each one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionalSql {
    pub sql: String,
    /// `names[i]` is bound to `$i+1`. A name used several times in the
    /// statement appears once and shares its placeholder.
    pub names: Vec<String>,
}

impl PositionalSql {
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace every `:name` token with `$n`.
///
/// String literals, quoted identifiers, comments and `::` casts are copied
/// through untouched.
pub fn to_positional(sql: &str) -> PositionalSql {
    to_positional_with_nulls(sql, &BTreeSet::new())
}

/// Like [`to_positional`], but every token named in `nulls` is written as the
/// literal `NULL` and takes no placeholder. The remaining placeholders are
/// numbered without gaps.
/// A NULL literal is untyped, so it compares against a column of any type.
pub fn to_positional_with_nulls(sql: &str, nulls: &BTreeSet<String>) -> PositionalSql {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut names: Vec<String> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                // Quoted text runs to the matching quote; a doubled quote is an escape.
                out.push(c);
                i += 1;
                while i < chars.len() {
                    out.push(chars[i]);
                    if chars[i] == c {
                        if chars.get(i + 1) == Some(&c) {
                            out.push(c);
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    out.push(chars[i]);
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                out.push_str("/*");
                i += 2;
                while i < chars.len() {
                    if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        out.push_str("*/");
                        i += 2;
                        break;
                    }
                    out.push(chars[i]);
                    i += 1;
                }
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' if chars.get(i + 1).is_some_and(|n| is_ident_start(*n)) => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident_continue(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                i = end;
                if nulls.contains(&name) {
                    out.push_str("NULL");
                    continue;
                }
                let index = match names.iter().position(|n| *n == name) {
                    Some(existing) => existing,
                    None => {
                        names.push(name);
                        names.len() - 1
                    }
                };
                out.push('$');
                out.push_str(&(index + 1).to_string());
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    PositionalSql { sql: out, names }
}
