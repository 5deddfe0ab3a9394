//! Property-based tests using proptest
//!
//! Invariants of SQL text handling and template resolution that must hold for
//! arbitrary input, not just the handful of examples in the unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;

use sql_templates::{
    Predicate, Predicates, QueryTemplate, StoreConfig, TemplateStore, assemble, balanced_parens,
    clean,
};

/// Strings dense in comment markers, quotes and whitespace.
fn sqlish_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[ a-zA-Z0-9_*/\\-\n\t\r'():=]{0,80}",
        any::<String>(),
    ]
}

/// Strings whose parentheses always balance, nested a few levels deep.
fn balanced_strategy() -> impl Strategy<Value = String> {
    Just(String::new()).prop_recursive(4, 32, 4, |inner| {
        prop::collection::vec(inner, 1..4)
            .prop_map(|parts| parts.into_iter().map(|p| format!("(a{} b)", p)).collect::<String>())
    })
}

/// Reference implementation: a counting pass that never goes negative and ends at zero.
fn naive_balance(s: &str) -> bool {
    let mut depth: i64 = 0;
    for c in s.chars() {
        if c == '(' {
            depth += 1;
        } else if c == ')' {
            depth -= 1;
            if depth < 0 {
                return false;
            }
        }
    }
    depth == 0
}

fn namespace_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[A-Z][a-zA-Z0-9]{0,12}",
        "[a-z]{1,6}\\.[A-Z][a-zA-Z0-9]{0,12}",
    ]
}

fn id_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-zA-Z0-9_]{0,16}"
}

fn select_strategy() -> impl Strategy<Value = String> {
    ("[a-z]{1,8}", "[a-z]{1,8}", "[ \n\t]{1,4}")
        .prop_map(|(column, table, gap)| format!("SELECT {column}{gap}FROM  {table}"))
}

proptest! {
    #[test]
    fn clean_is_idempotent(sql in sqlish_strategy()) {
        let once = clean(&sql);
        prop_assert_eq!(clean(&once), once);
    }

    #[test]
    fn clean_output_has_no_whitespace_runs(sql in sqlish_strategy()) {
        let cleaned = clean(&sql);
        prop_assert!(!cleaned.contains("  "));
        prop_assert_eq!(cleaned.trim(), cleaned.as_str());
    }

    #[test]
    fn balanced_parens_matches_counting_pass(sql in "[()a ]{0,40}") {
        prop_assert_eq!(balanced_parens(&sql), naive_balance(&sql));
    }

    #[test]
    fn nested_groups_are_balanced(sql in balanced_strategy()) {
        prop_assert!(balanced_parens(&sql));
        let unclosed = format!("{}(", sql);
        prop_assert!(!balanced_parens(&unclosed));
        let reversed = format!("){}(", sql);
        prop_assert!(!balanced_parens(&reversed));
    }

    #[test]
    fn full_and_bare_keys_resolve_to_the_same_sql(
        namespace in namespace_strategy(),
        id in id_strategy(),
        sql in select_strategy(),
    ) {
        let mut store = TemplateStore::new(StoreConfig::default());
        store.register(QueryTemplate::new(namespace.clone(), id.clone(), sql.clone()));

        let full = store.get(&format!("{}.{}", namespace, id)).unwrap();
        prop_assert_eq!(&full, &clean(&sql));
        prop_assert_eq!(store.get(&id).unwrap(), full);
    }

    #[test]
    fn inapplicable_predicates_never_change_the_statement(
        sql in select_strategy(),
        blanks in prop::collection::vec("[ \t]{0,3}", 0..4),
    ) {
        let predicates: Predicates = blanks
            .iter()
            .enumerate()
            .map(|(i, blank)| {
                let name = format!("p{}", i);
                let predicate = Predicate::when(format!("t.c{} = :{}", i, name), blank.as_str()).unwrap();
                (name, predicate)
            })
            .collect();
        let assembled = assemble(&sql, &predicates);
        prop_assert_eq!(assembled.sql, sql);
        prop_assert!(assembled.parameters.is_empty());
    }
}
