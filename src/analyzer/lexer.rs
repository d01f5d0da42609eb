//! Table-name extraction from raw SQL text.
//!
//! There is no SQL grammar here: identifiers are picked up after `FROM`,
//! `JOIN`, `INTO` and `UPDATE`. Aliases, CTE names and quoted identifiers
//! may be mis-extracted. A tokenizer or real parser can replace
//! [`RegexExtractor`] through the [`TableExtractor`] trait without touching
//! callers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

/// Table references: keyword followed by a letters/underscore identifier.
static TABLE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:FROM|JOIN|INTO)\s+([a-z_]+)").expect("static table pattern")
});

/// `UPDATE <table>`. The optional `KEY ` / `DO ` prefix swallows the `UPDATE`
/// of `ON DUPLICATE KEY UPDATE` and `ON CONFLICT DO UPDATE`, which are not
/// table references.
static UPDATE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\b(?:KEY|DO)\s+)?\bUPDATE\s+([a-z_]+)").expect("static update pattern")
});

static INSERT_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bINSERT\s+(?:IGNORE\s+)?INTO\s+([a-z_]+)").expect("static insert pattern")
});

/// Words that can follow the keywords above but never name a table.
const NOT_A_TABLE: [&str; 4] = ["select", "set", "values", "where"];

/// Lineage: INSERT target → every other table in the script.
pub type Dependencies = BTreeMap<String, BTreeSet<String>>;

/// Pulls table identifiers out of SQL text.
pub trait TableExtractor {
    /// Every referenced table, lower-cased and de-duplicated.
    fn tables(&self, sql: &str) -> BTreeSet<String>;

    /// Tables written by `INSERT INTO`, lower-cased and de-duplicated.
    fn insert_targets(&self, sql: &str) -> BTreeSet<String>;

    /// Map each INSERT target to all other tables referenced in the script.
    fn dependencies(&self, sql: &str) -> Dependencies {
        let tables = self.tables(sql);
        self.insert_targets(sql)
            .into_iter()
            .map(|target| {
                let sources = tables.iter().filter(|t| **t != target).cloned().collect();
                (target, sources)
            })
            .collect()
    }
}

/// Whitespace-delimited keyword/identifier matcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexExtractor;

impl TableExtractor for RegexExtractor {
    fn tables(&self, sql: &str) -> BTreeSet<String> {
        let referenced = TABLE_REF.captures_iter(sql).filter_map(|cap| cap.get(1));
        let updated = UPDATE_REF
            .captures_iter(sql)
            .filter(|cap| cap.get(1).is_none())
            .filter_map(|cap| cap.get(2));
        referenced
            .chain(updated)
            .map(|m| m.as_str().to_ascii_lowercase())
            .filter(|name| !NOT_A_TABLE.contains(&name.as_str()))
            .collect()
    }

    fn insert_targets(&self, sql: &str) -> BTreeSet<String> {
        INSERT_TARGET
            .captures_iter(sql)
            .filter_map(|cap| cap.get(1))
            .map(|m| m.as_str().to_ascii_lowercase())
            .collect()
    }
}

/// Extract tables with the default extractor.
pub fn extract_tables(sql: &str) -> BTreeSet<String> {
    RegexExtractor.tables(sql)
}

/// Extract lineage with the default extractor.
pub fn extract_dependencies(sql: &str) -> Dependencies {
    RegexExtractor.dependencies(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_case_insensitive_dedup() {
        assert_eq!(extract_tables("FROM Foo JOIN bar"), set(&["bar", "foo"]));
        assert_eq!(
            extract_tables("FROM Foo JOIN bar"),
            extract_tables("from foo join BAR")
        );
        assert_eq!(extract_tables("from foo join FOO"), set(&["foo"]));
    }

    #[test]
    fn test_clause_order_irrelevant() {
        let a = extract_tables("SELECT * FROM a JOIN b ON a.id = b.id JOIN c ON c.id = a.id");
        let b = extract_tables("SELECT * FROM c JOIN a ON a.id = c.id JOIN b ON b.id = a.id");
        assert_eq!(a, b);
    }

    #[test]
    fn test_update_and_into() {
        assert_eq!(
            extract_tables("UPDATE dim_customer SET name = 'x'"),
            set(&["dim_customer"])
        );
        assert_eq!(
            extract_tables("insert into dws_sales_daily select * from dwd_order_fact"),
            set(&["dwd_order_fact", "dws_sales_daily"])
        );
    }

    #[test]
    fn test_upsert_update_is_not_a_table() {
        let sql = "INSERT INTO t SELECT * FROM s ON DUPLICATE KEY UPDATE amount = VALUES(amount)";
        assert_eq!(extract_tables(sql), set(&["s", "t"]));

        let pg = "INSERT INTO t SELECT * FROM s ON CONFLICT (id) DO UPDATE SET amount = 1";
        assert_eq!(extract_tables(pg), set(&["s", "t"]));
    }

    #[test]
    fn test_key_or_do_identifier_before_keyword() {
        assert_eq!(
            extract_tables("SELECT d.key FROM dim_product d JOIN ods_x x ON 1=1"),
            set(&["dim_product", "ods_x"])
        );
        assert_eq!(
            extract_tables("INSERT INTO tgt SELECT a AS do\nFROM src"),
            set(&["src", "tgt"])
        );
        assert_eq!(
            extract_dependencies("INSERT INTO tgt SELECT k AS key FROM src")["tgt"],
            set(&["src"])
        );
    }

    #[test]
    fn test_subquery_and_empty() {
        assert_eq!(extract_tables("SELECT * FROM (SELECT 1) x"), set(&[]));
        assert!(extract_tables("").is_empty());
        assert!(extract_tables("-- nothing to see").is_empty());
    }

    #[test]
    fn test_identifier_stops_at_digit_or_dot() {
        assert_eq!(extract_tables("FROM dwd.order_fact"), set(&["dwd"]));
        assert_eq!(extract_tables("FROM orders2024"), set(&["orders"]));
    }

    #[test]
    fn test_dependencies_keys_are_insert_targets() {
        let sql = "INSERT INTO dws_a SELECT * FROM dwd_x JOIN dwd_y ON 1=1;\n\
                   INSERT IGNORE INTO dws_b SELECT * FROM dwd_x";
        let deps = extract_dependencies(sql);
        assert_eq!(
            deps.keys().cloned().collect::<BTreeSet<_>>(),
            set(&["dws_a", "dws_b"])
        );
        assert_eq!(deps["dws_a"], set(&["dwd_x", "dwd_y", "dws_b"]));
        assert_eq!(deps["dws_b"], set(&["dwd_x", "dwd_y", "dws_a"]));
    }

    #[test]
    fn test_no_insert_no_dependencies() {
        assert!(extract_dependencies("SELECT * FROM a JOIN b").is_empty());
    }
}
