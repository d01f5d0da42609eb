//! Engine-specific syntax detection.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

type PatternList = Vec<(Regex, &'static str)>;

fn compile(patterns: &[(&str, &'static str)]) -> PatternList {
    patterns
        .iter()
        .map(|(pattern, name)| {
            let re = Regex::new(&format!("(?i){}", pattern)).expect("static dialect pattern");
            (re, *name)
        })
        .collect()
}

static MYSQL: LazyLock<PatternList> = LazyLock::new(|| {
    compile(&[
        (r"ON\s+DUPLICATE\s+KEY\s+UPDATE", "ON DUPLICATE KEY UPDATE"),
        (r"CURDATE\(\)", "CURDATE()"),
        (r"DATE_SUB\(", "DATE_SUB()"),
        (r"QUARTER\(", "QUARTER()"),
    ])
});

static POSTGRES: LazyLock<PatternList> = LazyLock::new(|| {
    compile(&[
        (r"ON\s+CONFLICT", "ON CONFLICT"),
        (r"CURRENT_DATE", "CURRENT_DATE"),
        (r"DATE_TRUNC\(", "DATE_TRUNC()"),
        (r"EXTRACT\(", "EXTRACT()"),
    ])
});

/// Dialect constructs matched in a script. Both lists are independent; a
/// script may hit both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialectReport {
    pub mysql: Vec<String>,
    pub postgres: Vec<String>,
    pub generic: bool,
}

impl Default for DialectReport {
    fn default() -> Self {
        Self {
            mysql: Vec::new(),
            postgres: Vec::new(),
            generic: true,
        }
    }
}

fn matched(patterns: &PatternList, sql: &str) -> Vec<String> {
    patterns
        .iter()
        .filter(|(re, _)| re.is_match(sql))
        .map(|(_, name)| name.to_string())
        .collect()
}

pub fn detect_dialect(sql: &str) -> DialectReport {
    let mysql = matched(&MYSQL, sql);
    let postgres = matched(&POSTGRES, sql);
    let generic = mysql.is_empty() && postgres.is_empty();
    DialectReport {
        mysql,
        postgres,
        generic,
    }
}
