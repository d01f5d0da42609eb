//! Structural complexity scoring.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const SUBQUERY_WEIGHT: u32 = 3;
pub const JOIN_WEIGHT: u32 = 2;
pub const AGGREGATION_WEIGHT: u32 = 1;
pub const CASE_WEIGHT: u32 = 1;

/// Scores strictly above this are `high`.
pub const HIGH_THRESHOLD: u32 = 20;
/// Scores strictly above this (and not high) are `medium`.
pub const MEDIUM_THRESHOLD: u32 = 10;

static SUBQUERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\(SELECT").expect("static subquery pattern"));
/// Every join counts once, qualified (`LEFT OUTER JOIN`) or bare (`JOIN`).
static JOIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:(?:INNER|LEFT|RIGHT|FULL)(?:\s+OUTER)?\s+)?JOIN\b")
        .expect("static join pattern")
});
static AGGREGATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:SUM|COUNT|AVG|MAX|MIN)\s*\(").expect("static aggregation pattern")
});
static CASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCASE\b").expect("static case pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    Low,
    Medium,
    High,
}

impl ComplexityLevel {
    pub fn from_score(score: u32) -> Self {
        if score > HIGH_THRESHOLD {
            ComplexityLevel::High
        } else if score > MEDIUM_THRESHOLD {
            ComplexityLevel::Medium
        } else {
            ComplexityLevel::Low
        }
    }
}

impl fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComplexityLevel::Low => "low",
            ComplexityLevel::Medium => "medium",
            ComplexityLevel::High => "high",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Complexity {
    pub subqueries: u32,
    pub joins: u32,
    pub aggregations: u32,
    pub case_statements: u32,
    /// Recorded for reporting only; not weighted.
    pub lines: u32,
    pub score: u32,
    pub level: ComplexityLevel,
}

impl Complexity {
    pub fn from_counts(
        subqueries: u32,
        joins: u32,
        aggregations: u32,
        case_statements: u32,
        lines: u32,
    ) -> Self {
        let score = SUBQUERY_WEIGHT * subqueries
            + JOIN_WEIGHT * joins
            + AGGREGATION_WEIGHT * aggregations
            + CASE_WEIGHT * case_statements;
        Self {
            subqueries,
            joins,
            aggregations,
            case_statements,
            lines,
            score,
            level: ComplexityLevel::from_score(score),
        }
    }
}

fn count(re: &Regex, sql: &str) -> u32 {
    re.find_iter(sql).count() as u32
}

pub fn score_complexity(sql: &str) -> Complexity {
    Complexity::from_counts(
        count(&SUBQUERY, sql),
        count(&JOIN, sql),
        count(&AGGREGATION, sql),
        count(&CASE, sql),
        sql.split('\n').count() as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "SELECT c.id, SUM(o.amount), COUNT (*), \
        CASE WHEN c.vip THEN 1 ELSE 0 END \
        FROM customer c LEFT JOIN orders o ON o.cid = c.id \
        INNER  JOIN region r ON r.id = c.rid";

    #[test]
    fn test_counts_and_score() {
        let c = score_complexity(BASE);
        assert_eq!(c.subqueries, 0);
        assert_eq!(c.joins, 2);
        assert_eq!(c.aggregations, 2);
        assert_eq!(c.case_statements, 1);
        assert_eq!(c.score, 7);
        assert_eq!(c.level, ComplexityLevel::Low);
        assert_eq!(c.lines, 1);
    }

    #[test]
    fn test_subquery_adds_exactly_three() {
        let base = score_complexity(BASE).score;
        let more = score_complexity(&format!("{} (SELECT", BASE)).score;
        assert_eq!(more, base + 3);
    }

    #[test]
    fn test_each_join_counted_once() {
        assert_eq!(score_complexity("SELECT * FROM a JOIN b").joins, 1);
        assert_eq!(score_complexity("SELECT * FROM a full join b").joins, 1);
        assert_eq!(
            score_complexity("FROM a LEFT OUTER JOIN b ON 1=1 JOIN c ON 1=1").joins,
            2
        );
        assert_eq!(score_complexity("SELECT joined_at FROM a").joins, 0);
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(ComplexityLevel::from_score(10), ComplexityLevel::Low);
        assert_eq!(ComplexityLevel::from_score(11), ComplexityLevel::Medium);
        assert_eq!(ComplexityLevel::from_score(20), ComplexityLevel::Medium);
        assert_eq!(ComplexityLevel::from_score(21), ComplexityLevel::High);
    }

    #[test]
    fn test_score_monotonic_in_each_count() {
        let base = Complexity::from_counts(1, 1, 1, 1, 1);
        for bumped in [
            Complexity::from_counts(2, 1, 1, 1, 1),
            Complexity::from_counts(1, 2, 1, 1, 1),
            Complexity::from_counts(1, 1, 2, 1, 1),
            Complexity::from_counts(1, 1, 1, 2, 1),
        ] {
            assert!(bumped.score > base.score);
        }
        assert_eq!(Complexity::from_counts(1, 1, 1, 1, 500).score, base.score);
    }

    #[test]
    fn test_lines_counted() {
        assert_eq!(score_complexity("a\nb\nc").lines, 3);
        assert_eq!(score_complexity("").lines, 1);
    }
}
