//! Rule-based transformation-tool recommendation.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::complexity::{Complexity, ComplexityLevel};
use super::dialect::DialectReport;
use crate::config::ToolNames;

/// Outcome of the recommendation rules. Which concrete tool each outcome
/// maps to is configuration ([`ToolNames`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    ComplexIncremental,
    Incremental,
    HighComplexity,
    DialectSpecific,
    SimpleTransform,
}

impl Outcome {
    pub const ALL: [Outcome; 5] = [
        Outcome::ComplexIncremental,
        Outcome::Incremental,
        Outcome::HighComplexity,
        Outcome::DialectSpecific,
        Outcome::SimpleTransform,
    ];

    pub fn reason(self) -> &'static str {
        match self {
            Outcome::ComplexIncremental => "complex incremental update",
            Outcome::Incremental => "incremental update",
            Outcome::HighComplexity => "high complexity",
            Outcome::DialectSpecific => "dialect-specific syntax",
            Outcome::SimpleTransform => "simple transformation",
        }
    }

    pub fn tool(self, tools: &ToolNames) -> &str {
        match self {
            Outcome::SimpleTransform => &tools.simple,
            _ => &tools.advanced,
        }
    }

    /// Human-readable form, e.g. `SQLMesh (incremental update)`.
    pub fn render(self, tools: &ToolNames) -> String {
        format!("{} ({})", self.tool(tools), self.reason())
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// First matching rule wins.
pub fn recommend(incremental: bool, complexity: &Complexity, dialect: &DialectReport) -> Outcome {
    let high = complexity.level == ComplexityLevel::High;
    if incremental && high {
        Outcome::ComplexIncremental
    } else if incremental {
        Outcome::Incremental
    } else if high {
        Outcome::HighComplexity
    } else if !dialect.generic {
        Outcome::DialectSpecific
    } else {
        Outcome::SimpleTransform
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(score_subqueries: u32) -> Complexity {
        Complexity::from_counts(score_subqueries, 0, 0, 0, 1)
    }

    fn dialect(generic: bool) -> DialectReport {
        DialectReport {
            mysql: if generic { vec![] } else { vec!["CURDATE()".into()] },
            postgres: vec![],
            generic,
        }
    }

    #[test]
    fn test_rule_order() {
        let high = level(7);
        let low = level(0);
        assert_eq!(recommend(true, &high, &dialect(false)), Outcome::ComplexIncremental);
        assert_eq!(recommend(true, &low, &dialect(false)), Outcome::Incremental);
        assert_eq!(recommend(false, &high, &dialect(false)), Outcome::HighComplexity);
        assert_eq!(recommend(false, &low, &dialect(false)), Outcome::DialectSpecific);
        assert_eq!(recommend(false, &low, &dialect(true)), Outcome::SimpleTransform);
    }

    #[test]
    fn test_medium_is_not_high() {
        let medium = level(4);
        assert_eq!(recommend(false, &medium, &dialect(true)), Outcome::SimpleTransform);
    }

    #[test]
    fn test_render_uses_configured_tools() {
        let tools = ToolNames::default();
        assert_eq!(Outcome::Incremental.render(&tools), "SQLMesh (incremental update)");
        assert_eq!(Outcome::SimpleTransform.render(&tools), "dbt (simple transformation)");

        let custom = ToolNames {
            advanced: "Dataform".into(),
            simple: "dbt-core".into(),
        };
        assert_eq!(Outcome::HighComplexity.tool(&custom), "Dataform");
    }
}
