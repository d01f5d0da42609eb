//! Static analysis of legacy warehouse SQL scripts.
//!
//! Each script is classified from its file name and text alone:
//!
//! - [`lexer`]: table references and INSERT lineage
//! - [`classify`]: layer, business domain, incremental-load idiom
//! - [`time_range`]: rolling look-back windows
//! - [`dialect`]: MySQL / PostgreSQL specific constructs
//! - [`complexity`]: weighted structural score
//! - [`recommend`]: which transformation tool should own the script

pub mod classify;
pub mod complexity;
pub mod dialect;
pub mod lexer;
pub mod recommend;
pub mod time_range;

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub use classify::{Domain, IncrementalInfo, IncrementalKind, Layer};
pub use complexity::{Complexity, ComplexityLevel};
pub use dialect::DialectReport;
pub use lexer::{Dependencies, RegexExtractor, TableExtractor};
pub use recommend::Outcome;
pub use time_range::{TimeRange, TimeUnit};

use crate::config::ToolNames;

/// Everything learned about one script. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptAnalysis {
    pub file: String,
    pub layer: Layer,
    pub domain: Domain,
    pub tables: BTreeSet<String>,
    pub dependencies: Dependencies,
    pub incremental: IncrementalInfo,
    pub time_range: Option<TimeRange>,
    pub complexity: Complexity,
    pub dialect: DialectReport,
    pub recommendation: String,
    pub outcome: Outcome,
    /// Set only when the file could not be read; every other field then
    /// describes an empty script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScriptAnalysis {
    pub fn is_unreadable(&self) -> bool {
        self.error.is_some()
    }
}

/// Runs every analysis stage over a script.
#[derive(Debug, Clone, Default)]
pub struct SqlAnalyzer<E = RegexExtractor> {
    extractor: E,
    tools: ToolNames,
}

impl SqlAnalyzer<RegexExtractor> {
    pub fn new(tools: ToolNames) -> Self {
        Self {
            extractor: RegexExtractor,
            tools,
        }
    }
}

impl<E: TableExtractor> SqlAnalyzer<E> {
    /// Use a different table extractor (e.g. a real SQL parser).
    pub fn with_extractor(extractor: E, tools: ToolNames) -> Self {
        Self { extractor, tools }
    }

    pub fn tools(&self) -> &ToolNames {
        &self.tools
    }

    /// Analyze SQL text. `file` is the identifier recorded in the result;
    /// its final path component drives layer classification.
    pub fn analyze(&self, file: &str, sql: &str) -> ScriptAnalysis {
        let file_name = Path::new(file)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(file);

        let incremental =
            IncrementalInfo::from_detection(classify::detect_incremental(sql), &self.tools.advanced);
        let complexity = complexity::score_complexity(sql);
        let dialect = dialect::detect_dialect(sql);
        let outcome = recommend::recommend(incremental.detected, &complexity, &dialect);

        ScriptAnalysis {
            file: file.to_string(),
            layer: classify::identify_layer(file_name),
            domain: classify::identify_domain(sql),
            tables: self.extractor.tables(sql),
            dependencies: self.extractor.dependencies(sql),
            incremental,
            time_range: time_range::extract_time_range(sql),
            complexity,
            dialect,
            recommendation: outcome.render(&self.tools),
            outcome,
            error: None,
        }
    }

    /// Read and analyze a script. An unreadable file (missing, permission,
    /// not UTF-8) degrades to the analysis of an empty script with `error`
    /// set, so a corpus scan never aborts on one bad file.
    pub fn analyze_file(&self, path: &Path) -> ScriptAnalysis {
        let file = path.display().to_string();
        match fs::read_to_string(path) {
            Ok(sql) => {
                tracing::debug!(file = %file, bytes = sql.len(), "analyzing script");
                self.analyze(&file, &sql)
            }
            Err(err) => {
                tracing::warn!(file = %file, error = %err, "unreadable SQL file");
                ScriptAnalysis {
                    error: Some(err.to_string()),
                    ..self.analyze(&file, "")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    const ORDER_FACT: &str = "INSERT INTO dwd_order_fact SELECT * FROM ods_order_master o \
        JOIN ods_customer_master c ON o.customer_id=c.customer_id \
        WHERE o.order_date >= DATE_SUB(CURDATE(), INTERVAL 3 MONTH) \
        ON DUPLICATE KEY UPDATE amount=VALUES(amount)";

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_order_fact_end_to_end() {
        let analyzer = SqlAnalyzer::new(ToolNames::default());
        let a = analyzer.analyze("dwd_01_order_fact_etl.sql", ORDER_FACT);

        assert_eq!(a.layer, Layer::Dwd);
        assert_eq!(a.domain, Domain::Sales);
        assert_eq!(
            a.tables,
            set(&["dwd_order_fact", "ods_customer_master", "ods_order_master"])
        );
        assert_eq!(
            a.dependencies,
            BTreeMap::from([(
                "dwd_order_fact".to_string(),
                set(&["ods_customer_master", "ods_order_master"])
            )])
        );
        assert!(a.incremental.detected);
        assert_eq!(a.incremental.kind, Some(IncrementalKind::MysqlUpsert));
        assert_eq!(a.time_range, Some(TimeRange::new(3, TimeUnit::Month)));
        assert_eq!(
            a.complexity,
            Complexity {
                subqueries: 0,
                joins: 1,
                aggregations: 0,
                case_statements: 0,
                lines: 1,
                score: 2,
                level: ComplexityLevel::Low,
            }
        );
        assert_eq!(
            a.dialect.mysql,
            vec!["ON DUPLICATE KEY UPDATE", "CURDATE()", "DATE_SUB()"]
        );
        assert!(a.dialect.postgres.is_empty());
        assert!(!a.dialect.generic);
        assert_eq!(a.outcome, Outcome::Incremental);
        assert_eq!(a.recommendation, "SQLMesh (incremental update)");
        assert_eq!(a.error, None);
    }

    #[test]
    fn test_layer_uses_file_name_only() {
        let analyzer = SqlAnalyzer::new(ToolNames::default());
        let a = analyzer.analyze("/data/ods_scripts/report.sql", "SELECT 1");
        assert_eq!(a.layer, Layer::Unknown);
        assert_eq!(a.file, "/data/ods_scripts/report.sql");
    }

    #[test]
    fn test_unreadable_file_degrades() {
        let analyzer = SqlAnalyzer::new(ToolNames::default());
        let a = analyzer.analyze_file(Path::new("/definitely/not/here/ads_x.sql"));
        assert!(a.is_unreadable());
        assert_eq!(a.layer, Layer::Ads);
        assert!(a.tables.is_empty());
        assert_eq!(a.outcome, Outcome::SimpleTransform);
    }

    #[test]
    fn test_custom_extractor() {
        struct Fixed;
        impl TableExtractor for Fixed {
            fn tables(&self, _sql: &str) -> BTreeSet<String> {
                ["a", "b"].iter().map(|s| s.to_string()).collect()
            }
            fn insert_targets(&self, _sql: &str) -> BTreeSet<String> {
                ["a"].iter().map(|s| s.to_string()).collect()
            }
        }

        let analyzer = SqlAnalyzer::with_extractor(Fixed, ToolNames::default());
        let a = analyzer.analyze("x.sql", "");
        assert_eq!(a.dependencies["a"], set(&["b"]));
    }
}
