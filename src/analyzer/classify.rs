//! Warehouse layer, business domain and incremental-load classification.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Warehouse layer, derived from the script's file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Ods,
    Dwd,
    Dws,
    Ads,
    Unknown,
}

impl Layer {
    /// Order in which file names are probed. First hit wins.
    pub const PRIORITY: [Layer; 4] = [Layer::Ods, Layer::Dwd, Layer::Dws, Layer::Ads];

    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Ods => "ods",
            Layer::Dwd => "dwd",
            Layer::Dws => "dws",
            Layer::Ads => "ads",
            Layer::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business domain a script (or a group of models) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Sales,
    Production,
    Inventory,
    Purchase,
    Quality,
    Cost,
    Common,
}

impl Domain {
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Sales => "sales",
            Domain::Production => "production",
            Domain::Inventory => "inventory",
            Domain::Purchase => "purchase",
            Domain::Quality => "quality",
            Domain::Cost => "cost",
            Domain::Common => "common",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sales" => Ok(Domain::Sales),
            "production" => Ok(Domain::Production),
            "inventory" => Ok(Domain::Inventory),
            "purchase" => Ok(Domain::Purchase),
            "quality" => Ok(Domain::Quality),
            "cost" => Ok(Domain::Cost),
            "common" => Ok(Domain::Common),
            other => Err(format!("unknown domain '{}'", other)),
        }
    }
}

/// Keyword table, probed top to bottom against the lower-cased SQL text.
const DOMAIN_KEYWORDS: [(Domain, &[&str]); 6] = [
    (Domain::Sales, &["order", "customer", "sales"]),
    (Domain::Production, &["production", "work_order", "bom"]),
    (Domain::Inventory, &["inventory", "warehouse", "material"]),
    (Domain::Purchase, &["purchase", "supplier"]),
    (Domain::Quality, &["quality", "defect", "inspection"]),
    (Domain::Cost, &["cost", "cost_center"]),
];

/// Classify the layer from a file name (content is never consulted).
pub fn identify_layer(file_name: &str) -> Layer {
    let lower = file_name.to_lowercase();
    Layer::PRIORITY
        .into_iter()
        .find(|layer| lower.contains(layer.as_str()))
        .unwrap_or(Layer::Unknown)
}

/// Classify the business domain from SQL text.
pub fn identify_domain(sql: &str) -> Domain {
    let lower = sql.to_lowercase();
    DOMAIN_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(domain, _)| *domain)
        .unwrap_or(Domain::Common)
}

/// Incremental-load idiom found in a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncrementalKind {
    MysqlUpsert,
    PostgresUpsert,
    Merge,
    TimeFilter,
}

impl IncrementalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IncrementalKind::MysqlUpsert => "mysql_upsert",
            IncrementalKind::PostgresUpsert => "postgres_upsert",
            IncrementalKind::Merge => "merge",
            IncrementalKind::TimeFilter => "time_filter",
        }
    }
}

impl fmt::Display for IncrementalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static INCREMENTAL_PATTERNS: LazyLock<Vec<(IncrementalKind, Regex)>> = LazyLock::new(|| {
    [
        (IncrementalKind::MysqlUpsert, r"(?i)ON\s+DUPLICATE\s+KEY\s+UPDATE"),
        (IncrementalKind::PostgresUpsert, r"(?i)ON\s+CONFLICT"),
        (IncrementalKind::Merge, r"(?i)MERGE\s+INTO"),
        (IncrementalKind::TimeFilter, r"(?i)WHERE.*>=.*DATE|@start_ds|@end_ds"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("static incremental pattern")))
    .collect()
});

/// Detect the first incremental-load idiom, in fixed priority order.
pub fn detect_incremental(sql: &str) -> Option<IncrementalKind> {
    INCREMENTAL_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(sql))
        .map(|(kind, _)| *kind)
}

/// Incremental section of a script analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalInfo {
    pub detected: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<IncrementalKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl IncrementalInfo {
    pub fn none() -> Self {
        Self {
            detected: false,
            kind: None,
            recommendation: None,
        }
    }

    /// Build from a detection result; `tool` names the incremental-capable engine.
    pub fn from_detection(kind: Option<IncrementalKind>, tool: &str) -> Self {
        match kind {
            Some(kind) => Self {
                detected: true,
                kind: Some(kind),
                recommendation: Some(format!("use {} INCREMENTAL_BY_TIME_RANGE", tool)),
            },
            None => Self::none(),
        }
    }
}
