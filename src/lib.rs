//! # dw-migrate
//!
//! Migration planning for a legacy SQL data warehouse.
//!
//! Two halves:
//!
//! - **Analysis**: read ETL scripts, extract table lineage, classify each
//!   script by layer and business domain, detect incremental loads and
//!   dialect-specific syntax, score complexity and recommend which
//!   transformation tool should own it.
//! - **Orchestration**: migrate one business domain at a time, in
//!   dependency order, through external model/test/verification steps.
//!
//! ## Quick Example
//!
//! ```rust
//! use dw_migrate::prelude::*;
//!
//! let analyzer = SqlAnalyzer::new(ToolNames::default());
//! let a = analyzer.analyze(
//!     "dwd_01_order_fact_etl.sql",
//!     "INSERT INTO dwd_order_fact SELECT * FROM ods_order_master",
//! );
//! assert_eq!(a.layer, Layer::Dwd);
//! assert_eq!(a.domain, Domain::Sales);
//! assert_eq!(a.recommendation, "dbt (simple transformation)");
//! ```

pub mod analyzer;
pub mod config;
pub mod corpus;
pub mod domains;
pub mod error;
pub mod orchestrator;
pub mod runners;

pub mod prelude {
    pub use crate::analyzer::{
        Complexity, ComplexityLevel, DialectReport, Domain, IncrementalKind, Layer, Outcome,
        ScriptAnalysis, SqlAnalyzer, TableExtractor, TimeRange, TimeUnit,
    };
    pub use crate::config::{Config, ToolNames};
    pub use crate::corpus::{CorpusReport, CorpusSummary, analyze_corpus};
    pub use crate::domains::{DomainGraph, DomainSpec, ModelRef, ModelTool};
    pub use crate::error::*;
    pub use crate::orchestrator::{
        CancelFlag, ConsistencyChecker, MigrationFailure, MigrationRun, MigrationState,
        MigrationStateStore, ModelRunner, Orchestrator, Progress, StepOutcome, TestRunner,
    };
}
