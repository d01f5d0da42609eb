//! Directory-level analysis: one report entry per script plus a summary.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::analyzer::{Domain, Layer, Outcome, ScriptAnalysis, SqlAnalyzer, TableExtractor};
use crate::config::ToolNames;
use crate::error::{MigrateError, MigrateResult};

/// Counts over a set of analyses. Always derived, never edited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusSummary {
    pub total_files: usize,
    pub unreadable_files: usize,
    pub outcomes: BTreeMap<Outcome, usize>,
    /// Per concrete tool name, e.g. `{"SQLMesh": 12, "dbt": 30}`.
    pub tools: BTreeMap<String, usize>,
    pub domains: BTreeMap<Domain, usize>,
    pub layers: BTreeMap<Layer, usize>,
}

impl CorpusSummary {
    pub fn from_analyses(files: &[ScriptAnalysis], tools: &ToolNames) -> Self {
        let mut summary = Self {
            total_files: files.len(),
            ..Self::default()
        };
        for analysis in files {
            if analysis.is_unreadable() {
                summary.unreadable_files += 1;
            }
            *summary.outcomes.entry(analysis.outcome).or_default() += 1;
            *summary
                .tools
                .entry(analysis.outcome.tool(tools).to_string())
                .or_default() += 1;
            *summary.domains.entry(analysis.domain).or_default() += 1;
            *summary.layers.entry(analysis.layer).or_default() += 1;
        }
        summary
    }
}

/// The analysis report written as `analysis_results.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusReport {
    pub files: Vec<ScriptAnalysis>,
    pub summary: CorpusSummary,
}

impl CorpusReport {
    pub fn write_json(&self, path: &Path) -> MigrateResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// `*.sql` files directly inside `dir`, sorted by path.
pub fn sql_files(dir: &Path) -> MigrateResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(MigrateError::NotADirectory(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_sql = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("sql"));
        if is_sql && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Analyze every script in `dir`. Unreadable scripts stay in the report with
/// their `error` set.
pub fn analyze_corpus<E: TableExtractor>(
    analyzer: &SqlAnalyzer<E>,
    dir: &Path,
) -> MigrateResult<CorpusReport> {
    let paths = sql_files(dir)?;
    tracing::info!(dir = %dir.display(), files = paths.len(), "analyzing corpus");

    let files: Vec<ScriptAnalysis> = paths.iter().map(|p| analyzer.analyze_file(p)).collect();
    let summary = CorpusSummary::from_analyses(&files, analyzer.tools());
    Ok(CorpusReport { files, summary })
}
