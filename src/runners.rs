//! Concrete collaborators for the orchestrator.
//!
//! - [`ProcessRunner`]: shells out to `sqlmesh` / `dbt` with a timeout
//! - [`FileStateStore`] / [`PgStateStore`]: which domains are migrated
//! - [`SqlConsistencyChecker`]: row-count comparison, legacy MySQL vs target PostgreSQL

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use sqlx::{MySqlPool, PgPool};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::analyzer::Domain;
use crate::config::{RunnerConfig, StateConfig, VerifyConfig};
use crate::domains::{DomainGraph, DomainSpec, ModelRef, ModelTool};
use crate::error::{MigrateError, MigrateResult};
use crate::orchestrator::{
    ConsistencyChecker, MigrationStateStore, ModelRunner, StepOutcome, TestRunner,
};

/// A fully resolved external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Runs models and tests through the `sqlmesh` and `dbt` CLIs.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    config: RunnerConfig,
    target_db: String,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig, target_db: impl Into<String>) -> Self {
        Self {
            config,
            target_db: target_db.into(),
        }
    }

    pub fn model_command(&self, model: &ModelRef<'_>) -> CommandSpec {
        match model.tool {
            ModelTool::Sqlmesh => CommandSpec {
                program: self.config.sqlmesh_bin.clone(),
                args: vec![
                    "plan".into(),
                    self.config.sqlmesh_env.clone(),
                    "--auto-apply".into(),
                    "--models".into(),
                    model.id.to_string(),
                ],
                cwd: self.config.sqlmesh_project.clone(),
            },
            ModelTool::Dbt => CommandSpec {
                program: self.config.dbt_bin.clone(),
                args: vec![
                    "run".into(),
                    "--select".into(),
                    model.id.to_string(),
                    "--target".into(),
                    self.target_db.clone(),
                ],
                cwd: self.config.dbt_project.clone(),
            },
        }
    }

    pub fn test_command(&self, domain: Domain) -> CommandSpec {
        CommandSpec {
            program: self.config.dbt_bin.clone(),
            args: vec![
                "test".into(),
                "--select".into(),
                format!("*{}*", domain),
                "--target".into(),
                self.target_db.clone(),
            ],
            cwd: self.config.dbt_project.clone(),
        }
    }

    /// Run to completion or until the configured timeout; the child is
    /// killed if it outlives the timeout.
    pub async fn execute(&self, spec: &CommandSpec) -> StepOutcome {
        debug!(command = %spec, cwd = %spec.cwd.display(), "running external command");

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(err) => return StepOutcome::failed(format!("cannot start `{}`: {}", spec, err)),
        };

        let timeout = self.config.timeout();
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Err(_) => StepOutcome::failed(format!(
                "`{}` timed out after {}s",
                spec,
                timeout.as_secs()
            )),
            Ok(Err(err)) => StepOutcome::failed(format!("`{}` failed: {}", spec, err)),
            Ok(Ok(output)) if output.status.success() => StepOutcome::Passed,
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                StepOutcome::failed(format!(
                    "`{}` exited with {}: {}",
                    spec,
                    output.status,
                    stderr.trim()
                ))
            }
        }
    }
}

impl ModelRunner for ProcessRunner {
    async fn run_model(&self, model: &ModelRef<'_>) -> StepOutcome {
        self.execute(&self.model_command(model)).await
    }
}

impl TestRunner for ProcessRunner {
    async fn run_tests(&self, domain: Domain) -> StepOutcome {
        self.execute(&self.test_command(domain)).await
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    migrated: BTreeSet<Domain>,
}

/// Migrated domains recorded in a local JSON file.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file means nothing has been migrated yet.
    pub fn migrated(&self) -> MigrateResult<BTreeSet<Domain>> {
        if !self.path.exists() {
            return Ok(BTreeSet::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let state: StateFile = serde_json::from_str(&content)?;
        Ok(state.migrated)
    }

    pub fn mark_migrated(&self, domain: Domain) -> MigrateResult<()> {
        let mut migrated = self.migrated()?;
        migrated.insert(domain);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&StateFile { migrated })?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl MigrationStateStore for FileStateStore {
    async fn is_domain_migrated(&self, domain: Domain) -> MigrateResult<bool> {
        Ok(self.migrated()?.contains(&domain))
    }
}

/// Split a `<schema>.<table>` model id. Ids without a schema land in `public`.
pub fn model_table(model_id: &str) -> (&str, &str) {
    model_id.split_once('.').unwrap_or(("public", model_id))
}

/// Legacy single-schema name of a model's table, e.g. `dwd_order_fact`.
pub fn legacy_table(model_id: &str) -> String {
    model_id.replace('.', "_")
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A domain counts as migrated once every SQLMesh model table exists in the
/// target database.
#[derive(Debug, Clone)]
pub struct PgStateStore {
    pool: PgPool,
    graph: DomainGraph,
}

impl PgStateStore {
    pub async fn connect(url: &str, graph: DomainGraph) -> MigrateResult<Self> {
        let pool = PgPoolOptions::new().max_connections(2).connect(url).await?;
        Ok(Self { pool, graph })
    }

    async fn table_exists(&self, schema: &str, table: &str) -> MigrateResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = $1 AND table_name = $2)",
        )
        .bind(schema)
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

impl MigrationStateStore for PgStateStore {
    async fn is_domain_migrated(&self, domain: Domain) -> MigrateResult<bool> {
        let Some(spec) = self.graph.get(domain) else {
            return Ok(false);
        };
        // no tables, no evidence
        if spec.sqlmesh_models.is_empty() {
            return Ok(false);
        }
        for model in &spec.sqlmesh_models {
            let (schema, table) = model_table(model);
            if !self.table_exists(schema, table).await? {
                debug!(%domain, model = %model, "target table missing");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Compares `COUNT(*)` of each SQLMesh model between the legacy MySQL
/// warehouse (`dwd_order_fact`) and the target (`dwd.order_fact`).
#[derive(Debug, Clone)]
pub struct SqlConsistencyChecker {
    source: MySqlPool,
    target: PgPool,
}

impl SqlConsistencyChecker {
    pub async fn connect(source_url: &str, target_url: &str) -> MigrateResult<Self> {
        let source = MySqlPoolOptions::new()
            .max_connections(2)
            .connect(source_url)
            .await?;
        let target = PgPoolOptions::new()
            .max_connections(2)
            .connect(target_url)
            .await?;
        Ok(Self { source, target })
    }

    async fn compare(&self, model_id: &str) -> MigrateResult<Option<String>> {
        let (schema, table) = model_table(model_id);
        let legacy = legacy_table(model_id);
        if ![schema, table, legacy.as_str()].iter().all(|n| is_plain_identifier(n)) {
            return Err(MigrateError::Config(format!(
                "model id '{}' is not a plain identifier",
                model_id
            )));
        }

        let source_rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", legacy))
            .fetch_one(&self.source)
            .await?;
        let target_rows: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}.{}", schema, table))
                .fetch_one(&self.target)
                .await?;

        debug!(model = model_id, source_rows, target_rows, "row counts");
        Ok((source_rows != target_rows).then(|| {
            format!(
                "{}: source {} rows, target {} rows",
                model_id, source_rows, target_rows
            )
        }))
    }
}

impl ConsistencyChecker for SqlConsistencyChecker {
    async fn verify(&self, spec: &DomainSpec) -> StepOutcome {
        let mut mismatches = Vec::new();
        for model in &spec.sqlmesh_models {
            match self.compare(model).await {
                Ok(None) => {}
                Ok(Some(mismatch)) => mismatches.push(mismatch),
                Err(err) => return StepOutcome::failed(format!("{}: {}", model, err)),
            }
        }
        if mismatches.is_empty() {
            StepOutcome::Passed
        } else {
            StepOutcome::failed(mismatches.join("; "))
        }
    }
}

/// State store selected from configuration.
#[derive(Debug, Clone)]
pub enum StateBackend {
    File(FileStateStore),
    Postgres(PgStateStore),
}

impl StateBackend {
    pub async fn from_config(config: &StateConfig, graph: &DomainGraph) -> MigrateResult<Self> {
        match &config.database_url {
            Some(url) => Ok(Self::Postgres(PgStateStore::connect(url, graph.clone()).await?)),
            None => Ok(Self::File(FileStateStore::new(&config.file))),
        }
    }

    /// Record a completed domain. The PostgreSQL store derives state from
    /// the target tables themselves, so there is nothing to write.
    pub fn mark_migrated(&self, domain: Domain) -> MigrateResult<()> {
        match self {
            Self::File(store) => store.mark_migrated(domain),
            Self::Postgres(_) => Ok(()),
        }
    }
}

impl MigrationStateStore for StateBackend {
    async fn is_domain_migrated(&self, domain: Domain) -> MigrateResult<bool> {
        match self {
            Self::File(store) => store.is_domain_migrated(domain).await,
            Self::Postgres(store) => store.is_domain_migrated(domain).await,
        }
    }
}

/// Consistency checker selected from configuration.
#[derive(Debug, Clone)]
pub enum ConsistencyBackend {
    Sql(SqlConsistencyChecker),
    /// No databases configured.
    Skipped,
}

impl ConsistencyBackend {
    pub async fn from_config(config: &VerifyConfig) -> MigrateResult<Self> {
        match (&config.source_url, &config.target_url) {
            (Some(source), Some(target)) => Ok(Self::Sql(
                SqlConsistencyChecker::connect(source, target).await?,
            )),
            (None, None) => Ok(Self::Skipped),
            _ => Err(MigrateError::Config(
                "[verify] needs both source_url and target_url".to_string(),
            )),
        }
    }
}

impl ConsistencyChecker for ConsistencyBackend {
    async fn verify(&self, spec: &DomainSpec) -> StepOutcome {
        match self {
            Self::Sql(checker) => checker.verify(spec).await,
            Self::Skipped => {
                warn!(domain = %spec.name, "no [verify] databases configured, skipping consistency check");
                StepOutcome::Passed
            }
        }
    }
}
