//! Configuration loaded from `dw-migrate.toml`.
//!
//! Lookup order: an explicit path, `./dw-migrate.toml`, then
//! `<config dir>/dw-migrate/config.toml`. Missing files fall back to
//! defaults; a file that exists but does not parse is an error.
//!
//! ```toml
//! [tools]
//! advanced = "SQLMesh"
//! simple = "dbt"
//!
//! [runner]
//! sqlmesh_project = "sqlmesh_project"
//! dbt_project = "dbt_project"
//! timeout_secs = 1800
//!
//! [state]
//! file = ".dw-migrate/state.json"
//!
//! [verify]
//! source_url = "mysql://etl@legacy/dw"
//! target_url = "postgres://etl@warehouse/dw"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::domains::{DomainGraph, DomainSpec};
use crate::error::{MigrateError, MigrateResult};

pub const LOCAL_CONFIG: &str = "dw-migrate.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolNames,
    pub runner: RunnerConfig,
    pub state: StateConfig,
    pub verify: VerifyConfig,
    /// Replaces the built-in domain graph when present.
    pub domains: Option<Vec<DomainSpec>>,
}

/// Concrete tools bound to the recommendation outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolNames {
    /// Incremental, complex and dialect-bound scripts.
    pub advanced: String,
    /// Plain transformations.
    pub simple: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            advanced: "SQLMesh".to_string(),
            simple: "dbt".to_string(),
        }
    }
}

/// External transformation/test tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub sqlmesh_bin: String,
    pub sqlmesh_project: PathBuf,
    pub sqlmesh_env: String,
    pub dbt_bin: String,
    pub dbt_project: PathBuf,
    /// Upper bound for any single external command.
    pub timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            sqlmesh_bin: "sqlmesh".to_string(),
            sqlmesh_project: PathBuf::from("sqlmesh_project"),
            sqlmesh_env: "dev".to_string(),
            dbt_bin: "dbt".to_string(),
            dbt_project: PathBuf::from("dbt_project"),
            timeout_secs: 1800,
        }
    }
}

impl RunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub file: PathBuf,
    /// When set, migration state is read from the target database instead.
    pub database_url: Option<String>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from(".dw-migrate/state.json"),
            database_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub source_url: Option<String>,
    pub target_url: Option<String>,
}

impl Config {
    /// Load configuration, searching the default locations when `explicit`
    /// is `None`.
    pub fn load(explicit: Option<&Path>) -> MigrateResult<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(MigrateError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Self::from_file(path);
        }

        match Self::search_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => Self::from_file(&path),
            None => {
                tracing::debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("dw-migrate").join("config.toml"));
        }
        paths
    }

    pub fn from_file(path: &Path) -> MigrateResult<Self> {
        tracing::debug!(path = %path.display(), "loading config");
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> MigrateResult<Self> {
        let config: Config = toml::from_str(content)?;
        // Surface graph problems at load time, not at first migration.
        config.domain_graph()?;
        Ok(config)
    }

    /// The validated domain graph: the configured one, or the built-in one.
    pub fn domain_graph(&self) -> MigrateResult<DomainGraph> {
        match &self.domains {
            Some(specs) => DomainGraph::new(specs.clone()),
            None => Ok(DomainGraph::builtin()),
        }
    }
}
