//! Business-domain dependency graph.
//!
//! Domains migrate in dependency order: a domain's prerequisites must be
//! fully migrated before any of its models run. The graph is read-only
//! configuration, validated once when it is built.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::analyzer::Domain;
use crate::error::{MigrateError, MigrateResult};

/// Which external tool owns a transformation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelTool {
    Sqlmesh,
    Dbt,
}

impl fmt::Display for ModelTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelTool::Sqlmesh => "SQLMesh",
            ModelTool::Dbt => "dbt",
        })
    }
}

/// A model identifier together with the tool that runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelRef<'a> {
    pub tool: ModelTool,
    pub id: &'a str,
}

impl fmt::Display for ModelRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.tool)
    }
}

/// One domain: its models and prerequisite domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSpec {
    pub name: Domain,
    /// `<layer>.<table>` models, run first.
    #[serde(default)]
    pub sqlmesh_models: Vec<String>,
    /// dbt selectors, run after the SQLMesh models.
    #[serde(default)]
    pub dbt_models: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<Domain>,
}

impl DomainSpec {
    /// All transformation models in execution order.
    pub fn models(&self) -> impl Iterator<Item = ModelRef<'_>> {
        let sqlmesh = self.sqlmesh_models.iter().map(|id| ModelRef {
            tool: ModelTool::Sqlmesh,
            id,
        });
        let dbt = self.dbt_models.iter().map(|id| ModelRef {
            tool: ModelTool::Dbt,
            id,
        });
        sqlmesh.chain(dbt)
    }

    pub fn model_count(&self) -> usize {
        self.sqlmesh_models.len() + self.dbt_models.len()
    }
}

struct BuiltinDomain {
    name: Domain,
    sqlmesh: &'static [&'static str],
    dbt: &'static [&'static str],
    depends_on: &'static [Domain],
}

const BUILTIN: [BuiltinDomain; 6] = [
    BuiltinDomain {
        name: Domain::Sales,
        sqlmesh: &["dwd.order_fact", "dws.order_daily"],
        dbt: &["staging.sales.*", "marts.sales.*"],
        depends_on: &[],
    },
    BuiltinDomain {
        name: Domain::Production,
        sqlmesh: &["dwd.production_fact", "dws.production_daily"],
        dbt: &["staging.production.*"],
        depends_on: &[Domain::Sales],
    },
    BuiltinDomain {
        name: Domain::Inventory,
        sqlmesh: &["dwd.inventory_fact", "dws.inventory_daily"],
        dbt: &["staging.inventory.*"],
        depends_on: &[],
    },
    BuiltinDomain {
        name: Domain::Purchase,
        sqlmesh: &["dwd.purchase_fact", "dws.purchase_daily"],
        dbt: &["staging.purchase.*"],
        depends_on: &[],
    },
    BuiltinDomain {
        name: Domain::Quality,
        sqlmesh: &["dwd.quality_fact", "dws.quality_daily"],
        dbt: &["staging.quality.*"],
        depends_on: &[Domain::Production],
    },
    BuiltinDomain {
        name: Domain::Cost,
        sqlmesh: &["dwd.cost_fact", "dws.cost_daily"],
        dbt: &["staging.cost.*"],
        depends_on: &[Domain::Production, Domain::Purchase],
    },
];

/// Validated, acyclic set of domain specs in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainGraph {
    specs: Vec<DomainSpec>,
}

impl DomainGraph {
    /// The built-in sales/production/inventory/purchase/quality/cost graph.
    pub fn builtin() -> Self {
        let specs = BUILTIN
            .iter()
            .map(|d| DomainSpec {
                name: d.name,
                sqlmesh_models: d.sqlmesh.iter().map(|s| s.to_string()).collect(),
                dbt_models: d.dbt.iter().map(|s| s.to_string()).collect(),
                depends_on: d.depends_on.to_vec(),
            })
            .collect();
        Self { specs }
    }

    /// Build a graph, rejecting duplicates, `common`, dangling prerequisites
    /// and cycles.
    pub fn new(specs: Vec<DomainSpec>) -> MigrateResult<Self> {
        let mut seen = HashSet::new();
        for spec in &specs {
            if spec.name == Domain::Common {
                return Err(MigrateError::InvalidGraph(
                    "'common' cannot be migrated as a domain".to_string(),
                ));
            }
            if !seen.insert(spec.name) {
                return Err(MigrateError::InvalidGraph(format!(
                    "domain '{}' is declared twice",
                    spec.name
                )));
            }
        }
        for spec in &specs {
            if let Some(missing) = spec.depends_on.iter().find(|d| !seen.contains(d)) {
                return Err(MigrateError::InvalidGraph(format!(
                    "domain '{}' depends on undeclared domain '{}'",
                    spec.name, missing
                )));
            }
        }

        let graph = Self { specs };
        if let Some(cycle) = graph.find_cycle() {
            let path: Vec<&str> = cycle.iter().map(|d| d.as_str()).collect();
            return Err(MigrateError::InvalidGraph(format!(
                "dependency cycle: {}",
                path.join(" -> ")
            )));
        }
        Ok(graph)
    }

    pub fn specs(&self) -> &[DomainSpec] {
        &self.specs
    }

    pub fn get(&self, domain: Domain) -> Option<&DomainSpec> {
        self.specs.iter().find(|s| s.name == domain)
    }

    pub fn names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.to_string()).collect()
    }

    /// Resolve a user-supplied domain name.
    pub fn lookup(&self, name: &str) -> MigrateResult<&DomainSpec> {
        name.parse::<Domain>()
            .ok()
            .and_then(|d| self.get(d))
            .ok_or_else(|| MigrateError::unknown_domain(name, self.names()))
    }

    /// Stable topological order: among ready domains, declaration order wins.
    pub fn migration_order(&self) -> Vec<Domain> {
        let mut order: Vec<Domain> = Vec::with_capacity(self.specs.len());
        while order.len() < self.specs.len() {
            let next = self.specs.iter().find(|s| {
                !order.contains(&s.name) && s.depends_on.iter().all(|d| order.contains(d))
            });
            match next {
                Some(spec) => order.push(spec.name),
                // unreachable for a validated graph
                None => break,
            }
        }
        order
    }

    fn find_cycle(&self) -> Option<Vec<Domain>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        fn visit(
            graph: &DomainGraph,
            idx: usize,
            marks: &mut [Mark],
            stack: &mut Vec<Domain>,
        ) -> Option<Vec<Domain>> {
            let spec = &graph.specs[idx];
            marks[idx] = Mark::InProgress;
            stack.push(spec.name);
            for dep in &spec.depends_on {
                let dep_idx = graph.specs.iter().position(|s| s.name == *dep)?;
                match marks[dep_idx] {
                    Mark::InProgress => {
                        let start = stack.iter().position(|d| d == dep).unwrap_or(0);
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(*dep);
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        if let Some(cycle) = visit(graph, dep_idx, marks, stack) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            stack.pop();
            marks[idx] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::Unvisited; self.specs.len()];
        let mut stack = Vec::new();
        (0..self.specs.len()).find_map(|idx| {
            if marks[idx] == Mark::Unvisited {
                visit(self, idx, &mut marks, &mut stack)
            } else {
                None
            }
        })
    }
}
