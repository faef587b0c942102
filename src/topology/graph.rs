//! Module dependency graph.
//!
//! Edges point from a dependency to its dependent, so a topological walk
//! yields build order. The graph is checked for cycles and dangling
//! dependencies when it is built; every later query can assume a DAG.

use indexmap::IndexMap;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::PathBuf;

use super::RoleType;
use crate::error::{Error, Result};

/// A buildable unit of the Hadoop source tree, as declared in config or
/// the built-in catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Maven artifact id, e.g. `hadoop-hdfs`
    pub name: String,
    /// Source directory relative to the Hadoop source root
    pub path: PathBuf,
    /// Modules this one depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Roles that load this module's jar; empty means all roles
    #[serde(default)]
    pub role_types: Vec<RoleType>,
}

impl ModuleSpec {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            dependencies: Vec::new(),
            role_types: Vec::new(),
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn for_roles(mut self, role_types: &[RoleType]) -> Self {
        self.role_types = role_types.to_vec();
        self
    }
}

/// A module inside a validated graph.
pub type Module = ModuleSpec;

impl Module {
    /// Whether a role of `role_type` loads this module.
    pub fn applies_to(&self, role_type: &RoleType) -> bool {
        self.role_types.is_empty() || self.role_types.contains(role_type)
    }
}

/// Validated, acyclic module dependency graph.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    graph: DiGraph<Module, ()>,
    indices: IndexMap<String, NodeIndex>,
}

impl ModuleGraph {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the graph from `specs`. Later specs replace earlier ones with
    /// the same name, keeping the earlier position.
    pub fn from_specs(specs: impl IntoIterator<Item = ModuleSpec>) -> Result<Self> {
        let mut merged: IndexMap<String, ModuleSpec> = IndexMap::new();
        for spec in specs {
            merged.insert(spec.name.clone(), spec);
        }

        let mut graph = DiGraph::new();
        let mut indices = IndexMap::new();
        for (name, spec) in &merged {
            let idx = graph.add_node(spec.clone());
            indices.insert(name.clone(), idx);
        }

        for (name, spec) in &merged {
            let to = indices[name];
            for dep in &spec.dependencies {
                let from = indices.get(dep).ok_or_else(|| {
                    Error::validation(format!(
                        "module '{}' depends on unknown module '{}'",
                        name, dep
                    ))
                })?;
                graph.add_edge(*from, to, ());
            }
        }

        let built = Self { graph, indices };
        if let Some(cycle) = built.find_cycle() {
            return Err(Error::DependencyCycle { cycle });
        }
        Ok(built)
    }

    /// A cycle as a path of module names with the first one repeated.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let scc = tarjan_scc(&self.graph).into_iter().find(|scc| {
            scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0])
        })?;
        let members: HashSet<NodeIndex> = scc.iter().copied().collect();

        // Every member of a non-trivial SCC has a successor inside it, so
        // walking until a node repeats always closes a cycle.
        let start = scc.iter().copied().min()?;
        let mut path = vec![start];
        let mut current = start;
        loop {
            let next = self
                .graph
                .neighbors_directed(current, Direction::Outgoing)
                .filter(|n| members.contains(n))
                .min()?;
            if let Some(pos) = path.iter().position(|n| *n == next) {
                let mut cycle: Vec<String> = path[pos..]
                    .iter()
                    .map(|idx| self.graph[*idx].name.clone())
                    .collect();
                cycle.push(self.graph[next].name.clone());
                return Some(cycle);
            }
            path.push(next);
            current = next;
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.indices.get(name).map(|idx| &self.graph[*idx])
    }

    /// Module names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.indices.keys().map(String::as_str)
    }

    /// Fail with a validation error naming the first unknown module.
    pub fn check_known<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        match names.iter().find(|n| !self.contains(n.as_ref())) {
            Some(unknown) => Err(Error::validation(format!(
                "unknown module '{}'",
                unknown.as_ref()
            ))),
            None => Ok(()),
        }
    }

    /// `names` plus everything they transitively depend on.
    pub fn with_dependencies<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>> {
        self.check_known(names)?;

        let mut seen = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = names
            .iter()
            .map(|n| self.indices[n.as_ref()])
            .collect();
        while let Some(idx) = queue.pop_front() {
            if !seen.insert(idx) {
                continue;
            }
            queue.extend(self.graph.neighbors_directed(idx, Direction::Incoming));
        }

        Ok(self
            .indices
            .iter()
            .filter(|(_, idx)| seen.contains(*idx))
            .map(|(name, _)| name.clone())
            .collect())
    }

    /// Order `names` so that every module comes after the modules it depends
    /// on. Ties keep declaration order, which makes the result
    /// deterministic. Dependencies outside `names` are ignored.
    pub fn topological_order<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>> {
        self.check_known(names)?;

        let subset: HashSet<NodeIndex> =
            names.iter().map(|n| self.indices[n.as_ref()]).collect();
        let mut in_degree: IndexMap<NodeIndex, usize> = subset
            .iter()
            .map(|idx| {
                let deps = self
                    .graph
                    .neighbors_directed(*idx, Direction::Incoming)
                    .filter(|d| subset.contains(d))
                    .count();
                (*idx, deps)
            })
            .collect();

        // Node indices follow declaration order.
        let mut ready: BTreeSet<NodeIndex> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(idx, _)| *idx)
            .collect();

        let mut order = Vec::with_capacity(subset.len());
        while let Some(idx) = ready.pop_first() {
            order.push(self.graph[idx].name.clone());
            for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(deg) = in_degree.get_mut(&dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        Ok(order)
    }
}
