//! Loop dependency graph
//!
//! Nodes are loop names; an edge A -> B means A is a dependency of B.
//! Topological order comes from Kahn's algorithm; when that comes up
//! short a DFS with an explicit recursion stack reconstructs a cycle for
//! the error message.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::error::EngineError;
use crate::workflow::LoopConfig;

/// Dependency graph over a workflow's loops
#[derive(Debug)]
pub struct DependencyGraph {
    /// Node names in authored order (for deterministic traversal)
    nodes: Vec<String>,
    /// dependency -> loops that depend on it
    dependents: HashMap<String, Vec<String>>,
    /// loop -> its dependencies
    dependencies: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph from loop configs. References to unknown loops are
    /// a dependency error.
    pub fn from_loops(loops: &[LoopConfig]) -> Result<Self, EngineError> {
        let nodes: Vec<String> = loops.iter().map(|l| l.name.clone()).collect();
        let known: HashSet<&str> = nodes.iter().map(String::as_str).collect();

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();

        for config in loops {
            for dep in &config.depends_on {
                if !known.contains(dep.as_str()) {
                    return Err(EngineError::Dependency(format!(
                        "loop '{}' depends on unknown loop '{}'",
                        config.name, dep
                    )));
                }
                dependents.entry(dep.clone()).or_default().push(config.name.clone());
                dependencies
                    .entry(config.name.clone())
                    .or_default()
                    .push(dep.clone());
            }
        }

        debug!(nodes = nodes.len(), "built dependency graph");
        Ok(Self {
            nodes,
            dependents,
            dependencies,
        })
    }

    /// The targets plus every transitive dependency, as a set.
    fn closure(&self, targets: &[String]) -> HashSet<String> {
        let mut selected = HashSet::new();
        let mut stack: Vec<&str> = targets.iter().map(String::as_str).collect();

        while let Some(name) = stack.pop() {
            if !selected.insert(name.to_string()) {
                continue;
            }
            if let Some(deps) = self.dependencies.get(name) {
                stack.extend(deps.iter().map(String::as_str));
            }
        }
        selected
    }

    /// Topological execution order for the targets and their transitive
    /// dependencies (Kahn's algorithm, authored order for ties).
    ///
    /// A cycle is reported as `a -> b -> c -> a`.
    pub fn execution_order(&self, targets: &[String]) -> Result<Vec<String>, EngineError> {
        for target in targets {
            if !self.nodes.contains(target) {
                return Err(EngineError::Dependency(format!(
                    "execute_loops references unknown loop '{}'",
                    target
                )));
            }
        }

        let selected = self.closure(targets);

        let mut in_degree: HashMap<&str, usize> = selected
            .iter()
            .map(|name| {
                let degree = self
                    .dependencies
                    .get(name)
                    .map(|deps| deps.iter().filter(|d| selected.contains(*d)).count())
                    .unwrap_or(0);
                (name.as_str(), degree)
            })
            .collect();

        // Seed the queue in authored order for deterministic output
        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .map(String::as_str)
            .filter(|name| selected.contains(*name) && in_degree.get(name) == Some(&0))
            .collect();

        let mut order = Vec::with_capacity(selected.len());
        while let Some(name) = queue.pop_front() {
            order.push(name.to_string());

            if let Some(dependents) = self.dependents.get(name) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependent.as_str());
                        }
                    }
                }
            }
        }

        if order.len() < selected.len() {
            let cycle = self.find_cycle(&selected);
            return Err(EngineError::Dependency(format!(
                "dependency cycle detected: {}",
                cycle
            )));
        }

        debug!(?order, "computed execution order");
        Ok(order)
    }

    /// Reconstruct one cycle among the selected nodes via DFS with an
    /// explicit recursion-stack set.
    fn find_cycle(&self, selected: &HashSet<String>) -> String {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut rec_stack: HashSet<&str> = HashSet::new();
        let mut path: Vec<&str> = Vec::new();

        for node in self.nodes.iter().filter(|n| selected.contains(*n)) {
            if !visited.contains(node.as_str())
                && let Some(cycle) = self.cycle_dfs(node, &mut visited, &mut rec_stack, &mut path)
            {
                return cycle;
            }
        }
        "(cycle could not be reconstructed)".to_string()
    }

    fn cycle_dfs<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<String> {
        visited.insert(node);
        rec_stack.insert(node);
        path.push(node);

        if let Some(deps) = self.dependencies.get(node) {
            for dep in deps {
                if rec_stack.contains(dep.as_str()) {
                    // Back edge: the cycle runs from dep's position to here
                    let start = path.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                    let mut cycle: Vec<&str> = path[start..].to_vec();
                    cycle.push(dep.as_str());
                    return Some(cycle.join(" -> "));
                }
                if !visited.contains(dep.as_str())
                    && let Some(cycle) = self.cycle_dfs(dep, visited, rec_stack, path)
                {
                    return Some(cycle);
                }
            }
        }

        rec_stack.remove(node);
        path.pop();
        None
    }
}
