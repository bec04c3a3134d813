//! Task dependency graph.
//!
//! Edges point from a dependency to the task waiting on it, so a task's
//! dependents are its outgoing neighbors. Ids referenced as dependencies
//! before they exist get placeholder nodes.

use petgraph::algo::is_cyclic_directed;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use std::collections::HashMap;

use crate::core::task::TaskId;
use crate::error::{Error, Result};

pub struct DependencyGraph {
    graph: StableDiGraph<TaskId, ()>,
    index: HashMap<TaskId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            index: HashMap::new(),
        }
    }

    fn ensure_node(&mut self, id: TaskId) -> NodeIndex {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.graph.add_node(id);
        self.index.insert(id, idx);
        idx
    }

    /// Register a task and edges from each of its dependencies.
    ///
    /// # Errors
    /// Returns `DependencyCycle` (and leaves the graph unchanged) if any
    /// edge would close a cycle.
    pub fn add_task(&mut self, id: TaskId, dependencies: &[TaskId]) -> Result<()> {
        let existed = self.index.contains_key(&id);
        let to = self.ensure_node(id);
        let mut added = Vec::with_capacity(dependencies.len());
        let mut created = Vec::new();

        for dep in dependencies {
            if *dep == id {
                self.rollback(&added, &created, id, existed);
                return Err(Error::DependencyCycle { task: id, dependency: *dep });
            }
            if !self.index.contains_key(dep) {
                created.push(*dep);
            }
            let from = self.ensure_node(*dep);
            if self.graph.find_edge(from, to).is_some() {
                continue;
            }
            added.push(self.graph.add_edge(from, to, ()));
            if is_cyclic_directed(&self.graph) {
                self.rollback(&added, &created, id, existed);
                return Err(Error::DependencyCycle { task: id, dependency: *dep });
            }
        }
        Ok(())
    }

    fn rollback(
        &mut self,
        edges: &[petgraph::stable_graph::EdgeIndex],
        created: &[TaskId],
        id: TaskId,
        existed: bool,
    ) {
        for edge in edges {
            self.graph.remove_edge(*edge);
        }
        for dep in created {
            self.remove(dep);
        }
        if !existed {
            self.remove(&id);
        }
    }

    /// Tasks that list `id` as a dependency.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, dir: Direction) -> Vec<TaskId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<TaskId> = self
            .graph
            .neighbors_directed(idx, dir)
            .filter_map(|n| self.graph.node_weight(n).copied())
            .collect();
        out.sort();
        out
    }

    pub fn dependent_count(&self, id: &TaskId) -> usize {
        self.index
            .get(id)
            .map(|&idx| self.graph.neighbors_directed(idx, Direction::Outgoing).count())
            .unwrap_or(0)
    }

    /// Drop a task and all of its edges.
    pub fn remove(&mut self, id: &TaskId) {
        if let Some(idx) = self.index.remove(id) {
            self.graph.remove_node(idx);
        }
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_new() {
        let graph = DependencyGraph::new();
        assert!(graph.is_empty());
        assert_eq!(graph.dependency_count(), 0);
    }

    #[test]
    fn test_graph_debug() {
        let debug = format!("{:?}", DependencyGraph::new());
        assert!(debug.contains("DependencyGraph"));
        assert!(debug.contains("tasks"));
    }

    #[test]
    fn test_add_task_with_dependencies() {
        let mut graph = DependencyGraph::new();
        let a = TaskId::new();
        let b = TaskId::new();
        let c = TaskId::new();
        graph.add_task(a, &[]).unwrap();
        graph.add_task(b, &[]).unwrap();
        graph.add_task(c, &[a, b]).unwrap();

        assert_eq!(graph.dependency_count(), 2);
        assert_eq!(graph.dependents(&a), vec![c]);
        assert_eq!(graph.dependents(&b), vec![c]);
        assert_eq!(graph.dependent_count(&c), 0);
    }

    #[test]
    fn test_unknown_dependency_gets_placeholder() {
        let mut graph = DependencyGraph::new();
        let missing = TaskId::new();
        let t = TaskId::new();
        graph.add_task(t, &[missing]).unwrap();
        assert!(graph.contains(&missing));
        assert_eq!(graph.dependent_count(&missing), 1);
    }

    #[test]
    fn test_duplicate_edges_are_ignored() {
        let mut graph = DependencyGraph::new();
        let a = TaskId::new();
        let b = TaskId::new();
        graph.add_task(b, &[a, a]).unwrap();
        assert_eq!(graph.dependency_count(), 1);
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut graph = DependencyGraph::new();
        let a = TaskId::new();
        let result = graph.add_task(a, &[a]);
        assert!(matches!(result, Err(Error::DependencyCycle { .. })));
        assert!(!graph.contains(&a));
    }

    #[test]
    fn test_cycle_rejected_and_rolled_back() {
        let mut graph = DependencyGraph::new();
        let a = TaskId::new();
        let b = TaskId::new();
        // a waits on b (b is a placeholder)
        graph.add_task(a, &[b]).unwrap();
        // b waiting on a closes the loop
        let result = graph.add_task(b, &[a]);
        assert!(matches!(result, Err(Error::DependencyCycle { .. })));
        assert_eq!(graph.dependency_count(), 1);
        assert!(graph.contains(&b));
    }

    #[test]
    fn test_remove_drops_edges() {
        let mut graph = DependencyGraph::new();
        let a = TaskId::new();
        let b = TaskId::new();
        graph.add_task(a, &[]).unwrap();
        graph.add_task(b, &[a]).unwrap();
        graph.remove(&a);
        assert!(!graph.contains(&a));
        assert_eq!(graph.dependency_count(), 0);
        assert!(graph.contains(&b));
    }

    #[test]
    fn test_dependent_count_for_fan_out() {
        let mut graph = DependencyGraph::new();
        let root = TaskId::new();
        graph.add_task(root, &[]).unwrap();
        for _ in 0..7 {
            graph.add_task(TaskId::new(), &[root]).unwrap();
        }
        assert_eq!(graph.dependent_count(&root), 7);
    }
}
