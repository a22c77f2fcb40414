//! Dependency graph (DAG) construction and traversal
//!
//! Builds forward and reverse dependency graphs and the build order used by
//! routing runs. All iteration is in sorted order so runs are reproducible.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::manifest::{Manifest, ManifestError};

/// Node identifier (unique_id from manifest)
pub type NodeId = String;

/// Dependency graph with forward and reverse edges
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Forward edges: node -> nodes it depends on (parents)
    parents: BTreeMap<NodeId, BTreeSet<NodeId>>,

    /// Reverse edges: node -> nodes that depend on it (children)
    children: BTreeMap<NodeId, BTreeSet<NodeId>>,

    /// All nodes in the graph
    nodes: BTreeSet<NodeId>,
}

impl DependencyGraph {
    /// Build a dependency graph from each node's `depends_on`
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut graph = Self::default();

        for source_id in manifest.sources.keys() {
            graph.nodes.insert(source_id.clone());
        }

        for (node_id, node) in &manifest.nodes {
            graph.nodes.insert(node_id.clone());
            for dep_id in &node.depends_on.nodes {
                graph.add_edge(dep_id, node_id);
            }
        }

        graph
    }

    /// Record that `child` depends on `parent`
    pub fn add_edge(&mut self, parent: &str, child: &str) {
        self.nodes.insert(parent.to_string());
        self.nodes.insert(child.to_string());
        self.parents
            .entry(child.to_string())
            .or_default()
            .insert(parent.to_string());
        self.children
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
    }

    /// All nodes in sorted order
    pub fn all_nodes(&self) -> Vec<&NodeId> {
        self.nodes.iter().collect()
    }

    /// Immediate parents (dependencies) of a node
    pub fn parents(&self, node_id: &str) -> Vec<&NodeId> {
        self.parents
            .get(node_id)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// Immediate children (dependents) of a node
    pub fn children(&self, node_id: &str) -> Vec<&NodeId> {
        self.children
            .get(node_id)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// All downstream nodes (transitive closure of children)
    pub fn downstream(&self, node_id: &str) -> Vec<NodeId> {
        Self::closure(&self.children, node_id)
    }

    /// All upstream nodes (transitive closure of parents)
    pub fn upstream(&self, node_id: &str) -> Vec<NodeId> {
        Self::closure(&self.parents, node_id)
    }

    fn closure(edges: &BTreeMap<NodeId, BTreeSet<NodeId>>, start: &str) -> Vec<NodeId> {
        let mut visited = BTreeSet::new();
        let mut queue: VecDeque<&NodeId> = edges.get(start).into_iter().flatten().collect();
        let mut result = Vec::new();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            result.push(current.clone());
            queue.extend(edges.get(current).into_iter().flatten());
        }

        result
    }

    /// Topological order of all nodes, parents first
    ///
    /// Nodes that become ready at the same time come out in sorted order.
    pub fn topological_sort(&self) -> Result<Vec<NodeId>, ManifestError> {
        let mut in_degree: BTreeMap<&NodeId, usize> = self
            .nodes
            .iter()
            .map(|n| (n, self.parents.get(n).map_or(0, BTreeSet::len)))
            .collect();

        let mut ready: BTreeSet<&NodeId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.pop_first() {
            result.push(node.clone());
            for child in self.children.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(child);
                    }
                }
            }
        }

        if result.len() == self.nodes.len() {
            Ok(result)
        } else {
            let stuck = in_degree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(n, _)| n.clone())
                .collect();
            Err(ManifestError::Cycle(stuck))
        }
    }
}
