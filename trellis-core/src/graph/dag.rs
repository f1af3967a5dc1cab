//! Dependency DAG
//!
//! The DAG records which nodes are derived from which. An edge `u -> v`
//! means "v is derived from u and must be recomputed after it".
//!
//! # Algorithm
//!
//! Ordering a sweep from a changed node works on the subgraph reachable
//! from that node only:
//!
//! 1. Collect the node and all its transitive dependents (BFS).
//! 2. Count, for each collected node, its in-degree restricted to the
//!    collected set.
//! 3. Run Kahn's algorithm: a node is finalized once all its predecessors in
//!    the set are finalized, and its generation is one more than the
//!    largest generation among them.
//!
//! Every step touches each reachable node and edge a constant number of
//! times, so the cost is linear in the size of the reachable subgraph.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};

use crate::error::{Error, Result};

/// A weighted directed acyclic graph keyed by node identity.
#[derive(Debug, Clone)]
pub struct Dag<N>
where
    N: Clone + Eq + Hash,
{
    /// Forward edges: node -> (dependent -> weight).
    dependents: IndexMap<N, IndexMap<N, f64>>,

    /// Reverse edges: node -> nodes it is derived from.
    dependencies: IndexMap<N, IndexSet<N>>,
}

impl<N> Dag<N>
where
    N: Clone + Eq + Hash + Display,
{
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            dependents: IndexMap::new(),
            dependencies: IndexMap::new(),
        }
    }

    /// Add an edge: `dependent` is derived from `dependency`.
    ///
    /// Adding an existing edge only updates its weight.
    pub fn add_edge(&mut self, dependency: N, dependent: N, weight: f64) -> Result<()> {
        if dependency == dependent {
            return Err(Error::SelfEdge(dependency.to_string()));
        }
        self.dependencies
            .entry(dependent.clone())
            .or_default()
            .insert(dependency.clone());
        self.dependents
            .entry(dependency)
            .or_default()
            .insert(dependent, weight);
        Ok(())
    }

    /// Remove an edge. Returns whether it existed.
    pub fn remove_edge(&mut self, dependency: &N, dependent: &N) -> bool {
        let removed = match self.dependents.get_mut(dependency) {
            Some(edges) => edges.shift_remove(dependent).is_some(),
            None => false,
        };
        if let Some(deps) = self.dependencies.get_mut(dependent) {
            deps.shift_remove(dependency);
        }
        removed
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, node: &N) {
        if let Some(edges) = self.dependents.shift_remove(node) {
            for dependent in edges.keys() {
                if let Some(deps) = self.dependencies.get_mut(dependent) {
                    deps.shift_remove(node);
                }
            }
        }
        if let Some(deps) = self.dependencies.shift_remove(node) {
            for dependency in &deps {
                if let Some(edges) = self.dependents.get_mut(dependency) {
                    edges.shift_remove(node);
                }
            }
        }
    }

    /// Direct dependents of a node, with edge weights.
    pub fn dependents(&self, node: &N) -> impl Iterator<Item = (&N, f64)> {
        self.dependents
            .get(node)
            .into_iter()
            .flat_map(|edges| edges.iter().map(|(n, w)| (n, *w)))
    }

    /// Direct dependencies of a node.
    pub fn dependencies(&self, node: &N) -> impl Iterator<Item = &N> {
        self.dependencies.get(node).into_iter().flatten()
    }

    /// Weight of an edge, if present.
    pub fn weight(&self, dependency: &N, dependent: &N) -> Option<f64> {
        self.dependents
            .get(dependency)
            .and_then(|edges| edges.get(dependent))
            .copied()
    }

    pub fn contains_edge(&self, dependency: &N, dependent: &N) -> bool {
        self.weight(dependency, dependent).is_some()
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.dependents.values().map(IndexMap::len).sum()
    }

    /// Number of distinct nodes touching at least one edge.
    pub fn node_count(&self) -> usize {
        let mut nodes: HashSet<&N> = HashSet::new();
        for (node, edges) in &self.dependents {
            if !edges.is_empty() {
                nodes.insert(node);
                nodes.extend(edges.keys());
            }
        }
        nodes.len()
    }

    /// All nodes reachable from `node` through outgoing edges, in BFS order.
    pub fn descendants(&self, node: &N, include_self: bool) -> Vec<N> {
        let mut seen: HashSet<&N> = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::new();

        seen.insert(node);
        queue.push_back(node);
        if include_self {
            order.push(node.clone());
        }

        while let Some(current) = queue.pop_front() {
            if let Some(edges) = self.dependents.get(current) {
                for dependent in edges.keys() {
                    if seen.insert(dependent) {
                        order.push(dependent.clone());
                        queue.push_back(dependent);
                    }
                }
            }
        }

        order
    }

    /// Generation of every node reachable from `node`, itself included.
    ///
    /// `node` has generation 0 and every edge `u -> v` inside the reachable
    /// subgraph satisfies `gen(u) < gen(v)`. Nodes are returned in the order
    /// they were finalized, which is non-decreasing in generation.
    pub fn topological_order(&self, node: &N) -> Result<IndexMap<N, usize>> {
        let reachable = self.descendants(node, true);
        let members: HashSet<&N> = reachable.iter().collect();

        // In-degree restricted to the reachable subgraph
        let mut in_degree: HashMap<&N, usize> = reachable.iter().map(|n| (n, 0)).collect();
        for source in &reachable {
            if let Some(edges) = self.dependents.get(source) {
                for dependent in edges.keys() {
                    if members.contains(dependent) {
                        if let Some(degree) = in_degree.get_mut(dependent) {
                            *degree += 1;
                        }
                    }
                }
            }
        }

        let mut generation: HashMap<&N, usize> = HashMap::new();
        let mut result: IndexMap<N, usize> = IndexMap::with_capacity(reachable.len());
        let mut queue: VecDeque<&N> = reachable
            .iter()
            .filter(|n| in_degree.get(n).copied() == Some(0))
            .collect();

        // Kahn's algorithm with level assignment
        while let Some(current) = queue.pop_front() {
            let level = generation.get(current).copied().unwrap_or(0);
            result.insert(current.clone(), level);

            if let Some(edges) = self.dependents.get(current) {
                for dependent in edges.keys() {
                    let Some(degree) = in_degree.get_mut(dependent) else {
                        continue;
                    };
                    let next = generation.entry(dependent).or_insert(0);
                    *next = (*next).max(level + 1);
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if result.len() != reachable.len() {
            return Err(Error::Cycle(node.to_string()));
        }

        // Queue order is not grouped by generation on uneven paths
        result.sort_by(|_, a, _, b| a.cmp(b));
        Ok(result)
    }

    /// The topological order grouped into generations.
    pub fn generations(&self, node: &N) -> Result<Vec<Vec<N>>> {
        let order = self.topological_order(node)?;
        let mut levels: Vec<Vec<N>> = Vec::new();
        for (n, level) in order {
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(n);
        }
        Ok(levels)
    }
}

impl<N> Default for Dag<N>
where
    N: Clone + Eq + Hash + Display,
{
    fn default() -> Self {
        Self::new()
    }
}
