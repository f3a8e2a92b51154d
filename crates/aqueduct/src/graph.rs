/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! In-memory task graph.
//!
//! [`TaskGraph`] holds the dependency structure of a workflow: nodes are task
//! ids, a directed edge `u -> v` means `u` must reach a terminal state before
//! `v` may start. Construction validates the structure — undeclared edge
//! endpoints, self-loops and cycles are rejected with a witness — and
//! precomputes the *layer assignment* the engine schedules by:
//!
//! ```text
//! layer(v) = 0                      when v has no predecessors
//! layer(v) = 1 + max(layer(u))      over all edges u -> v
//! ```
//!
//! All tasks in one layer can run in parallel; layers form hard barriers.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

use crate::error::ValidationError;

/// A validated directed acyclic graph over task ids.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    graph: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
    topo_order: Vec<String>,
    layers: Vec<Vec<String>>,
}

impl TaskGraph {
    /// Builds and validates the graph from declared task ids and edges.
    ///
    /// Node order follows `task_ids`; within a layer, tasks keep their
    /// declaration order, which makes scheduling deterministic.
    pub fn build(task_ids: &[String], edges: &[(String, String)]) -> Result<Self, ValidationError> {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();

        for id in task_ids {
            let index = graph.add_node(id.clone());
            indices.insert(id.clone(), index);
        }

        for (from, to) in edges {
            let from_index = *indices.get(from).ok_or_else(|| {
                ValidationError::UnknownDependency {
                    from: from.clone(),
                    to: to.clone(),
                    missing: from.clone(),
                }
            })?;
            let to_index = *indices.get(to).ok_or_else(|| {
                ValidationError::UnknownDependency {
                    from: from.clone(),
                    to: to.clone(),
                    missing: to.clone(),
                }
            })?;
            if from_index == to_index {
                return Err(ValidationError::SelfDependency(from.clone()));
            }
            graph.add_edge(from_index, to_index, ());
        }

        let topo = match toposort(&graph, None) {
            Ok(sorted) => sorted,
            Err(_) => {
                let cycle = find_cycle(&graph, &indices).unwrap_or_default();
                return Err(ValidationError::CyclicDependency { cycle });
            }
        };
        let topo_order: Vec<String> = topo.iter().map(|&idx| graph[idx].clone()).collect();

        // Longest-path layer assignment, walked in topological order so every
        // predecessor's layer is known before its dependents.
        let mut layer_of: HashMap<NodeIndex, usize> = HashMap::new();
        let mut depth = 0usize;
        for &node in &topo {
            let layer = graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|pred| layer_of[&pred] + 1)
                .max()
                .unwrap_or(0);
            depth = depth.max(layer);
            layer_of.insert(node, layer);
        }

        let mut layers = vec![Vec::new(); depth + 1];
        for id in task_ids {
            let index = indices[id];
            layers[layer_of[&index]].push(id.clone());
        }

        Ok(Self {
            graph,
            indices,
            topo_order,
            layers,
        })
    }

    /// Task ids with an edge into `id`.
    pub fn predecessors(&self, id: &str) -> Vec<String> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Task ids `id` has an edge into.
    pub fn successors(&self, id: &str) -> Vec<String> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<String> {
        match self.indices.get(id) {
            Some(&index) => self
                .graph
                .neighbors_directed(index, direction)
                .map(|n| self.graph[n].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// All task ids in a dependency-safe order.
    pub fn topological_order(&self) -> &[String] {
        &self.topo_order
    }

    /// The parallel batches the engine schedules, sources first.
    pub fn layers(&self) -> &[Vec<String>] {
        &self.layers
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// True when the graph holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Task ids with no predecessors.
    pub fn roots(&self) -> Vec<String> {
        self.layers.first().cloned().unwrap_or_default()
    }

    /// Task ids with no successors.
    pub fn leaves(&self) -> Vec<String> {
        self.topo_order
            .iter()
            .filter(|id| self.successors(id).is_empty())
            .cloned()
            .collect()
    }

    /// The edge list as `(from, to)` pairs, in insertion order.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(a, b)| (self.graph[a].clone(), self.graph[b].clone()))
            .collect()
    }
}

/// DFS cycle search returning a witness path. Only called after `toposort`
/// has already established that a cycle exists.
fn find_cycle(
    graph: &DiGraph<String, ()>,
    indices: &HashMap<String, NodeIndex>,
) -> Option<Vec<String>> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    let mut ordered: Vec<_> = indices.values().copied().collect();
    ordered.sort_by_key(|idx| idx.index());

    for start in ordered {
        if !visited.contains(&start) {
            if let Some(cycle) = dfs_cycle(graph, start, &mut visited, &mut rec_stack, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn dfs_cycle(
    graph: &DiGraph<String, ()>,
    node: NodeIndex,
    visited: &mut HashSet<NodeIndex>,
    rec_stack: &mut HashSet<NodeIndex>,
    path: &mut Vec<NodeIndex>,
) -> Option<Vec<String>> {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    for next in graph.neighbors_directed(node, Direction::Outgoing) {
        if !visited.contains(&next) {
            if let Some(cycle) = dfs_cycle(graph, next, visited, rec_stack, path) {
                return Some(cycle);
            }
        } else if rec_stack.contains(&next) {
            let start = path.iter().position(|&n| n == next).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|&n| graph[n].clone()).collect();
            cycle.push(graph[next].clone());
            return Some(cycle);
        }
    }

    rec_stack.remove(&node);
    path.pop();
    None
}
