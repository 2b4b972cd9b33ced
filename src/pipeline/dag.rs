// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Stage dependency graph
//!
//! Builds and validates the directed acyclic graph of pipeline stages.
//! Edges come from explicit `depends_on` entries and from declared inputs
//! that overlap another stage's declared outputs.

use petgraph::algo::{has_path_connecting, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef, Reversed};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};

use crate::errors::{DanglingKind, StagehandError, StagehandResult};
use crate::pipeline::{Pipeline, StageSpec};

/// Validated stage dependency DAG
///
/// Node indices follow declaration order, which is what breaks ties in
/// [`StageGraph::topological_order`].
#[derive(Debug, Clone)]
pub struct StageGraph {
    graph: DiGraph<usize, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    names: Vec<String>,
    order: Vec<String>,
}

impl StageGraph {
    /// Build a DAG from the stage table
    pub fn build(stages: &[StageSpec]) -> StagehandResult<Self> {
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();
        let mut names = Vec::with_capacity(stages.len());

        // Add all stages as nodes
        for (idx, stage) in stages.iter().enumerate() {
            if name_to_index.contains_key(&stage.name) {
                return Err(StagehandError::DuplicateStage {
                    stage: stage.name.clone(),
                });
            }
            let node = graph.add_node(idx);
            name_to_index.insert(stage.name.clone(), node);
            names.push(stage.name.clone());
        }

        // Add dependency edges
        for stage in stages {
            let stage_node = name_to_index[&stage.name];

            // Explicit dependencies from depends_on
            for dep_name in &stage.depends_on {
                let dep_node = name_to_index.get(dep_name).ok_or_else(|| {
                    StagehandError::DanglingDependency {
                        stage: stage.name.clone(),
                        dependency: dep_name.clone(),
                        kind: DanglingKind::Stage,
                    }
                })?;
                graph.update_edge(*dep_node, stage_node, ());
            }

            // Implicit dependencies from inputs produced by other stages
            for producer in stages.iter().filter(|p| p.name != stage.name) {
                if stage.deps.iter().any(|dep| producer.produces(dep)) {
                    graph.update_edge(name_to_index[&producer.name], stage_node, ());
                }
            }
        }

        let mut dag = Self {
            graph,
            name_to_index,
            names,
            order: Vec::new(),
        };

        dag.validate_acyclic()?;
        dag.order = dag.kahn_order();

        Ok(dag)
    }

    /// Build the DAG of a pipeline definition
    pub fn from_pipeline(pipeline: &Pipeline) -> StagehandResult<Self> {
        Self::build(&pipeline.stages)
    }

    /// Validate that the graph is acyclic
    fn validate_acyclic(&self) -> StagehandResult<()> {
        for scc in tarjan_scc(&self.graph) {
            let self_loop = scc.len() == 1 && self.graph.contains_edge(scc[0], scc[0]);
            if scc.len() > 1 || self_loop {
                return Err(StagehandError::CircularDependency {
                    stages: self.cycle_path(&scc),
                });
            }
        }
        Ok(())
    }

    /// Walk one concrete cycle through a strongly connected component
    fn cycle_path(&self, scc: &[NodeIndex]) -> Vec<String> {
        let members: HashSet<NodeIndex> = scc.iter().copied().collect();
        let Some(&start) = scc.iter().min() else {
            return Vec::new();
        };

        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            let mut next: Vec<NodeIndex> = self.graph.neighbors(node).collect();
            next.sort();

            for succ in next {
                if succ == start {
                    let mut path = vec![node];
                    let mut cur = node;
                    while cur != start {
                        cur = parent[&cur];
                        path.push(cur);
                    }
                    path.reverse();
                    path.push(start);
                    return path.into_iter().map(|n| self.name_of(n)).collect();
                }
                if members.contains(&succ) && visited.insert(succ) {
                    parent.insert(succ, node);
                    queue.push_back(succ);
                }
            }
        }

        scc.iter().map(|n| self.name_of(*n)).collect()
    }

    /// Kahn's algorithm, always releasing the earliest-declared ready stage
    fn kahn_order(&self) -> Vec<String> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.names.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(self.names[idx].clone());
            for succ in self.graph.neighbors(NodeIndex::new(idx)) {
                let d = &mut in_degree[succ.index()];
                *d -= 1;
                if *d == 0 {
                    ready.push(Reverse(succ.index()));
                }
            }
        }

        order
    }

    fn name_of(&self, node: NodeIndex) -> String {
        self.names[self.graph[node]].clone()
    }

    fn node(&self, stage_name: &str) -> StagehandResult<NodeIndex> {
        self.name_to_index
            .get(stage_name)
            .copied()
            .ok_or_else(|| StagehandError::StageNotFound {
                stage: stage_name.to_string(),
            })
    }

    /// Stage names in execution order, ties broken by declaration order
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Stage names in declaration order
    pub fn stage_names(&self) -> &[String] {
        &self.names
    }

    /// Whether the graph contains a stage
    pub fn contains(&self, stage_name: &str) -> bool {
        self.name_to_index.contains_key(stage_name)
    }

    /// Every stage reachable from `stage_name` (excluding itself)
    pub fn downstream_of(&self, stage_name: &str) -> StagehandResult<BTreeSet<String>> {
        let start = self.node(stage_name)?;
        let mut dfs = Dfs::new(&self.graph, start);
        let mut out = BTreeSet::new();

        while let Some(node) = dfs.next(&self.graph) {
            if node != start {
                out.insert(self.name_of(node));
            }
        }

        Ok(out)
    }

    /// The selected stages plus all of their transitive upstream stages
    pub fn upstream_closure(&self, selection: &[String]) -> StagehandResult<BTreeSet<String>> {
        let reversed = Reversed(&self.graph);
        let mut out = BTreeSet::new();

        for name in selection {
            let start = self.node(name)?;
            let mut dfs = Dfs::new(reversed, start);
            while let Some(node) = dfs.next(reversed) {
                out.insert(self.name_of(node));
            }
        }

        Ok(out)
    }

    /// Get dependencies for a stage (stages that must run before it)
    pub fn dependencies(&self, stage_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(stage_name)?;
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(*node, Direction::Incoming)
            .collect();
        deps.sort();
        Some(deps.into_iter().map(|n| self.name_of(n)).collect())
    }

    /// Get dependents for a stage (stages that depend on it)
    pub fn dependents(&self, stage_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(stage_name)?;
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(*node, Direction::Outgoing)
            .collect();
        deps.sort();
        Some(deps.into_iter().map(|n| self.name_of(n)).collect())
    }

    /// Check if stage A depends (directly or transitively) on stage B
    pub fn depends_on(&self, stage_a: &str, stage_b: &str) -> bool {
        let (Some(node_a), Some(node_b)) =
            (self.name_to_index.get(stage_a), self.name_to_index.get(stage_b))
        else {
            return false;
        };

        has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    fn edges(&self) -> Vec<(String, String)> {
        let mut edges: Vec<(NodeIndex, NodeIndex)> = self
            .graph
            .edge_references()
            .map(|e| (e.source(), e.target()))
            .collect();
        edges.sort();
        edges
            .into_iter()
            .map(|(from, to)| (self.name_of(from), self.name_of(to)))
            .collect()
    }

    /// Generate Mermaid diagram of the DAG
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for name in &self.names {
            out.push_str(&format!("    {}[{}]\n", name, name));
        }

        for (from, to) in self.edges() {
            out.push_str(&format!("    {} --> {}\n", from, to));
        }

        out
    }

    /// Generate DOT diagram of the DAG
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for (from, to) in self.edges() {
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to));
        }

        // Isolated stages
        for name in &self.names {
            let node = self.name_to_index[name];
            if self.graph.neighbors_undirected(node).count() == 0 {
                out.push_str(&format!("    \"{}\";\n", name));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of execution order
    pub fn to_text(&self, pipeline: &Pipeline) -> String {
        let mut out = String::new();

        for (i, name) in self.order.iter().enumerate() {
            let tool = pipeline
                .get_stage(name)
                .map(|s| s.tool_name())
                .unwrap_or("?");
            let deps = self.dependencies(name).unwrap_or_default();

            out.push_str(&format!("{}. {} ({})", i + 1, name, tool));

            if !deps.is_empty() {
                out.push_str(&format!(" [depends: {}]", deps.join(", ")));
            }

            out.push('\n');
        }

        out
    }
}
