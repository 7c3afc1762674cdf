//! `TaskGraph`: a mapping from `graph_id` to a DAG of sibling-dependency
//! edges, plus a flat `task_id -> TaskNode` index shared across all sub-graphs.
//!
//! Parent/child relationships span graphs via `sub_graph_id`; edges only ever
//! connect nodes within a single graph (invariant 2 of the specification).

use crate::error::{Result, TaskGraphError};
use crate::id::{GraphId, TaskId};
use crate::node::{NodeType, TaskNode, TaskStatus, TaskType};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// A single named sub-graph: the set of sibling nodes planned together by one
/// parent, and the dependency edges among them.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct SubGraph {
    is_root: bool,
    nodes: Vec<TaskId>,
    /// `from -> {to, to, ...}`: `from` must complete before each `to`.
    edges: std::collections::HashMap<TaskId, HashSet<TaskId>>,
}

/// A byte-serializable snapshot of an entire [`TaskGraph`], used by
/// checkpoint collaborators to round-trip state across process restarts
/// (§6: "Serialization format is implementation-defined but MUST round-trip
/// every field under §3").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    graphs: std::collections::HashMap<GraphId, SubGraph>,
    nodes: std::collections::HashMap<TaskId, TaskNode>,
    root_graph_id: Option<GraphId>,
    version: u64,
}

/// Shared, concurrently-mutable store of every graph and node in one
/// execution. Not `Clone`; share it across tasks behind an `Arc`.
pub struct TaskGraph {
    graphs: DashMap<GraphId, SubGraph>,
    index: DashMap<TaskId, TaskNode>,
    root_graph_id: RwLock<Option<GraphId>>,
    /// Bumped on every structural mutation; consulted by the scheduler's
    /// readiness cache (SPEC_FULL.md §4.4).
    version: AtomicU64,
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGraph {
    pub fn new() -> Self {
        TaskGraph {
            graphs: DashMap::new(),
            index: DashMap::new(),
            root_graph_id: RwLock::new(None),
            version: AtomicU64::new(0),
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Register a new (initially empty) sub-graph.
    pub fn add_graph(&self, graph_id: GraphId, is_root: bool) -> Result<()> {
        if is_root {
            let mut root = self.root_graph_id.write();
            if let Some(existing) = root.as_ref() {
                if existing != &graph_id {
                    return Err(TaskGraphError::DuplicateRoot(
                        graph_id.to_string(),
                        existing.to_string(),
                    ));
                }
            } else {
                *root = Some(graph_id.clone());
            }
        }
        self.graphs.entry(graph_id).or_insert_with(|| SubGraph {
            is_root,
            nodes: Vec::new(),
            edges: Default::default(),
        });
        self.bump_version();
        Ok(())
    }

    /// Convenience: create the root graph and its synthetic root node,
    /// already in `READY` per §4.3 ("Initial status is PENDING (or READY for
    /// the synthetic root)").
    pub fn init_root(&self, root_goal: impl Into<String>) -> Result<TaskId> {
        let graph_id = GraphId::root();
        self.add_graph(graph_id.clone(), true)?;
        let task_id = TaskId::root();
        let mut node = TaskNode::new(
            task_id.clone(),
            root_goal,
            TaskType::Think,
            NodeType::Plan,
            0,
            None,
        );
        node.status = TaskStatus::Ready;
        self.add_node(&graph_id, node)?;
        Ok(task_id)
    }

    pub fn add_node(&self, graph_id: &GraphId, node: TaskNode) -> Result<()> {
        if self.index.contains_key(&node.task_id) {
            return Err(TaskGraphError::DuplicateTask(
                node.task_id.to_string(),
                graph_id.to_string(),
            ));
        }
        let mut graph = self
            .graphs
            .get_mut(graph_id)
            .ok_or_else(|| TaskGraphError::UnknownGraph(graph_id.to_string()))?;
        graph.nodes.push(node.task_id.clone());
        let task_id = node.task_id.clone();
        drop(graph);
        self.index.insert(task_id, node);
        self.bump_version();
        Ok(())
    }

    /// Add a sibling-dependency edge `from -> to` within `graph_id`. Rejects
    /// (leaving the graph unchanged) if the edge would create a cycle.
    pub fn add_edge(&self, graph_id: &GraphId, from: &TaskId, to: &TaskId) -> Result<()> {
        {
            let graph = self
                .graphs
                .get(graph_id)
                .ok_or_else(|| TaskGraphError::UnknownGraph(graph_id.to_string()))?;
            if !graph.nodes.contains(from) {
                return Err(TaskGraphError::UnknownTask(from.to_string()));
            }
            if !graph.nodes.contains(to) {
                return Err(TaskGraphError::UnknownTask(to.to_string()));
            }
            if self.reachable(&graph, to, from) {
                return Err(TaskGraphError::Cycle {
                    graph_id: graph_id.to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }
        let mut graph = self.graphs.get_mut(graph_id).unwrap();
        graph.edges.entry(from.clone()).or_default().insert(to.clone());
        drop(graph);
        self.bump_version();
        Ok(())
    }

    /// BFS reachability check used by `add_edge`'s cycle guard: is `to`
    /// reachable from `from` via existing edges?
    fn reachable(&self, graph: &SubGraph, from: &TaskId, to: &TaskId) -> bool {
        if from == to {
            return true;
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(from.clone());
        seen.insert(from.clone());
        while let Some(cur) = queue.pop_front() {
            if let Some(next) = graph.edges.get(&cur) {
                for n in next {
                    if n == to {
                        return true;
                    }
                    if seen.insert(n.clone()) {
                        queue.push_back(n.clone());
                    }
                }
            }
        }
        false
    }

    pub fn get_node(&self, task_id: &TaskId) -> Option<TaskNode> {
        self.index.get(task_id).map(|r| r.clone())
    }

    /// Mutate a node in place. Used only by
    /// [`crate::state_machine::StateTransitionManager`]; everything else
    /// should go through it rather than mutating nodes directly.
    pub fn with_node_mut<F, R>(&self, task_id: &TaskId, f: F) -> Option<R>
    where
        F: FnOnce(&mut TaskNode) -> R,
    {
        let result = self.index.get_mut(task_id).map(|mut r| f(&mut r));
        if result.is_some() {
            self.bump_version();
        }
        result
    }

    pub fn get_nodes_in_graph(&self, graph_id: &GraphId) -> Result<Vec<TaskNode>> {
        let graph = self
            .graphs
            .get(graph_id)
            .ok_or_else(|| TaskGraphError::UnknownGraph(graph_id.to_string()))?;
        Ok(graph
            .nodes
            .iter()
            .filter_map(|id| self.index.get(id).map(|r| r.clone()))
            .collect())
    }

    /// Predecessors of `task_id` within `graph_id`: nodes with an edge into it.
    pub fn predecessors(&self, graph_id: &GraphId, task_id: &TaskId) -> Result<Vec<TaskId>> {
        let graph = self
            .graphs
            .get(graph_id)
            .ok_or_else(|| TaskGraphError::UnknownGraph(graph_id.to_string()))?;
        Ok(graph
            .edges
            .iter()
            .filter_map(|(from, tos)| tos.contains(task_id).then(|| from.clone()))
            .collect())
    }

    /// The graph id that contains `task_id`, if any ("container graph" in the
    /// glossary) — found by scanning sub-graphs for the node id.
    pub fn container_graph(&self, task_id: &TaskId) -> Option<GraphId> {
        for entry in self.graphs.iter() {
            if entry.value().nodes.contains(task_id) {
                return Some(entry.key().clone());
            }
        }
        None
    }

    pub fn root_graph_id(&self) -> Option<GraphId> {
        self.root_graph_id.read().clone()
    }

    pub fn all_node_ids(&self) -> Vec<TaskId> {
        self.index.iter().map(|r| r.key().clone()).collect()
    }

    pub fn graph_exists(&self, graph_id: &GraphId) -> bool {
        self.graphs.contains_key(graph_id)
    }

    /// Remove `graph_id` and, recursively, every sub-graph owned by a node
    /// that lived in it (cascading delete for discarded plans, e.g. replan).
    pub fn remove_graph_and_descendants(&self, graph_id: &GraphId) {
        let node_ids = match self.graphs.get(graph_id) {
            Some(g) => g.nodes.clone(),
            None => return,
        };
        let mut child_graphs = Vec::new();
        for id in &node_ids {
            if let Some(node) = self.index.get(id) {
                if let Some(sub) = &node.sub_graph_id {
                    child_graphs.push(sub.clone());
                }
            }
            self.index.remove(id);
        }
        self.graphs.remove(graph_id);
        for child in child_graphs {
            self.remove_graph_and_descendants(&child);
        }
        self.bump_version();
    }

    /// Kahn's-algorithm topological order of every node across every graph;
    /// isolated nodes (no edges at all) are appended in `(layer, created)`
    /// order, matching the scheduler's tie-break (§4.4).
    pub fn topological_order(&self) -> Vec<TaskId> {
        let mut in_degree: std::collections::HashMap<TaskId, usize> = Default::default();
        let mut adjacency: std::collections::HashMap<TaskId, Vec<TaskId>> = Default::default();
        let all = self.all_node_ids();
        for id in &all {
            in_degree.entry(id.clone()).or_insert(0);
        }
        for graph in self.graphs.iter() {
            for (from, tos) in graph.edges.iter() {
                for to in tos {
                    *in_degree.entry(to.clone()).or_insert(0) += 1;
                    adjacency.entry(from.clone()).or_default().push(to.clone());
                }
            }
        }
        let mut queue: VecDeque<TaskId> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        let mut sorted_queue: Vec<_> = queue.drain(..).collect();
        sorted_queue.sort_by_key(|id| self.sort_key(id));
        let mut queue: VecDeque<TaskId> = sorted_queue.into();

        let mut order = Vec::with_capacity(all.len());
        while let Some(id) = queue.pop_front() {
            order.push(id.clone());
            if let Some(next) = adjacency.get(&id) {
                let mut freed = Vec::new();
                for n in next {
                    let deg = in_degree.get_mut(n).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        freed.push(n.clone());
                    }
                }
                freed.sort_by_key(|id| self.sort_key(id));
                for f in freed {
                    queue.push_back(f);
                }
            }
        }
        order
    }

    fn sort_key(&self, id: &TaskId) -> (usize, chrono::DateTime<chrono::Utc>) {
        self.index
            .get(id)
            .map(|n| (n.layer, n.timestamp_created))
            .unwrap_or((usize::MAX, chrono::Utc::now()))
    }

    /// Snapshot the entire graph for checkpointing.
    pub fn export(&self) -> GraphSnapshot {
        GraphSnapshot {
            graphs: self
                .graphs
                .iter()
                .map(|r| (r.key().clone(), r.value().clone()))
                .collect(),
            nodes: self
                .index
                .iter()
                .map(|r| (r.key().clone(), r.value().clone()))
                .collect(),
            root_graph_id: self.root_graph_id.read().clone(),
            version: self.version(),
        }
    }

    /// Rebuild a `TaskGraph` from a snapshot produced by [`Self::export`].
    pub fn import(snapshot: GraphSnapshot) -> Self {
        let graphs = DashMap::new();
        for (id, sub) in snapshot.graphs {
            graphs.insert(id, sub);
        }
        let index = DashMap::new();
        for (id, node) in snapshot.nodes {
            index.insert(id, node);
        }
        TaskGraph {
            graphs,
            index,
            root_graph_id: RwLock::new(snapshot.root_graph_id),
            version: AtomicU64::new(snapshot.version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_node(id: &str, layer: usize, parent: Option<&str>) -> TaskNode {
        TaskNode::new(
            TaskId::new(id),
            "goal",
            TaskType::Think,
            NodeType::Execute,
            layer,
            parent.map(TaskId::new),
        )
    }

    #[test]
    fn rejects_cyclic_edges_and_leaves_graph_unchanged() {
        let g = TaskGraph::new();
        let gid = GraphId::new("g1");
        g.add_graph(gid.clone(), false).unwrap();
        g.add_node(&gid, mk_node("a", 1, None)).unwrap();
        g.add_node(&gid, mk_node("b", 1, None)).unwrap();
        g.add_edge(&gid, &TaskId::new("a"), &TaskId::new("b")).unwrap();

        let err = g
            .add_edge(&gid, &TaskId::new("b"), &TaskId::new("a"))
            .unwrap_err();
        assert!(matches!(err, TaskGraphError::Cycle { .. }));
        assert_eq!(g.predecessors(&gid, &TaskId::new("a")).unwrap(), vec![]);
    }

    #[test]
    fn remove_graph_and_descendants_cascades() {
        let g = TaskGraph::new();
        let root = GraphId::root();
        g.add_graph(root.clone(), true).unwrap();
        let mut parent = mk_node("root", 0, None);
        let child_graph = GraphId::for_node(&TaskId::new("root"));
        parent.sub_graph_id = Some(child_graph.clone());
        g.add_node(&root, parent).unwrap();
        g.add_graph(child_graph.clone(), false).unwrap();
        g.add_node(&child_graph, mk_node("root.0", 1, Some("root")))
            .unwrap();

        g.remove_graph_and_descendants(&child_graph);
        assert!(!g.graph_exists(&child_graph));
        assert!(g.get_node(&TaskId::new("root.0")).is_none());
        assert!(g.get_node(&TaskId::new("root")).is_some());
    }

    #[test]
    fn topological_order_respects_layer_and_creation_tiebreak() {
        let g = TaskGraph::new();
        let gid = GraphId::new("g1");
        g.add_graph(gid.clone(), false).unwrap();
        g.add_node(&gid, mk_node("a", 0, None)).unwrap();
        g.add_node(&gid, mk_node("b", 1, None)).unwrap();
        g.add_node(&gid, mk_node("c", 1, None)).unwrap();
        g.add_edge(&gid, &TaskId::new("a"), &TaskId::new("b")).unwrap();

        let order = g.topological_order();
        let pos = |id: &str| order.iter().position(|t| t.as_str() == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
    }
}
