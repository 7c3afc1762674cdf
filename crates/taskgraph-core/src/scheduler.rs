//! `TaskScheduler`: determines ready-to-run nodes from the graph and its
//! current state (§4.4).

use crate::graph::TaskGraph;
use crate::id::TaskId;
use crate::knowledge_store::KnowledgeStore;
use crate::node::{TaskNode, TaskStatus};
use crate::state_machine::StateTransitionManager;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Caches the last computed set of executable nodes, invalidated whenever the
/// graph's structural version changes.
pub struct TaskScheduler {
    cached_version: AtomicU64,
    cached_ready: RwLock<Vec<TaskId>>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        TaskScheduler {
            cached_version: AtomicU64::new(u64::MAX),
            cached_ready: RwLock::new(Vec::new()),
        }
    }

    /// Transition any `PENDING` node whose guard now holds to `READY`.
    /// Returns the number of nodes transitioned.
    pub fn update_node_readiness(
        &self,
        graph: &TaskGraph,
        transitions: &StateTransitionManager,
        store: Option<&dyn KnowledgeStore>,
    ) -> usize {
        let mut count = 0;
        for id in graph.all_node_ids() {
            let Some(node) = graph.get_node(&id) else {
                continue;
            };
            if node.status != TaskStatus::Pending {
                continue;
            }
            if transitions
                .transition(graph, store, &id, TaskStatus::Ready, "dependencies satisfied")
                .is_ok()
            {
                count += 1;
            }
        }
        if count > 0 {
            debug!(count, "promoted PENDING nodes to READY");
        }
        count
    }

    /// A node is executable iff it is `READY`/`AGGREGATING`, its parent (if
    /// any) is in an eligible status, and every dependency — resolved both via
    /// `depends_on_indices` against the parent's `planned_sub_task_ids` and via
    /// graph predecessors, unioned — is `DONE`.
    pub fn is_executable(&self, graph: &TaskGraph, node: &TaskNode) -> bool {
        if !matches!(node.status, TaskStatus::Ready | TaskStatus::Aggregating) {
            return false;
        }
        if let Some(parent_id) = &node.parent_node_id {
            match graph.get_node(parent_id) {
                Some(parent) => {
                    if !matches!(
                        parent.status,
                        TaskStatus::Running
                            | TaskStatus::PlanDone
                            | TaskStatus::Done
                            | TaskStatus::Aggregating
                    ) {
                        return false;
                    }
                }
                None => return false,
            }
        }

        let mut deps: HashSet<TaskId> = HashSet::new();
        if let (Some(parent_id), false) = (&node.parent_node_id, node.depends_on_indices.is_empty()) {
            if let Some(parent) = graph.get_node(parent_id) {
                for idx in &node.depends_on_indices {
                    if let Some(id) = parent.planned_sub_task_ids.get(*idx) {
                        deps.insert(id.clone());
                    }
                }
            }
        }
        if let Some(graph_id) = graph.container_graph(&node.task_id) {
            if let Ok(preds) = graph.predecessors(&graph_id, &node.task_id) {
                deps.extend(preds);
            }
        }

        deps.iter().all(|dep| {
            graph
                .get_node(dep)
                .map(|n| n.status == TaskStatus::Done)
                .unwrap_or(false)
        })
    }

    /// Executable nodes sorted `(layer ascending, timestamp_created
    /// ascending)`, truncated to `max`. Cached until the graph's version
    /// changes.
    pub fn get_ready_nodes(&self, graph: &TaskGraph, max: usize) -> Vec<TaskNode> {
        let version = graph.version();
        if self.cached_version.load(Ordering::Acquire) != version {
            let mut ready: Vec<TaskNode> = graph
                .all_node_ids()
                .into_iter()
                .filter_map(|id| graph.get_node(&id))
                .filter(|n| self.is_executable(graph, n))
                .collect();
            ready.sort_by(|a, b| {
                a.layer
                    .cmp(&b.layer)
                    .then(a.timestamp_created.cmp(&b.timestamp_created))
            });
            *self.cached_ready.write() = ready.iter().map(|n| n.task_id.clone()).collect();
            self.cached_version.store(version, Ordering::Release);
        }
        self.cached_ready
            .read()
            .iter()
            .filter_map(|id| graph.get_node(id))
            .take(max)
            .collect()
    }

    /// Full topological ordering across every graph (Kahn's algorithm),
    /// delegated to [`TaskGraph::topological_order`].
    pub fn topological_order(&self, graph: &TaskGraph) -> Vec<TaskId> {
        graph.topological_order()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::GraphId;
    use crate::node::{NodeType, TaskNode, TaskType};

    fn mk(id: &str, status: TaskStatus, layer: usize) -> TaskNode {
        let mut n = TaskNode::new(TaskId::new(id), "g", TaskType::Think, NodeType::Execute, layer, None);
        n.status = status;
        n
    }

    #[test]
    fn ready_nodes_sorted_by_layer_then_creation() {
        let graph = TaskGraph::new();
        let gid = GraphId::new("g");
        graph.add_graph(gid.clone(), true).unwrap();
        graph.add_node(&gid, mk("b", TaskStatus::Ready, 1)).unwrap();
        graph.add_node(&gid, mk("a", TaskStatus::Ready, 0)).unwrap();

        let sched = TaskScheduler::new();
        let ready = sched.get_ready_nodes(&graph, 10);
        assert_eq!(ready[0].task_id, TaskId::new("a"));
        assert_eq!(ready[1].task_id, TaskId::new("b"));
    }

    #[test]
    fn zero_max_concurrency_yields_no_nodes_without_spinning() {
        let graph = TaskGraph::new();
        let gid = GraphId::new("g");
        graph.add_graph(gid.clone(), true).unwrap();
        graph.add_node(&gid, mk("a", TaskStatus::Ready, 0)).unwrap();

        let sched = TaskScheduler::new();
        assert!(sched.get_ready_nodes(&graph, 0).is_empty());
    }

    #[test]
    fn dependency_not_done_blocks_readiness() {
        let graph = TaskGraph::new();
        let gid = GraphId::new("g");
        graph.add_graph(gid.clone(), true).unwrap();
        graph.add_node(&gid, mk("a", TaskStatus::Running, 0)).unwrap();
        graph.add_node(&gid, mk("b", TaskStatus::Ready, 0)).unwrap();
        graph
            .add_edge(&gid, &TaskId::new("a"), &TaskId::new("b"))
            .unwrap();

        let sched = TaskScheduler::new();
        let ready = sched.get_ready_nodes(&graph, 10);
        assert!(ready.iter().all(|n| n.task_id != TaskId::new("b")));
    }
}
