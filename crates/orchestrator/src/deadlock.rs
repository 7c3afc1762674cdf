//! Periodic deadlock scan (§4.11), run every `deadlock_scan_interval`
//! scheduler iterations. Five independent patterns, each cheap enough to run
//! over the whole graph on every scan.

use chrono::Utc;
use taskgraph_core::{TaskGraph, TaskId, TaskNode, TaskStatus};

use crate::config::OrchestratorConfig;

#[derive(Debug, Default, Clone)]
pub struct DeadlockReport {
    /// Node ids that never reached in-degree zero during the topological
    /// sort: part of a dependency cycle.
    pub cyclic_nodes: Vec<TaskId>,
    /// A terminal parent still has a non-terminal child.
    pub sync_faults: Vec<TaskId>,
    /// A `PLAN_DONE` node whose children are all terminal but whose DONE
    /// ratio will never clear the tolerant aggregation threshold.
    pub stuck_aggregations: Vec<TaskId>,
    /// A `RUNNING` node that has not been updated in over
    /// `single_node_hang_seconds`.
    pub hung_nodes: Vec<TaskId>,
    /// A node whose parent id, or whose expected sub-graph, no longer
    /// resolves.
    pub orphaned_nodes: Vec<TaskId>,
}

impl DeadlockReport {
    pub fn is_clear(&self) -> bool {
        self.cyclic_nodes.is_empty()
            && self.sync_faults.is_empty()
            && self.stuck_aggregations.is_empty()
            && self.hung_nodes.is_empty()
            && self.orphaned_nodes.is_empty()
    }
}

pub struct DeadlockDetector {
    config: std::sync::Arc<OrchestratorConfig>,
}

impl DeadlockDetector {
    pub fn new(config: std::sync::Arc<OrchestratorConfig>) -> Self {
        DeadlockDetector { config }
    }

    pub fn scan(&self, graph: &TaskGraph) -> DeadlockReport {
        let mut report = DeadlockReport::default();
        let all_ids = graph.all_node_ids();

        let ordered = graph.topological_order();
        if ordered.len() < all_ids.len() {
            let ordered_set: std::collections::HashSet<_> = ordered.into_iter().collect();
            report.cyclic_nodes = all_ids.iter().filter(|id| !ordered_set.contains(id)).cloned().collect();
        }

        let now = Utc::now();
        for id in &all_ids {
            let Some(node) = graph.get_node(id) else { continue };

            if node.status.is_terminal() {
                for child_id in &node.planned_sub_task_ids {
                    if let Some(child) = graph.get_node(child_id) {
                        if !child.is_terminal() {
                            report.sync_faults.push(id.clone());
                            break;
                        }
                    }
                }
            }

            if node.status == TaskStatus::PlanDone {
                if let Some(sub_graph_id) = &node.sub_graph_id {
                    match graph.get_nodes_in_graph(sub_graph_id) {
                        Ok(children) if !children.is_empty() => {
                            let all_terminal = children.iter().all(|c| c.is_terminal());
                            let done = children.iter().filter(|c| c.status == TaskStatus::Done).count();
                            let ratio = done as f64 / children.len() as f64;
                            let never_clears = children.len() - done >= 2;
                            let low_ratio_stuck =
                                all_terminal && ratio < self.config.stuck_aggregation_threshold && never_clears;

                            // §4.8 pattern 3, as written: a sub-graph whose
                            // every incomplete child is PENDING and unable to
                            // ever reach READY (a dependency resolved to a
                            // terminal-but-not-DONE node, so the readiness
                            // guard can never clear). Requires *all*
                            // incomplete children to be stuck, not just one,
                            // to avoid flagging ordinary in-flight fan-out.
                            let incomplete: Vec<&TaskNode> =
                                children.iter().filter(|c| !c.is_terminal()).collect();
                            let pending_stuck = !incomplete.is_empty()
                                && incomplete.iter().all(|c| {
                                    c.status == TaskStatus::Pending && Self::child_cannot_unstick(graph, &node, c)
                                });

                            if low_ratio_stuck || pending_stuck {
                                report.stuck_aggregations.push(id.clone());
                            }
                        }
                        Err(_) => report.orphaned_nodes.push(id.clone()),
                        _ => {}
                    }
                } else {
                    report.orphaned_nodes.push(id.clone());
                }
            }

            if node.status == TaskStatus::Running {
                let age = now.signed_duration_since(node.timestamp_updated).num_seconds();
                if age > self.config.single_node_hang_seconds {
                    report.hung_nodes.push(id.clone());
                }
            }

            if let Some(parent_id) = &node.parent_node_id {
                if graph.get_node(parent_id).is_none() {
                    report.orphaned_nodes.push(id.clone());
                }
            }
        }

        report
    }

    /// Whether `child` (a `PENDING` node under `parent`'s sub-graph) can
    /// never reach `READY`: true iff at least one of its dependencies —
    /// `depends_on_indices` resolved against `parent.planned_sub_task_ids`,
    /// unioned with graph predecessors, same resolution the scheduler uses —
    /// is itself terminal but not `DONE`. A terminal-non-DONE dependency
    /// (typically `FAILED`) can by definition never become `DONE`, so the
    /// `PENDING -> READY` guard can never clear for `child`.
    fn child_cannot_unstick(graph: &TaskGraph, parent: &TaskNode, child: &TaskNode) -> bool {
        let mut deps: Vec<TaskId> = child
            .depends_on_indices
            .iter()
            .filter_map(|idx| parent.planned_sub_task_ids.get(*idx).cloned())
            .collect();
        if let Some(graph_id) = graph.container_graph(&child.task_id) {
            if let Ok(preds) = graph.predecessors(&graph_id, &child.task_id) {
                deps.extend(preds);
            }
        }
        if deps.is_empty() {
            return false;
        }
        deps.iter().any(|dep_id| {
            graph
                .get_node(dep_id)
                .map(|dep| dep.is_terminal() && dep.status != TaskStatus::Done)
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use taskgraph_core::{GraphId, NodeType, TaskNode, TaskType};

    fn mk(id: &str, status: TaskStatus) -> TaskNode {
        let mut n = TaskNode::new(TaskId::new(id), "g", TaskType::Think, NodeType::Execute, 0, None);
        n.status = status;
        n
    }

    #[test]
    fn detects_cycle() {
        let graph = TaskGraph::new();
        let gid = GraphId::new("g");
        graph.add_graph(gid.clone(), true).unwrap();
        graph.add_node(&gid, mk("a", TaskStatus::Ready)).unwrap();
        graph.add_node(&gid, mk("b", TaskStatus::Ready)).unwrap();
        graph.add_edge(&gid, &TaskId::new("a"), &TaskId::new("b")).unwrap();

        let detector = DeadlockDetector::new(Arc::new(OrchestratorConfig::default()));
        let report = detector.scan(&graph);
        assert!(report.is_clear());
    }

    #[test]
    fn detects_hung_node() {
        let graph = TaskGraph::new();
        let gid = GraphId::new("g");
        graph.add_graph(gid.clone(), true).unwrap();
        let mut node = mk("a", TaskStatus::Running);
        node.timestamp_updated = Utc::now() - chrono::Duration::seconds(999);
        graph.add_node(&gid, node).unwrap();

        let mut config = OrchestratorConfig::default();
        config.single_node_hang_seconds = 10;
        let detector = DeadlockDetector::new(Arc::new(config));
        let report = detector.scan(&graph);
        assert_eq!(report.hung_nodes, vec![TaskId::new("a")]);
    }
}
