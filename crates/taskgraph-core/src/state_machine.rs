//! `StateTransitionManager`: the single source of truth for legal node status
//! transitions (§4.2–4.3 of the specification).

use crate::error::{Result, TaskGraphError};
use crate::graph::TaskGraph;
use crate::id::TaskId;
use crate::knowledge_store::{KnowledgeRecord, KnowledgeStore};
use crate::node::TaskStatus;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One entry in the bounded transition history.
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub task_id: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub reason: String,
    pub at: chrono::DateTime<Utc>,
}

type Hook = Box<dyn Fn(&TaskId, TaskStatus, TaskStatus) + Send + Sync>;

/// Enforces the legal-transition table, runs pre/post hooks, applies terminal
/// side effects, and appends to a bounded history. Every status change in the
/// system funnels through [`StateTransitionManager::transition`].
pub struct StateTransitionManager {
    history: Mutex<VecDeque<TransitionRecord>>,
    history_capacity: usize,
    pre_hooks: RwLock<Vec<Hook>>,
    post_hooks: RwLock<Vec<Hook>>,
    /// In-flight guard against concurrent transitions on the same node
    /// (§5: "concurrent transitions on the same node are not permitted").
    in_flight: Mutex<HashSet<TaskId>>,
    /// Fraction of children that must be DONE (rather than merely terminal)
    /// for the tolerant `PLAN_DONE -> AGGREGATING` gate (§4.3, §9 open
    /// question: tunable, default 0.8).
    pub aggregation_done_threshold: f64,
}

impl StateTransitionManager {
    pub fn new(history_capacity: usize, aggregation_done_threshold: f64) -> Self {
        StateTransitionManager {
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            pre_hooks: RwLock::new(Vec::new()),
            post_hooks: RwLock::new(Vec::new()),
            in_flight: Mutex::new(HashSet::new()),
            aggregation_done_threshold,
        }
    }

    pub fn register_pre_hook<F>(&self, f: F)
    where
        F: Fn(&TaskId, TaskStatus, TaskStatus) + Send + Sync + 'static,
    {
        self.pre_hooks.write().push(Box::new(f));
    }

    pub fn register_post_hook<F>(&self, f: F)
    where
        F: Fn(&TaskId, TaskStatus, TaskStatus) + Send + Sync + 'static,
    {
        self.post_hooks.write().push(Box::new(f));
    }

    pub fn history(&self) -> Vec<TransitionRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// Whether `to_state` is reachable from `from_state` per the authoritative
    /// table in SPEC_FULL.md §4.3, ignoring guard conditions.
    fn is_legal_edge(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (from, to),
            (Pending, Ready)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Ready, Running)
                | (Ready, Failed)
                | (Ready, Cancelled)
                | (Running, Done)
                | (Running, PlanDone)
                | (Running, NeedsReplan)
                | (Running, Failed)
                | (Running, Cancelled)
                | (PlanDone, Aggregating)
                | (PlanDone, NeedsReplan)
                | (Aggregating, Done)
                | (Aggregating, NeedsReplan)
                | (NeedsReplan, Ready)
                | (NeedsReplan, Running)
                | (Done, NeedsReplan)
                | (Failed, NeedsReplan)
        )
    }

    /// Evaluate the guard for `from -> to`, beyond edge legality.
    fn guard_ok(&self, graph: &TaskGraph, task_id: &TaskId, from: TaskStatus, to: TaskStatus) -> std::result::Result<(), String> {
        use TaskStatus::*;
        match (from, to) {
            (Pending, Ready) => {
                let node = graph
                    .get_node(task_id)
                    .ok_or_else(|| "node vanished".to_string())?;
                if let Some(parent_id) = &node.parent_node_id {
                    let parent = graph
                        .get_node(parent_id)
                        .ok_or_else(|| format!("parent '{}' missing", parent_id))?;
                    if !matches!(parent.status, Running | PlanDone | Done | Aggregating) {
                        return Err(format!(
                            "parent '{}' is {:?}, not eligible to release children",
                            parent_id, parent.status
                        ));
                    }
                }
                if let Some(graph_id) = graph.container_graph(task_id) {
                    for pred in graph.predecessors(&graph_id, task_id).unwrap_or_default() {
                        let pred_status = graph.get_node(&pred).map(|n| n.status);
                        if pred_status != Some(Done) {
                            return Err(format!("predecessor '{}' is not DONE", pred));
                        }
                    }
                }
                Ok(())
            }
            (PlanDone, Aggregating) => {
                let node = graph
                    .get_node(task_id)
                    .ok_or_else(|| "node vanished".to_string())?;
                let sub_graph_id = node
                    .sub_graph_id
                    .clone()
                    .ok_or_else(|| "PLAN_DONE node has no sub_graph_id".to_string())?;
                let children = graph.get_nodes_in_graph(&sub_graph_id).unwrap_or_default();
                if children.is_empty() {
                    return Err("sub-graph has no children yet".to_string());
                }
                let all_terminal = children.iter().all(|c| c.is_terminal());
                if !all_terminal {
                    return Err("not every child is terminal".to_string());
                }
                let done = children.iter().filter(|c| c.status == Done).count();
                let ratio = done as f64 / children.len() as f64;
                if ratio < self.aggregation_done_threshold && done + 1 < children.len() {
                    return Err(format!(
                        "only {done}/{} children DONE, below threshold {}",
                        children.len(),
                        self.aggregation_done_threshold
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Drive `task_id` from its current status to `to_state`. Returns
    /// [`TaskGraphError::IllegalTransition`] / `GuardFailed` without mutating
    /// anything on rejection.
    pub fn transition(
        &self,
        graph: &TaskGraph,
        store: Option<&dyn KnowledgeStore>,
        task_id: &TaskId,
        to_state: TaskStatus,
        reason: impl Into<String>,
    ) -> Result<()> {
        self.transition_guarded(graph, store, task_id, to_state, reason, true)
    }

    /// Drive `task_id` to `to_state` without evaluating the guard (edge
    /// legality is still enforced). Reserved for recovery-style overrides
    /// where a recovery action is itself the reason the normal guard would
    /// never pass (§4.9: forcing a stuck `PLAN_DONE` node into `AGGREGATING`
    /// precisely because its children will never all reach `DONE`).
    pub fn force_transition(
        &self,
        graph: &TaskGraph,
        store: Option<&dyn KnowledgeStore>,
        task_id: &TaskId,
        to_state: TaskStatus,
        reason: impl Into<String>,
    ) -> Result<()> {
        self.transition_guarded(graph, store, task_id, to_state, reason, false)
    }

    fn transition_guarded(
        &self,
        graph: &TaskGraph,
        store: Option<&dyn KnowledgeStore>,
        task_id: &TaskId,
        to_state: TaskStatus,
        reason: impl Into<String>,
        enforce_guard: bool,
    ) -> Result<()> {
        let reason = reason.into();
        {
            let mut guard = self.in_flight.lock();
            if !guard.insert(task_id.clone()) {
                return Err(TaskGraphError::ConcurrentTransition(task_id.to_string()));
            }
        }
        let outcome = self.transition_inner(graph, store, task_id, to_state, &reason, enforce_guard);
        self.in_flight.lock().remove(task_id);
        outcome
    }

    fn transition_inner(
        &self,
        graph: &TaskGraph,
        store: Option<&dyn KnowledgeStore>,
        task_id: &TaskId,
        to_state: TaskStatus,
        reason: &str,
        enforce_guard: bool,
    ) -> Result<()> {
        let current = graph
            .get_node(task_id)
            .ok_or_else(|| TaskGraphError::UnknownTask(task_id.to_string()))?
            .status;

        if !Self::is_legal_edge(current, to_state) {
            warn!(%task_id, ?current, ?to_state, "rejected illegal transition");
            return Err(TaskGraphError::IllegalTransition {
                task_id: task_id.to_string(),
                from: current,
                to: to_state,
            });
        }
        if enforce_guard {
            if let Err(why) = self.guard_ok(graph, task_id, current, to_state) {
                debug!(%task_id, ?current, ?to_state, %why, "transition guard not satisfied");
                return Err(TaskGraphError::GuardFailed {
                    task_id: task_id.to_string(),
                    from: current,
                    to: to_state,
                    reason: why,
                });
            }
        }

        for hook in self.pre_hooks.read().iter() {
            hook(task_id, current, to_state);
        }

        graph.with_node_mut(task_id, |node| {
            node.status = to_state;
            node.timestamp_updated = Utc::now();
            if to_state == TaskStatus::Done {
                node.replan_attempts = 0;
            }
            if to_state.is_terminal() {
                node.timestamp_completed = Some(Utc::now());
            }
        });

        if let Some(store) = store {
            if let Some(node) = graph.get_node(task_id) {
                let record = KnowledgeRecord::from(&node);
                store.put(record);
            }
        }

        for hook in self.post_hooks.read().iter() {
            hook(task_id, current, to_state);
        }

        {
            let mut history = self.history.lock();
            if history.len() >= self.history_capacity {
                history.pop_front();
            }
            history.push_back(TransitionRecord {
                task_id: task_id.clone(),
                from: current,
                to: to_state,
                reason: reason.to_string(),
                at: Utc::now(),
            });
        }

        info!(%task_id, ?current, ?to_state, %reason, "transitioned");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::GraphId;
    use crate::node::{NodeType, TaskNode, TaskType};

    fn mk_node(id: &str, status: TaskStatus) -> TaskNode {
        let mut n = TaskNode::new(TaskId::new(id), "goal", TaskType::Think, NodeType::Execute, 0, None);
        n.status = status;
        n
    }

    #[test]
    fn rejects_direct_pending_to_done() {
        let graph = TaskGraph::new();
        let gid = GraphId::new("g");
        graph.add_graph(gid.clone(), true).unwrap();
        graph.add_node(&gid, mk_node("a", TaskStatus::Pending)).unwrap();

        let mgr = StateTransitionManager::new(100, 0.8);
        let err = mgr
            .transition(&graph, None, &TaskId::new("a"), TaskStatus::Done, "bad")
            .unwrap_err();
        assert!(matches!(err, TaskGraphError::IllegalTransition { .. }));
    }

    #[test]
    fn applying_a_legal_transition_twice_is_rejected_the_second_time() {
        let graph = TaskGraph::new();
        let gid = GraphId::new("g");
        graph.add_graph(gid.clone(), true).unwrap();
        graph.add_node(&gid, mk_node("a", TaskStatus::Ready)).unwrap();

        let mgr = StateTransitionManager::new(100, 0.8);
        mgr.transition(&graph, None, &TaskId::new("a"), TaskStatus::Running, "go")
            .unwrap();
        assert_eq!(
            graph.get_node(&TaskId::new("a")).unwrap().status,
            TaskStatus::Running
        );
        let err = mgr
            .transition(&graph, None, &TaskId::new("a"), TaskStatus::Running, "again")
            .unwrap_err();
        assert!(matches!(err, TaskGraphError::IllegalTransition { .. }));
    }

    #[test]
    fn pending_to_ready_requires_predecessors_done() {
        let graph = TaskGraph::new();
        let gid = GraphId::new("g");
        graph.add_graph(gid.clone(), true).unwrap();
        graph.add_node(&gid, mk_node("a", TaskStatus::Running)).unwrap();
        graph.add_node(&gid, mk_node("b", TaskStatus::Pending)).unwrap();
        graph
            .add_edge(&gid, &TaskId::new("a"), &TaskId::new("b"))
            .unwrap();

        let mgr = StateTransitionManager::new(100, 0.8);
        let err = mgr
            .transition(&graph, None, &TaskId::new("b"), TaskStatus::Ready, "too soon")
            .unwrap_err();
        assert!(matches!(err, TaskGraphError::GuardFailed { .. }));

        mgr.transition(&graph, None, &TaskId::new("a"), TaskStatus::Done, "finish")
            .unwrap();
        mgr.transition(&graph, None, &TaskId::new("b"), TaskStatus::Ready, "now")
            .unwrap();
    }
}
