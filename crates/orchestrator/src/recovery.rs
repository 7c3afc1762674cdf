//! Recovery strategies for node failure, deadlock, and timeout (§4.9).
//! `RetryConfig`'s shape and `classify_error` are grounded on the teacher's
//! `executor/retry.rs`: exponential backoff with jitter, transient/permanent
//! error classification from message content.

use std::sync::Arc;
use std::time::Duration;

use taskgraph_core::{StateTransitionManager, TaskGraph, TaskId, TaskStatus};

use crate::config::OrchestratorConfig;
use crate::deadlock::DeadlockReport;
use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
    Unknown,
}

/// Classify an error message to decide whether a retry is worth attempting.
pub fn classify_error(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429") {
        return ErrorClass::Transient;
    }
    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline exceeded") {
        return ErrorClass::Transient;
    }
    if lower.contains("503") || lower.contains("service unavailable") || lower.contains("502") || lower.contains("500") {
        return ErrorClass::Transient;
    }
    if lower.contains("connection") || lower.contains("network") || lower.contains("dns") {
        return ErrorClass::Transient;
    }
    if lower.contains("401") || lower.contains("unauthorized") || lower.contains("invalid api key") {
        return ErrorClass::Permanent;
    }
    if lower.contains("403") || lower.contains("forbidden") {
        return ErrorClass::Permanent;
    }
    if lower.contains("404") || lower.contains("not found") {
        return ErrorClass::Permanent;
    }
    if lower.contains("400") || lower.contains("bad request") || lower.contains("invalid request") {
        return ErrorClass::Permanent;
    }
    ErrorClass::Unknown
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32)) as u64;
        let delay_ms = delay_ms.min(self.max_backoff_ms);
        let delay_ms = if self.jitter {
            let jitter_amount = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms + jitter_amount
        } else {
            delay_ms
        };
        Duration::from_millis(delay_ms)
    }
}

/// Drives a failed, hung, or deadlocked node back toward progress. Owns no
/// state of its own beyond the retry policy; the graph and transition
/// manager passed in hold the actual truth.
pub struct RecoveryManager {
    config: Arc<OrchestratorConfig>,
    retry: RetryConfig,
    transitions: Arc<StateTransitionManager>,
}

impl RecoveryManager {
    pub fn new(config: Arc<OrchestratorConfig>, transitions: Arc<StateTransitionManager>) -> Self {
        RecoveryManager { config, retry: RetryConfig::default(), transitions }
    }

    /// A `FAILED` node whose error is transient and whose `replan_attempts`
    /// has budget left is retried in place (back to `READY`, no replan).
    /// Permanent errors, or exhausted budget, leave the node `FAILED`.
    pub async fn recover_failed(&self, graph: &TaskGraph, task_id: &TaskId) -> Result<bool> {
        let node = graph
            .get_node(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
        let Some(error) = &node.error else { return Ok(false) };

        let class = classify_error(error);
        if class == ErrorClass::Permanent {
            return Ok(false);
        }
        if node.replan_attempts >= self.config.max_replan_attempts.min(self.retry.max_retries) {
            return Ok(false);
        }

        let delay = self.retry.backoff_delay(node.replan_attempts);
        tokio::time::sleep(delay).await;

        graph.with_node_mut(task_id, |n| {
            n.replan_attempts += 1;
            n.push_retry_history(serde_json::json!({"action": "retry", "attempt": n.replan_attempts, "delay_ms": delay.as_millis()}));
        });

        self.transitions
            .transition(graph, None, task_id, TaskStatus::NeedsReplan, "retrying after transient failure")
            .map_err(OrchestratorError::from)?;
        Ok(true)
    }

    /// A hung `RUNNING` node (single-node-hang pattern) is force-failed so it
    /// becomes eligible for `recover_failed`'s retry path on the next pass.
    pub fn recover_hung(&self, graph: &TaskGraph, task_id: &TaskId) -> Result<()> {
        graph.with_node_mut(task_id, |n| n.error = Some("single-node hang timeout".to_string()));
        self.transitions
            .transition(graph, None, task_id, TaskStatus::Failed, "single-node hang detected")
            .map_err(OrchestratorError::from)
    }

    /// A stuck-aggregation `PLAN_DONE` node is forced into `AGGREGATING`
    /// (§4.9, §8 scenario 3), bypassing the normal all-children-terminal gate
    /// — that gate is exactly what will never clear for a node with a
    /// permanently-blocked child. `AggregateHandler` then builds its bundle
    /// from whatever state each child is actually in: `DONE` results,
    /// `FAILED` errors, and the unresolved content of children still stuck
    /// `PENDING`, so the aggregator can still produce a degraded summary.
    pub fn recover_stuck_aggregation(&self, graph: &TaskGraph, task_id: &TaskId) -> Result<()> {
        graph.with_node_mut(task_id, |n| {
            n.push_retry_history(serde_json::json!({"action": "force_aggregate", "reason": "stuck aggregation"}));
        });
        self.transitions
            .force_transition(graph, None, task_id, TaskStatus::Aggregating, "stuck aggregation: forced partial aggregation")
            .map_err(OrchestratorError::from)
    }

    /// Cycle recovery (§4.9): fail the highest-layer node among the cyclic
    /// set. That node is, by construction, the one furthest from the root —
    /// failing it breaks the cycle while discarding the least completed
    /// work.
    fn recover_cycle(&self, graph: &TaskGraph, cyclic_nodes: &[TaskId]) -> Result<()> {
        let highest = cyclic_nodes
            .iter()
            .filter_map(|id| graph.get_node(id).map(|n| (n.layer, id.clone())))
            .max_by_key(|(layer, _)| *layer);
        let Some((_, task_id)) = highest else { return Ok(()) };
        graph.with_node_mut(&task_id, |n| n.error = Some("broke dependency cycle".to_string()));
        self.transitions
            .transition(graph, None, &task_id, TaskStatus::Failed, "cycle recovery: highest-layer node failed")
            .map_err(OrchestratorError::from)
    }

    /// Parent/child sync-fault recovery (§4.9): a terminal parent left a
    /// child non-terminal, so the child can never see its dependency
    /// resolve. The parent's plan is irrecoverable; the stuck children are
    /// cancelled so the graph can still reach a terminal state.
    fn recover_sync_fault(&self, graph: &TaskGraph, parent_id: &TaskId) -> Result<()> {
        let Some(parent) = graph.get_node(parent_id) else { return Ok(()) };
        for child_id in &parent.planned_sub_task_ids {
            if let Some(child) = graph.get_node(child_id) {
                if !child.is_terminal() {
                    let _ = self.transitions.transition(
                        graph,
                        None,
                        child_id,
                        TaskStatus::Cancelled,
                        "sync fault recovery: parent already terminal",
                    );
                }
            }
        }
        Ok(())
    }

    /// Orphan recovery (§4.9): if the orphan's parent is terminal, the
    /// orphan is safe to release on its own; otherwise (parent missing
    /// entirely) there is no plan left to finish it under, so it is
    /// cancelled.
    fn recover_orphan(&self, graph: &TaskGraph, task_id: &TaskId) -> Result<()> {
        let Some(node) = graph.get_node(task_id) else { return Ok(()) };
        let parent_terminal = node
            .parent_node_id
            .as_ref()
            .and_then(|p| graph.get_node(p))
            .map(|p| p.is_terminal())
            .unwrap_or(false);
        if parent_terminal && node.status == TaskStatus::Pending {
            self.transitions
                .transition(graph, None, task_id, TaskStatus::Ready, "orphan recovery: parent terminal")
                .map_err(OrchestratorError::from)
        } else {
            let _ = self.transitions.transition(
                graph,
                None,
                task_id,
                TaskStatus::Cancelled,
                "orphan recovery: parent unresolvable",
            );
            Ok(())
        }
    }

    /// React to a [`DeadlockReport`]: each pattern gets the pattern-specific
    /// remediation from §4.9. All actions are idempotent and recorded via
    /// ordinary state transitions, so re-running recovery on an
    /// already-repaired graph is a no-op.
    pub fn recover_from_report(&self, graph: &TaskGraph, report: &DeadlockReport) -> Result<()> {
        for id in &report.hung_nodes {
            self.recover_hung(graph, id)?;
        }
        for id in &report.stuck_aggregations {
            self.recover_stuck_aggregation(graph, id)?;
        }
        if !report.cyclic_nodes.is_empty() {
            self.recover_cycle(graph, &report.cyclic_nodes)?;
        }
        for id in &report.sync_faults {
            self.recover_sync_fault(graph, id)?;
        }
        for id in &report.orphaned_nodes {
            self.recover_orphan(graph, id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit_as_transient() {
        assert_eq!(classify_error("HTTP 429 Too Many Requests"), ErrorClass::Transient);
    }

    #[test]
    fn classifies_auth_failure_as_permanent() {
        assert_eq!(classify_error("401 Unauthorized: invalid api key"), ErrorClass::Permanent);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let cfg = RetryConfig { jitter: false, ..RetryConfig::default() };
        assert_eq!(cfg.backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(cfg.backoff_delay(1), Duration::from_millis(2000));
        assert!(cfg.backoff_delay(20) <= Duration::from_millis(cfg.max_backoff_ms));
    }

    fn mk(id: &str, status: TaskStatus, layer: usize) -> taskgraph_core::TaskNode {
        let mut n = taskgraph_core::TaskNode::new(
            TaskId::new(id),
            "g",
            taskgraph_core::TaskType::Think,
            taskgraph_core::NodeType::Execute,
            layer,
            None,
        );
        n.status = status;
        n
    }

    #[test]
    fn cycle_recovery_fails_the_highest_layer_node() {
        let graph = TaskGraph::new();
        let gid = taskgraph_core::GraphId::new("g");
        graph.add_graph(gid.clone(), true).unwrap();
        graph.add_node(&gid, mk("a", TaskStatus::Running, 0)).unwrap();
        graph.add_node(&gid, mk("b", TaskStatus::Running, 1)).unwrap();

        let transitions = Arc::new(StateTransitionManager::new(100, 0.8));
        let mgr = RecoveryManager::new(Arc::new(OrchestratorConfig::default()), transitions);
        let report = DeadlockReport { cyclic_nodes: vec![TaskId::new("a"), TaskId::new("b")], ..Default::default() };

        mgr.recover_from_report(&graph, &report).unwrap();

        assert_eq!(graph.get_node(&TaskId::new("b")).unwrap().status, TaskStatus::Failed);
        assert_eq!(graph.get_node(&TaskId::new("a")).unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn orphan_with_terminal_parent_is_released_to_ready() {
        let graph = TaskGraph::new();
        let gid = taskgraph_core::GraphId::new("g");
        graph.add_graph(gid.clone(), true).unwrap();
        graph.add_node(&gid, mk("parent", TaskStatus::Done, 0)).unwrap();
        let mut orphan = mk("orphan", TaskStatus::Pending, 1);
        orphan.parent_node_id = Some(TaskId::new("parent"));
        graph.add_node(&gid, orphan).unwrap();

        let transitions = Arc::new(StateTransitionManager::new(100, 0.8));
        let mgr = RecoveryManager::new(Arc::new(OrchestratorConfig::default()), transitions);
        let report = DeadlockReport { orphaned_nodes: vec![TaskId::new("orphan")], ..Default::default() };

        mgr.recover_from_report(&graph, &report).unwrap();

        assert_eq!(graph.get_node(&TaskId::new("orphan")).unwrap().status, TaskStatus::Ready);
    }
}
