//! `ExecutionOrchestrator`: the top-level loop (§4.11). Repeatedly promotes
//! ready nodes, dispatches them under a dynamic concurrency semaphore, scans
//! for deadlocks on an interval, and terminates when the root node reaches a
//! terminal status.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use taskgraph_core::{StateTransitionManager, TaskGraph, TaskId, TaskScheduler, TaskStatus};
use taskgraph_checkpoint::InMemoryKnowledgeStore;

use crate::blueprint::AgentRegistry;
use crate::config::OrchestratorConfig;
use crate::deadlock::DeadlockDetector;
use crate::error::{OrchestratorError, Result};
use crate::hitl::HitlService;
use crate::node_processor::NodeProcessor;
use crate::recovery::RecoveryManager;

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct ExecutionStats {
    pub iterations: u64,
    pub nodes_dispatched: u64,
    pub nodes_failed: u64,
    pub deadlock_scans: u64,
    pub rate_limit_backoffs: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionOutcome {
    pub execution_id: String,
    pub status: TaskStatus,
    pub stats: ExecutionStats,
    pub result: Option<Value>,
    pub summary: Option<String>,
    pub error: Option<String>,
}

/// Owns everything one execution needs: the graph, the shared services, and
/// the dynamic concurrency limiter described in §4.11 (halve on rate-limit,
/// grow by one after 60s of quiet, floor at `max/4`).
pub struct ExecutionOrchestrator {
    pub graph: Arc<TaskGraph>,
    config: Arc<OrchestratorConfig>,
    transitions: Arc<StateTransitionManager>,
    scheduler: Arc<TaskScheduler>,
    knowledge: Arc<InMemoryKnowledgeStore>,
    processor: Arc<NodeProcessor>,
    recovery: Arc<RecoveryManager>,
    deadlock: Arc<DeadlockDetector>,
    current_concurrency: AtomicUsize,
    semaphore: Arc<Semaphore>,
    last_backoff: std::sync::Mutex<Option<Instant>>,
}

impl ExecutionOrchestrator {
    pub fn new(config: OrchestratorConfig, registry: AgentRegistry) -> Self {
        let config = Arc::new(config);
        let transitions = Arc::new(StateTransitionManager::new(1000, config.stuck_aggregation_threshold));
        let scheduler = Arc::new(TaskScheduler::new());
        let knowledge = Arc::new(InMemoryKnowledgeStore::new());
        let hitl = Arc::new(HitlService::new(config.clone()));
        let registry = Arc::new(registry);
        let processor = Arc::new(NodeProcessor::new(
            config.clone(),
            registry,
            transitions.clone(),
            knowledge.clone(),
            hitl,
        ));
        let recovery = Arc::new(RecoveryManager::new(config.clone(), transitions.clone()));
        let deadlock = Arc::new(DeadlockDetector::new(config.clone()));

        ExecutionOrchestrator {
            graph: Arc::new(TaskGraph::new()),
            current_concurrency: AtomicUsize::new(config.max_concurrent_nodes),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_nodes)),
            config,
            transitions,
            scheduler,
            knowledge,
            processor,
            recovery,
            deadlock,
            last_backoff: std::sync::Mutex::new(None),
        }
    }

    /// Run a fresh execution starting from `root_goal`. Returns once the
    /// synthetic root node reaches a terminal status, `max_steps` loop
    /// iterations elapse, or the loop has made no progress for 60s with no
    /// `RUNNING` node left to wait on (§4.11's `execute(root_goal,
    /// max_steps)` entry point).
    pub async fn run(
        &self,
        execution_id: impl Into<String>,
        root_goal: impl Into<String>,
        max_steps: u64,
    ) -> ExecutionOutcome {
        let execution_id = execution_id.into();
        let root_id = match self.graph.init_root(root_goal) {
            Ok(id) => id,
            Err(e) => {
                return ExecutionOutcome {
                    execution_id,
                    status: TaskStatus::Failed,
                    stats: ExecutionStats::default(),
                    result: None,
                    summary: None,
                    error: Some(e.to_string()),
                };
            }
        };

        let stats = self.drive(&root_id, max_steps).await;
        let root = self.graph.get_node(&root_id);
        let (status, result, summary, error) = match root {
            Some(node) if node.status.is_terminal() => (node.status, node.result, node.output_summary, node.error),
            Some(node) => (
                node.status,
                node.result,
                node.output_summary,
                node.error.or(Some("execution aborted before reaching a terminal status".to_string())),
            ),
            None => (TaskStatus::Failed, None, None, Some("root node vanished".to_string())),
        };

        ExecutionOutcome { execution_id, status, stats, result, summary, error }
    }

    /// Wall-clock quiet period (§4.11) after which the loop gives up if
    /// nothing is running and no progress has been made.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    async fn drive(&self, root_id: &TaskId, max_steps: u64) -> ExecutionStats {
        let mut stats = ExecutionStats::default();
        let semaphore = self.semaphore.clone();
        let mut since_last_scan: u64 = 0;
        let mut last_activity = Instant::now();

        loop {
            stats.iterations += 1;
            if stats.iterations > max_steps {
                tracing::warn!(max_steps, "execution aborted: max_steps exceeded");
                break;
            }

            if let Some(root) = self.graph.get_node(root_id) {
                if root.status.is_terminal() {
                    break;
                }
            } else {
                break;
            }

            let promoted =
                self.scheduler.update_node_readiness(&self.graph, &self.transitions, Some(self.knowledge.as_ref()));
            let aggregated = self.try_promote_plan_done_nodes();
            if promoted > 0 || aggregated > 0 {
                last_activity = Instant::now();
            }

            since_last_scan += 1;
            if since_last_scan >= self.config.deadlock_scan_interval {
                since_last_scan = 0;
                stats.deadlock_scans += 1;
                let report = self.deadlock.scan(&self.graph);
                if !report.is_clear() {
                    match self.recovery.recover_from_report(&self.graph, &report) {
                        Ok(()) => last_activity = Instant::now(),
                        Err(e) => {
                            tracing::error!(error = %e, "unrecoverable deadlock");
                            self.graph.with_node_mut(root_id, |n| n.error = Some(e.to_string()));
                            let _ = self.transitions.transition(&self.graph, None, root_id, TaskStatus::Failed, "unrecoverable deadlock");
                            break;
                        }
                    }
                }
            }

            let ready = self.scheduler.get_ready_nodes(&self.graph, self.current_concurrency.load(Ordering::Acquire));
            if ready.is_empty() {
                self.recover_failed_nodes().await;
                let any_running = self
                    .graph
                    .all_node_ids()
                    .iter()
                    .any(|id| matches!(self.graph.get_node(id).map(|n| n.status), Some(TaskStatus::Running)));
                if !any_running && last_activity.elapsed() >= Self::IDLE_TIMEOUT {
                    tracing::warn!("execution aborted: no activity for 60s and no RUNNING nodes");
                    break;
                }
                sleep(Duration::from_millis(25)).await;
                continue;
            }

            last_activity = Instant::now();
            let mut handles = Vec::with_capacity(ready.len());
            for node in ready {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                let processor = self.processor.clone();
                let graph = self.graph.clone();
                let task_id = node.task_id.clone();
                handles.push(tokio::spawn(async move {
                    let outcome = processor.process(&graph, &task_id).await;
                    drop(permit);
                    outcome
                }));
            }

            for handle in handles {
                stats.nodes_dispatched += 1;
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        stats.nodes_failed += 1;
                        if matches!(&e, OrchestratorError::Agent(le) if le.is_retryable()) {
                            self.on_rate_limit();
                            stats.rate_limit_backoffs += 1;
                        }
                        tracing::warn!(error = %e, "node processing failed");
                    }
                    Err(join_err) => {
                        stats.nodes_failed += 1;
                        tracing::error!(error = %join_err, "node processing task panicked");
                    }
                }
            }

            self.maybe_grow_concurrency();
        }

        stats
    }

    /// `PLAN_DONE -> AGGREGATING` is not part of the scheduler's readiness
    /// sweep (it isn't gated by dependencies, only by the aggregation
    /// guard), so the loop attempts it directly every iteration. Returns how
    /// many nodes were promoted, so the caller can count it as progress.
    fn try_promote_plan_done_nodes(&self) -> usize {
        let mut promoted = 0;
        for id in self.graph.all_node_ids() {
            let Some(node) = self.graph.get_node(&id) else { continue };
            if node.status == TaskStatus::PlanDone {
                if self
                    .transitions
                    .transition(
                        &self.graph,
                        Some(self.knowledge.as_ref()),
                        &id,
                        TaskStatus::Aggregating,
                        "children satisfied aggregation gate",
                    )
                    .is_ok()
                {
                    promoted += 1;
                }
            }
        }
        promoted
    }

    async fn recover_failed_nodes(&self) {
        for id in self.graph.all_node_ids() {
            let Some(node) = self.graph.get_node(&id) else { continue };
            if node.status == TaskStatus::Failed {
                let _ = self.recovery.recover_failed(&self.graph, &id).await;
            }
        }
    }

    /// Rate-limit backoff (§4.11): halve concurrency, floor at `max/4`.
    ///
    /// The semaphore's nominal size is adjusted in lockstep by forgetting the
    /// delta in permits, so the running dispatch loop actually respects the
    /// new ceiling rather than just changing a counter nothing reads.
    fn on_rate_limit(&self) {
        let floor = self.config.min_concurrency_floor();
        let current = self.current_concurrency.load(Ordering::Acquire);
        let next = (current / 2).max(floor);
        if next < current {
            self.semaphore.forget_permits(current - next);
            self.current_concurrency.store(next, Ordering::Release);
        }
        *self.last_backoff.lock().unwrap() = Some(Instant::now());
        tracing::warn!(from = current, to = next, "rate limit backoff: reducing concurrency");
    }

    /// After 60s with no rate-limit backoff, grow concurrency by one node up
    /// to the configured ceiling (§4.11).
    fn maybe_grow_concurrency(&self) {
        let last = *self.last_backoff.lock().unwrap();
        let quiet_long_enough = match last {
            Some(at) => at.elapsed() >= Duration::from_secs(60),
            None => true,
        };
        if !quiet_long_enough {
            return;
        }
        let current = self.current_concurrency.load(Ordering::Acquire);
        if current < self.config.max_concurrent_nodes {
            self.semaphore.add_permits(1);
            self.current_concurrency.store(current + 1, Ordering::Release);
            if last.is_some() {
                *self.last_backoff.lock().unwrap() = Some(Instant::now());
            }
        }
    }
}
