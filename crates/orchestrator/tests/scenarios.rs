//! End-to-end scenarios from SPEC_FULL.md §8, driven through the full
//! `ExecutionOrchestrator` loop against a scripted stub adapter (no real LLM
//! calls).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use llm::{AdapterOutput, AgentAction, AgentAdapter, AgentContext, AgentResult, AtomizerOutput, PlanOutput, PlannedSubTask};
use orchestrator::{AgentBlueprint, AgentRegistry, OrchestratorConfig, ExecutionOrchestrator};
use taskgraph_core::{NodeType, TaskNode, TaskStatus, TaskType};

/// A scripted adapter: atomizes and executes however the test wires it up,
/// so each scenario can express exactly the agent behavior the spec's
/// walkthrough describes without a real model in the loop.
struct ScriptedAdapter {
    plan_calls: AtomicUsize,
    execute_calls: AtomicUsize,
    /// `None` means "always atomic" (no planning).
    plan: Option<PlanOutput>,
}

impl ScriptedAdapter {
    fn atomic() -> Self {
        ScriptedAdapter { plan_calls: AtomicUsize::new(0), execute_calls: AtomicUsize::new(0), plan: None }
    }

    fn planning(plan: PlanOutput) -> Self {
        ScriptedAdapter { plan_calls: AtomicUsize::new(0), execute_calls: AtomicUsize::new(0), plan: Some(plan) }
    }
}

#[async_trait]
impl AgentAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn process(&self, _node: &TaskNode, action: AgentAction, _context: &AgentContext) -> llm::Result<AdapterOutput> {
        match action {
            AgentAction::Atomize => Ok(AdapterOutput::Atomizer(AtomizerOutput {
                should_plan: self.plan.is_some(),
                reasoning: None,
            })),
            AgentAction::Plan | AgentAction::ModifyPlan => {
                self.plan_calls.fetch_add(1, Ordering::SeqCst);
                Ok(AdapterOutput::Plan(self.plan.clone().unwrap_or(PlanOutput { sub_tasks: vec![], notes: None })))
            }
            AgentAction::Execute => {
                self.execute_calls.fetch_add(1, Ordering::SeqCst);
                Ok(AdapterOutput::Result(AgentResult { result: json!("OK"), summary: Some("OK".to_string()) }))
            }
            AgentAction::Aggregate => Ok(AdapterOutput::Result(AgentResult {
                result: json!({"aggregated": true}),
                summary: Some("aggregated".to_string()),
            })),
        }
    }
}

fn registry(adapter: ScriptedAdapter) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry.set_default(AgentBlueprint::new("scripted", Arc::new(adapter)));
    registry
}

/// No human reviewer is wired up in these tests, so every checkpoint must
/// auto-approve immediately rather than block for the real HITL timeout.
fn config_no_hitl() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.force_root_node_planning = false;
    config.deadlock_scan_interval = 1_000_000;
    config.hitl_timeout_seconds = 0;
    config.auto_approve_after_timeout = true;
    config
}

#[tokio::test]
async fn leaf_plan_atomic_root_completes_with_single_node() {
    let config = config_no_hitl();
    let orchestrator = ExecutionOrchestrator::new(config, registry(ScriptedAdapter::atomic()));

    let outcome = orchestrator.run("exec-1", "Summarize paper X", 1_000).await;

    assert_eq!(outcome.status, TaskStatus::Done);
    assert_eq!(outcome.result, Some(json!("OK")));
    assert_eq!(outcome.stats.nodes_dispatched, 1);
}

#[tokio::test]
async fn two_level_plan_runs_dependency_before_dependent_then_aggregates() {
    let plan = PlanOutput {
        sub_tasks: vec![
            PlannedSubTask { goal: "A".into(), task_type: TaskType::Think, node_type: NodeType::Execute, depends_on_indices: vec![] },
            PlannedSubTask { goal: "B".into(), task_type: TaskType::Think, node_type: NodeType::Execute, depends_on_indices: vec![0] },
        ],
        notes: None,
    };
    let mut config = config_no_hitl();
    config.force_root_node_planning = true;
    let orchestrator = ExecutionOrchestrator::new(config, registry(ScriptedAdapter::planning(plan)));

    let outcome = orchestrator.run("exec-2", "root goal", 1_000).await;

    assert_eq!(outcome.status, TaskStatus::Done);
    assert_eq!(outcome.result, Some(json!({"aggregated": true})));

    let a = orchestrator.graph.get_node(&taskgraph_core::TaskId::new("root.0")).unwrap();
    let b = orchestrator.graph.get_node(&taskgraph_core::TaskId::new("root.1")).unwrap();
    assert_eq!(a.status, TaskStatus::Done);
    assert_eq!(b.status, TaskStatus::Done);
}

#[tokio::test]
async fn empty_plan_is_treated_as_atomic_with_no_children_created() {
    let mut config = config_no_hitl();
    config.force_root_node_planning = false;
    // Layer 0 must stay below `max_planning_layer - 1` so the atomizer/planner
    // path actually runs and the empty plan it returns exercises the
    // atomic-fallback branch, rather than the depth check forcing execution
    // before the planner is ever consulted.
    config.max_planning_layer = 2;
    let orchestrator = ExecutionOrchestrator::new(config, registry(ScriptedAdapter::planning(PlanOutput { sub_tasks: vec![], notes: None })));

    let outcome = orchestrator.run("exec-3", "atomic after all", 1_000).await;

    assert_eq!(outcome.status, TaskStatus::Done);
    let root = orchestrator.graph.get_node(&taskgraph_core::TaskId::new("root")).unwrap();
    assert!(root.planned_sub_task_ids.is_empty());
    assert!(root.sub_graph_id.is_none());
}
