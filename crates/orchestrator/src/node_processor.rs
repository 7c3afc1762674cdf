//! Per-status dispatch for a single node (§4.5). [`NodeProcessor::process`]
//! is the one entry point the [`crate::execution::ExecutionOrchestrator`]
//! calls per dispatched node; internally it routes to a [`Handler`] keyed on
//! the node's current `TaskStatus`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use taskgraph_core::{GraphId, NodeType, TaskGraph, TaskId, TaskNode, TaskStatus, TaskType};
use taskgraph_checkpoint::InMemoryKnowledgeStore;

use llm::{AgentAction, AgentContext};

use crate::blueprint::AgentRegistry;
use crate::config::OrchestratorConfig;
use crate::context_builder::ContextBuilder;
use crate::error::{OrchestratorError, Result};
use crate::hitl::{Checkpoint, HitlService, ReviewResult};

use taskgraph_core::StateTransitionManager;

/// A handler owns the behavior for nodes currently in one status.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &NodeProcessor, graph: &TaskGraph, task_id: &TaskId) -> Result<()>;
}

pub struct NodeProcessor {
    pub config: Arc<OrchestratorConfig>,
    pub registry: Arc<AgentRegistry>,
    pub transitions: Arc<StateTransitionManager>,
    pub knowledge: Arc<InMemoryKnowledgeStore>,
    pub hitl: Arc<HitlService>,
    ready_handler: ReadyHandler,
    aggregate_handler: AggregateHandler,
    replan_handler: ReplanHandler,
}

impl NodeProcessor {
    pub fn new(
        config: Arc<OrchestratorConfig>,
        registry: Arc<AgentRegistry>,
        transitions: Arc<StateTransitionManager>,
        knowledge: Arc<InMemoryKnowledgeStore>,
        hitl: Arc<HitlService>,
    ) -> Self {
        NodeProcessor {
            config,
            registry,
            transitions,
            knowledge,
            hitl,
            ready_handler: ReadyHandler,
            aggregate_handler: AggregateHandler,
            replan_handler: ReplanHandler,
        }
    }

    /// Dispatch `task_id` to the handler for its current status. Called once
    /// per scheduler-selected node; the handler is responsible for driving
    /// the node to its next status (or leaving it for a later dispatch, as
    /// `NEEDS_REPLAN` handling does while awaiting HITL).
    pub async fn process(&self, graph: &TaskGraph, task_id: &TaskId) -> Result<()> {
        let node = graph
            .get_node(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;

        match node.status {
            TaskStatus::Ready => self.ready_handler.handle(self, graph, task_id).await,
            TaskStatus::Aggregating => self.aggregate_handler.handle(self, graph, task_id).await,
            TaskStatus::NeedsReplan => self.replan_handler.handle(self, graph, task_id).await,
            other => Err(OrchestratorError::General(format!(
                "node {task_id} in status {other:?} is not dispatchable"
            ))),
        }
    }

    fn build_context(&self, graph: &TaskGraph, node: &TaskNode) -> AgentContext {
        let built = ContextBuilder::new(&self.config).build(graph, node);
        AgentContext::new(built.formatted)
    }

    fn build_aggregation_context(&self, graph: &TaskGraph, node: &TaskNode) -> AgentContext {
        let built = ContextBuilder::new(&self.config).build_aggregation(graph, node);
        AgentContext::new(built.formatted)
    }

    async fn maybe_review(&self, node: &TaskNode, checkpoint: Checkpoint, payload: serde_json::Value) -> Result<ReviewResult> {
        self.hitl.request_review(node.task_id.clone(), checkpoint, payload).await
    }

    /// Invoke the adapter bounded by `node_execution_timeout_seconds` (§5).
    /// A node that exceeds it surfaces the same way a provider-side timeout
    /// would: an `LlmError::Timeout`, which the caller's existing
    /// FAILED/retry handling already knows how to classify.
    async fn call_adapter(
        &self,
        blueprint: &crate::blueprint::AgentBlueprint,
        node: &TaskNode,
        action: AgentAction,
        context: &AgentContext,
    ) -> llm::Result<llm::AdapterOutput> {
        let budget = std::time::Duration::from_secs(self.config.node_execution_timeout_seconds);
        match tokio::time::timeout(budget, blueprint.adapter.process(node, action, context)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(llm::LlmError::Timeout(format!(
                "node {} exceeded node_execution_timeout_seconds={}s during {action:?}",
                node.task_id, self.config.node_execution_timeout_seconds
            ))),
        }
    }

    /// The executor half of the `READY` path (§4.5): run `BeforeExecution`
    /// HITL, invoke the adapter's `execute` action, and land the node on
    /// `DONE`/`FAILED`. Shared by the "not atomic" branch and by the "planner
    /// returned an empty plan" fallback (§8: an empty plan is "atomic after
    /// all").
    async fn run_executor(
        &self,
        graph: &TaskGraph,
        task_id: &TaskId,
        node: &TaskNode,
        blueprint: &crate::blueprint::AgentBlueprint,
        agent_context: &AgentContext,
    ) -> Result<()> {
        let review = self
            .maybe_review(node, Checkpoint::BeforeExecution, json!({"goal": node.goal}))
            .await?;
        if let Some(err) = self.handle_terminal_review(graph, task_id, &review)? {
            return Err(err);
        }

        let outcome = self.call_adapter(blueprint, node, AgentAction::Execute, agent_context).await;

        graph.with_node_mut(task_id, |n| n.agent_name = Some(blueprint.adapter.name().to_string()));

        match outcome {
            Ok(llm::AdapterOutput::Result(r)) => {
                graph.with_node_mut(task_id, |n| {
                    n.result = Some(r.result);
                    n.output_summary = r.summary;
                });
                self.transitions
                    .transition(graph, Some(self.knowledge.as_ref()), task_id, TaskStatus::Done, "executed")
                    .map_err(OrchestratorError::from)
            }
            Ok(_) => Err(OrchestratorError::General(format!("adapter returned non-result output for {task_id}"))),
            Err(e) => {
                graph.with_node_mut(task_id, |n| n.error = Some(e.to_string()));
                self.transitions
                    .transition(graph, Some(self.knowledge.as_ref()), task_id, TaskStatus::Failed, e.to_string())
                    .map_err(OrchestratorError::from)?;
                Err(OrchestratorError::from(e))
            }
        }
    }

    /// `Rejected` fails the node, `Aborted` cancels it; both return
    /// `Some(err)` for the caller to propagate. `Approved` and
    /// `RequestModification` return `None` (the caller decides how to act on
    /// a modification request; only `PlanGeneration` does anything with it).
    fn handle_terminal_review(
        &self,
        graph: &TaskGraph,
        task_id: &TaskId,
        review: &ReviewResult,
    ) -> Result<Option<OrchestratorError>> {
        match review {
            ReviewResult::Rejected { reason } => {
                self.transitions
                    .transition(graph, Some(self.knowledge.as_ref()), task_id, TaskStatus::Failed, reason.clone())
                    .map_err(OrchestratorError::from)?;
                Ok(Some(OrchestratorError::HitlRejected(reason.clone())))
            }
            ReviewResult::Aborted => {
                self.transitions
                    .transition(graph, Some(self.knowledge.as_ref()), task_id, TaskStatus::Cancelled, "HITL review aborted")
                    .map_err(OrchestratorError::from)?;
                Ok(Some(OrchestratorError::HitlRejected("review aborted".to_string())))
            }
            _ => Ok(None),
        }
    }
}

/// Handles `READY` nodes: atomize (unless forced), then either plan
/// (spawning children and transitioning to `PLAN_DONE`) or execute
/// (transitioning to `DONE`/`FAILED`).
struct ReadyHandler;

#[async_trait]
impl Handler for ReadyHandler {
    async fn handle(&self, ctx: &NodeProcessor, graph: &TaskGraph, task_id: &TaskId) -> Result<()> {
        let node = graph
            .get_node(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;

        ctx.transitions
            .transition(graph, Some(ctx.knowledge.as_ref()), task_id, TaskStatus::Running, "dispatched")
            .map_err(OrchestratorError::from)?;

        let blueprint = ctx.registry.resolve(&node)?;
        let agent_context = ctx.build_context(graph, &node);

        let is_root = node.parent_node_id.is_none();
        let force_planning = is_root && ctx.config.force_root_node_planning;
        // §4.5 step 1 forces EXECUTE (and skips atomization) at
        // `layer >= max_planning_layer`; step 2 additionally forces the
        // executor path one layer earlier, at `layer == max_planning_layer -
        // 1`, because planning there would produce children that exceed the
        // limit. The second bound is strictly earlier (or equal, for
        // `max_planning_layer == 0`), so a single `layer >=
        // max_planning_layer - 1` check implements both.
        let depth_forces_execution = node.layer >= ctx.config.max_planning_layer.saturating_sub(1);

        let should_plan = if force_planning {
            true
        } else if depth_forces_execution || node.node_type == NodeType::Execute {
            false
        } else {
            let verdict = ctx
                .call_adapter(blueprint, &node, AgentAction::Atomize, &agent_context)
                .await
                .map_err(OrchestratorError::from)?;
            match verdict {
                llm::AdapterOutput::Atomizer(a) => a.should_plan,
                _ => false,
            }
        };

        if should_plan {
            let plan = ctx
                .call_adapter(blueprint, &node, AgentAction::Plan, &agent_context)
                .await
                .map_err(OrchestratorError::from)?;
            let mut plan = match plan {
                llm::AdapterOutput::Plan(p) => p,
                _ => return Err(OrchestratorError::General(format!("adapter returned non-plan output for {task_id}"))),
            };

            let review = ctx
                .maybe_review(&node, Checkpoint::PlanGeneration, json!({"goal": node.goal, "sub_tasks": plan.sub_tasks}))
                .await?;
            if let Some(err) = ctx.handle_terminal_review(graph, task_id, &review)? {
                return Err(err);
            }

            // §8 scenario 6: a `request_modification` verdict routes the
            // plan through the `PlanModifier` adapter and a second HITL
            // round, all before the node leaves `RUNNING` -- so
            // `replan_attempts` is never touched by a user-initiated
            // modification.
            if let ReviewResult::RequestModification { instructions } = &review {
                let modifier_context = AgentContext {
                    formatted_context: agent_context.formatted_context.clone(),
                    extra: json!({"original_plan": plan, "modification_instructions": instructions}),
                };
                let modified = ctx
                    .call_adapter(blueprint, &node, AgentAction::ModifyPlan, &modifier_context)
                    .await
                    .map_err(OrchestratorError::from)?;
                let modified = match modified {
                    llm::AdapterOutput::Plan(p) => p,
                    _ => return Err(OrchestratorError::General(format!("adapter returned non-plan output for {task_id}"))),
                };

                let review2 = ctx
                    .maybe_review(&node, Checkpoint::PlanModification, json!({"instructions": instructions}))
                    .await?;
                if let Some(err) = ctx.handle_terminal_review(graph, task_id, &review2)? {
                    return Err(err);
                }

                graph.with_node_mut(task_id, |n| {
                    n.aux_data.as_object_mut().unwrap().insert(
                        "plan_modification".to_string(),
                        json!({"original_plan": plan, "instructions": instructions}),
                    );
                });
                plan = modified;
            }

            if plan.sub_tasks.is_empty() {
                // §8: an empty plan is interpreted as "atomic after all";
                // no children are created and the node runs as an executor.
                return ctx.run_executor(graph, task_id, &node, blueprint, &agent_context).await;
            }

            let sub_graph_id = GraphId::for_node(task_id);
            graph.add_graph(sub_graph_id.clone(), false).map_err(OrchestratorError::from)?;

            let mut child_ids = Vec::with_capacity(plan.sub_tasks.len());
            for (idx, sub_task) in plan.sub_tasks.iter().enumerate() {
                let child_id = task_id.child(idx);
                let mut child = TaskNode::new(
                    child_id.clone(),
                    sub_task.goal.clone(),
                    sub_task.task_type,
                    sub_task.node_type,
                    node.layer + 1,
                    Some(task_id.clone()),
                );
                child.depends_on_indices = sub_task.depends_on_indices.clone();
                graph.add_node(&sub_graph_id, child).map_err(OrchestratorError::from)?;
                child_ids.push(child_id);
            }
            for (idx, sub_task) in plan.sub_tasks.iter().enumerate() {
                for dep_idx in &sub_task.depends_on_indices {
                    if let Some(dep_id) = child_ids.get(*dep_idx) {
                        graph
                            .add_edge(&sub_graph_id, dep_id, &child_ids[idx])
                            .map_err(OrchestratorError::from)?;
                    }
                }
            }

            graph.with_node_mut(task_id, |n| {
                n.planned_sub_task_ids = child_ids;
                n.sub_graph_id = Some(sub_graph_id);
                n.agent_name = Some(blueprint.adapter.name().to_string());
            });

            ctx.transitions
                .transition(graph, Some(ctx.knowledge.as_ref()), task_id, TaskStatus::PlanDone, "plan generated")
                .map_err(OrchestratorError::from)?;
            Ok(())
        } else {
            ctx.run_executor(graph, task_id, &node, blueprint, &agent_context).await
        }
    }
}

/// Handles `AGGREGATING` nodes: invoke the adapter's `aggregate` action over
/// the completed sub-graph and transition to `DONE`.
struct AggregateHandler;

#[async_trait]
impl Handler for AggregateHandler {
    async fn handle(&self, ctx: &NodeProcessor, graph: &TaskGraph, task_id: &TaskId) -> Result<()> {
        let node = graph
            .get_node(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;

        let review = ctx
            .maybe_review(&node, Checkpoint::AggregationReview, json!({"goal": node.goal}))
            .await?;
        if let Some(err) = ctx.handle_terminal_review(graph, task_id, &review)? {
            return Err(err);
        }

        let blueprint = ctx.registry.resolve(&node)?;
        let agent_context = ctx.build_aggregation_context(graph, &node);

        let outcome = ctx
            .call_adapter(blueprint, &node, AgentAction::Aggregate, &agent_context)
            .await
            .map_err(OrchestratorError::from)?;

        match outcome {
            llm::AdapterOutput::Result(r) => {
                graph.with_node_mut(task_id, |n| {
                    n.result = Some(r.result);
                    n.output_summary = r.summary;
                    n.agent_name = Some(blueprint.adapter.name().to_string());
                });
                ctx.transitions
                    .transition(graph, Some(ctx.knowledge.as_ref()), task_id, TaskStatus::Done, "aggregated")
                    .map_err(OrchestratorError::from)
            }
            _ => Err(OrchestratorError::General(format!("adapter returned non-result output for {task_id}"))),
        }
    }
}

/// Handles `NEEDS_REPLAN` nodes: ask the adapter to modify the existing plan,
/// then release the node back to `READY` so the `ReadyHandler` re-dispatches
/// it (§4.6, §4.9).
struct ReplanHandler;

#[async_trait]
impl Handler for ReplanHandler {
    async fn handle(&self, ctx: &NodeProcessor, graph: &TaskGraph, task_id: &TaskId) -> Result<()> {
        let node = graph
            .get_node(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;

        if node.replan_attempts >= ctx.config.max_replan_attempts {
            ctx.transitions
                .transition(graph, Some(ctx.knowledge.as_ref()), task_id, TaskStatus::Failed, "replan budget exhausted")
                .map_err(OrchestratorError::from)?;
            return Err(OrchestratorError::RecoveryExhausted(
                task_id.to_string(),
                "replan budget exhausted".to_string(),
            ));
        }

        let review = ctx
            .maybe_review(&node, Checkpoint::PlanModification, json!({"reason": node.replan_reason}))
            .await?;
        if let Some(err) = ctx.handle_terminal_review(graph, task_id, &review)? {
            return Err(err);
        }

        let blueprint = ctx.registry.resolve(&node)?;
        let agent_context = ctx.build_context(graph, &node);

        let plan = ctx
            .call_adapter(blueprint, &node, AgentAction::ModifyPlan, &agent_context)
            .await
            .map_err(OrchestratorError::from)?;
        let plan = match plan {
            llm::AdapterOutput::Plan(p) => p,
            _ => return Err(OrchestratorError::General(format!("adapter returned non-plan output for {task_id}"))),
        };

        if plan.sub_tasks.is_empty() {
            // Same fallback as the planner path (§8): a modified plan with no
            // sub-tasks means the node runs as an executor instead of landing
            // in an unreachable `PLAN_DONE` with zero children.
            if let Some(sub_graph_id) = node.sub_graph_id.clone() {
                graph.remove_graph_and_descendants(&sub_graph_id);
            }
            graph.with_node_mut(task_id, |n| {
                n.sub_graph_id = None;
                n.planned_sub_task_ids = Vec::new();
                n.replan_attempts += 1;
                n.push_retry_history(json!({"action": "replan_to_executor", "attempt": n.replan_attempts}));
            });
            ctx.transitions
                .transition(graph, Some(ctx.knowledge.as_ref()), task_id, TaskStatus::Ready, "replanned to empty plan")
                .map_err(OrchestratorError::from)?;
            ctx.transitions
                .transition(graph, Some(ctx.knowledge.as_ref()), task_id, TaskStatus::Running, "re-dispatched after replan")
                .map_err(OrchestratorError::from)?;
            let node = graph.get_node(task_id).ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
            return ctx.run_executor(graph, task_id, &node, blueprint, &agent_context).await;
        }

        if let Some(sub_graph_id) = node.sub_graph_id.clone() {
            graph.remove_graph_and_descendants(&sub_graph_id);
        }
        let sub_graph_id = GraphId::for_node(task_id);
        graph.add_graph(sub_graph_id.clone(), false).map_err(OrchestratorError::from)?;

        let mut child_ids = Vec::with_capacity(plan.sub_tasks.len());
        for (idx, sub_task) in plan.sub_tasks.iter().enumerate() {
            let child_id = task_id.child(idx);
            let mut child = TaskNode::new(
                child_id.clone(),
                sub_task.goal.clone(),
                sub_task.task_type,
                sub_task.node_type,
                node.layer + 1,
                Some(task_id.clone()),
            );
            child.depends_on_indices = sub_task.depends_on_indices.clone();
            graph.add_node(&sub_graph_id, child).map_err(OrchestratorError::from)?;
            child_ids.push(child_id);
        }

        graph.with_node_mut(task_id, |n| {
            n.planned_sub_task_ids = child_ids;
            n.sub_graph_id = Some(sub_graph_id);
            n.replan_attempts += 1;
            n.push_retry_history(json!({"action": "replan", "attempt": n.replan_attempts}));
        });

        ctx.transitions
            .transition(graph, Some(ctx.knowledge.as_ref()), task_id, TaskStatus::Ready, "replanned")
            .map_err(OrchestratorError::from)?;
        ctx.transitions
            .transition(graph, Some(ctx.knowledge.as_ref()), task_id, TaskStatus::Running, "re-dispatched after replan")
            .map_err(OrchestratorError::from)?;
        ctx.transitions
            .transition(graph, Some(ctx.knowledge.as_ref()), task_id, TaskStatus::PlanDone, "replanned, awaiting children")
            .map_err(OrchestratorError::from)
    }
}
