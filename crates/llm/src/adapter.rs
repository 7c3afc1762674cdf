//! The `AgentAdapter` external interface (spec §6): the only point where the
//! orchestrator crosses into model-provider-specific code. An adapter takes a
//! node and its built context and returns one of three verdict shapes
//! depending on the node's `action` — the orchestrator decides which action to
//! request, the adapter just executes it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskgraph_core::TaskNode;

use crate::error::Result;

/// The action the orchestrator is asking the adapter to perform for this
/// invocation. A single adapter implementation may support all five or only
/// a subset; unsupported actions should return `AgentError::InvalidRequest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    Plan,
    Execute,
    Aggregate,
    Atomize,
    ModifyPlan,
}

/// Context handed to the adapter alongside the node: ancestor goals,
/// sibling summaries, and any HITL feedback, already assembled and
/// size-bounded by `orchestrator::context_builder` (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub formatted_context: String,
    pub extra: Value,
}

impl AgentContext {
    pub fn new(formatted_context: impl Into<String>) -> Self {
        AgentContext { formatted_context: formatted_context.into(), extra: Value::Null }
    }
}

/// One planned sub-task as returned by a `Plan` or `ModifyPlan` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedSubTask {
    pub goal: String,
    pub task_type: taskgraph_core::TaskType,
    pub node_type: taskgraph_core::NodeType,
    #[serde(default)]
    pub depends_on_indices: Vec<usize>,
}

/// Result of a `Plan` or `ModifyPlan` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOutput {
    pub sub_tasks: Vec<PlannedSubTask>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Result of an `Atomize` invocation: should this node be planned further or
/// executed directly (§4.2, invariant: every node is atomized at most once
/// unless `force_root_node_planning` applies).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomizerOutput {
    pub should_plan: bool,
    pub reasoning: Option<String>,
}

/// Result of an `Execute` or `Aggregate` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub result: Value,
    pub summary: Option<String>,
}

/// The three verdict shapes an adapter call can resolve to, matching the
/// action that was requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdapterOutput {
    Result(AgentResult),
    Plan(PlanOutput),
    Atomizer(AtomizerOutput),
}

/// A provider-specific agent implementation. `name()` is recorded onto
/// `TaskNode::agent_name` so recovery/retries reuse the same adapter
/// (§4.5, §4.9).
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn process(
        &self,
        node: &TaskNode,
        action: AgentAction,
        context: &AgentContext,
    ) -> Result<AdapterOutput>;
}
