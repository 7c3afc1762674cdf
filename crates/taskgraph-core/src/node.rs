//! `TaskNode`: the unit of work tracked by a [`crate::graph::TaskGraph`].

use crate::id::{GraphId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of work a task performs, chosen by the planner that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Search,
    Think,
    Write,
    Aggregate,
}

/// The processing role a node plays once dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Plan,
    Execute,
    Aggregate,
}

/// Authoritative node status. See `SPEC_FULL.md` §4.3 for the legal transition
/// table; only [`crate::state_machine::StateTransitionManager`] may mutate this
/// field on a live node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    PlanDone,
    Aggregating,
    NeedsReplan,
    Done,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses are never re-entered except via an explicit replan.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

/// A single unit of work in the task graph.
///
/// Created by the planner that produced it, mutated only by its current
/// handler, and destroyed only when its enclosing graph is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub task_id: TaskId,
    pub goal: String,
    pub task_type: TaskType,
    pub node_type: NodeType,
    pub status: TaskStatus,
    pub layer: usize,
    pub parent_node_id: Option<TaskId>,
    pub sub_graph_id: Option<GraphId>,

    /// Sequence of `(goal, task_type, node_type)` established at planning
    /// time; sibling ids are resolved against this list's indices.
    pub planned_sub_task_ids: Vec<TaskId>,

    /// Indices into the *parent's* `planned_sub_task_ids` that this node
    /// depends on. Resolved to concrete ids lazily by the scheduler.
    pub depends_on_indices: Vec<usize>,

    pub result: Option<Value>,
    pub output_summary: Option<String>,
    pub error: Option<String>,

    pub replan_attempts: u32,
    pub replan_reason: Option<String>,

    pub timestamp_created: DateTime<Utc>,
    pub timestamp_updated: DateTime<Utc>,
    pub timestamp_completed: Option<DateTime<Utc>>,

    /// Untyped scratchpad shared across handler steps (retry history, cached
    /// atomizer verdicts, HITL transcripts, ...).
    pub aux_data: Value,

    /// Name of the adapter last used to process this node; handlers must
    /// preserve this across their own invocation (§4.5).
    pub agent_name: Option<String>,
}

impl TaskNode {
    /// Construct a new node in `PENDING` status (callers create the
    /// synthetic root directly in `READY`, see
    /// [`crate::graph::TaskGraph::init_root`]).
    pub fn new(
        task_id: TaskId,
        goal: impl Into<String>,
        task_type: TaskType,
        node_type: NodeType,
        layer: usize,
        parent_node_id: Option<TaskId>,
    ) -> Self {
        let now = Utc::now();
        TaskNode {
            task_id,
            goal: goal.into(),
            task_type,
            node_type,
            status: TaskStatus::Pending,
            layer,
            parent_node_id,
            sub_graph_id: None,
            planned_sub_task_ids: Vec::new(),
            depends_on_indices: Vec::new(),
            result: None,
            output_summary: None,
            error: None,
            replan_attempts: 0,
            replan_reason: None,
            timestamp_created: now,
            timestamp_updated: now,
            timestamp_completed: None,
            aux_data: Value::Object(Default::default()),
            agent_name: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record an attempted recovery/retry action in `aux_data.retry_history`
    /// (§4.9: "all recovery attempts ... record the action in
    /// `aux_data.retry_history`").
    pub fn push_retry_history(&mut self, entry: Value) {
        let obj = self
            .aux_data
            .as_object_mut()
            .expect("aux_data is always a JSON object");
        let history = obj
            .entry("retry_history")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(arr) = history {
            arr.push(entry);
        }
    }
}
