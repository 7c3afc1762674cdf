//! The `KnowledgeStore` contract: a queryable mirror of node state, keyed by
//! task id, consulted when building agent context.
//!
//! Concrete storage (in-memory, batched, checkpointed) lives in
//! `taskgraph-checkpoint`; this crate only defines the shape every
//! implementation must expose so the core can depend on the trait rather than
//! a specific backend.

use crate::id::TaskId;
use crate::node::{TaskNode, TaskStatus, TaskType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A record created on first node write, updated on every status or result
/// change, and never deleted while the graph lives (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub task_id: TaskId,
    pub goal: String,
    pub status: TaskStatus,
    pub task_type: TaskType,
    pub layer: usize,
    pub parent_node_id: Option<TaskId>,
    pub planned_sub_task_ids: Vec<TaskId>,
    pub result_or_summary: Option<Value>,
    pub aux_data: Value,
}

impl From<&TaskNode> for KnowledgeRecord {
    fn from(node: &TaskNode) -> Self {
        KnowledgeRecord {
            task_id: node.task_id.clone(),
            goal: node.goal.clone(),
            status: node.status,
            task_type: node.task_type,
            layer: node.layer,
            parent_node_id: node.parent_node_id.clone(),
            planned_sub_task_ids: node.planned_sub_task_ids.clone(),
            result_or_summary: node
                .result
                .clone()
                .or_else(|| node.output_summary.clone().map(Value::String)),
            aux_data: node.aux_data.clone(),
        }
    }
}

/// Storage contract for the knowledge store. Implementors may coalesce writes
/// (see `taskgraph_checkpoint::batching::BatchedStateManager`) as long as
/// `flush_all` makes every prior `put` visible to `get`.
pub trait KnowledgeStore: Send + Sync {
    fn put(&self, record: KnowledgeRecord);
    fn get(&self, task_id: &TaskId) -> Option<KnowledgeRecord>;
    fn remove(&self, task_id: &TaskId);
    fn all(&self) -> Vec<KnowledgeRecord>;
}
