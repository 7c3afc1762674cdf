//! Error types for task-graph construction, state transitions, and scheduling.

use thiserror::Error;

/// Result type used throughout `taskgraph-core`.
pub type Result<T> = std::result::Result<T, TaskGraphError>;

/// Errors that can occur while building or mutating a [`crate::graph::TaskGraph`],
/// or while driving a [`crate::node::TaskNode`] through the state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskGraphError {
    /// Adding an edge would introduce a cycle; the graph is left unchanged.
    #[error("adding edge {from} -> {to} in graph '{graph_id}' would create a cycle")]
    Cycle {
        graph_id: String,
        from: String,
        to: String,
    },

    /// A referenced graph does not exist.
    #[error("graph '{0}' does not exist")]
    UnknownGraph(String),

    /// A referenced task id does not exist.
    #[error("task '{0}' does not exist")]
    UnknownTask(String),

    /// A task id is already present in some graph; a node may not appear twice.
    #[error("task '{0}' already exists in graph '{1}'")]
    DuplicateTask(String, String),

    /// A non-root node was added without a valid `parent_node_id`, or the parent
    /// does not reference the containing graph via `sub_graph_id` (invariant 1).
    #[error("node '{0}' has no valid parent linking it to its containing graph")]
    MissingParentLink(String),

    /// More than one graph in a [`crate::graph::TaskGraph`] is marked root.
    #[error("graph '{0}' cannot be marked root; graph '{1}' is already root")]
    DuplicateRoot(String, String),

    /// Attempted to transition a node along an edge not present in the state
    /// machine's transition table (§4.3 of the specification).
    #[error("illegal transition for task '{task_id}': {from:?} -> {to:?}")]
    IllegalTransition {
        task_id: String,
        from: crate::node::TaskStatus,
        to: crate::node::TaskStatus,
    },

    /// A transition's guard condition was not satisfied even though the edge
    /// itself is legal (e.g. predecessors not yet DONE).
    #[error("transition guard failed for task '{task_id}' ({from:?} -> {to:?}): {reason}")]
    GuardFailed {
        task_id: String,
        from: crate::node::TaskStatus,
        to: crate::node::TaskStatus,
        reason: String,
    },

    /// `replan_attempts` would exceed `max_replan_attempts` (invariant 7).
    #[error("task '{0}' has exhausted its replan budget ({1} attempts)")]
    ReplanBudgetExhausted(String, u32),

    /// Two transitions were attempted concurrently on the same node.
    #[error("concurrent transition rejected for task '{0}': a transition is already in flight")]
    ConcurrentTransition(String),

    /// Generic validation failure surfaced while constructing a graph.
    #[error("graph validation failed: {0}")]
    Validation(String),
}
