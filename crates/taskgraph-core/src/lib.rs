//! Task-graph data model, state machine, and scheduler.
//!
//! This crate is the leaf dependency of the taskgraph orchestrator workspace:
//! it owns the [`TaskNode`]/[`TaskGraph`] data model, the
//! [`StateTransitionManager`] that enforces legal status transitions, and the
//! [`TaskScheduler`] that turns graph + state into a ready-to-run set of
//! nodes. It has no opinion on concurrency, agents, or persistence — those
//! live in `orchestrator`, `llm`, and `taskgraph-checkpoint` respectively.

pub mod error;
pub mod graph;
pub mod id;
pub mod knowledge_store;
pub mod node;
pub mod scheduler;
pub mod state_machine;

pub use error::{Result, TaskGraphError};
pub use graph::{GraphSnapshot, TaskGraph};
pub use id::{GraphId, TaskId};
pub use knowledge_store::{KnowledgeRecord, KnowledgeStore};
pub use node::{NodeType, TaskNode, TaskStatus, TaskType};
pub use scheduler::TaskScheduler;
pub use state_machine::{StateTransitionManager, TransitionRecord};
