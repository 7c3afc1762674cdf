//! Errors surfaced by the orchestration engine (§7). Configuration errors are
//! fatal at startup; the rest describe conditions the
//! [`crate::recovery::RecoveryManager`] or the caller has to react to.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Graph(#[from] taskgraph_core::TaskGraphError),

    #[error(transparent)]
    Checkpoint(#[from] taskgraph_checkpoint::CheckpointError),

    #[error("agent error: {0}")]
    Agent(#[from] llm::LlmError),

    #[error("no agent blueprint resolved for node {0}")]
    NoAgentResolved(String),

    #[error("deadlock detected: {0}")]
    Deadlock(String),

    #[error("HITL review rejected: {0}")]
    HitlRejected(String),

    #[error("HITL review timed out waiting for node {0}")]
    HitlTimeout(String),

    #[error("recovery exhausted for node {0}: {1}")]
    RecoveryExhausted(String, String),

    #[error("{0}")]
    General(String),
}
