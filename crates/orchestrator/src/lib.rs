//! Hierarchical task orchestration engine: node-status dispatch, agent
//! selection, HITL review, deadlock detection, and recovery, all driving a
//! `taskgraph_core::TaskGraph` to completion.

pub mod blueprint;
pub mod config;
pub mod context_builder;
pub mod deadlock;
pub mod error;
pub mod execution;
pub mod hitl;
pub mod node_processor;
pub mod recovery;
pub mod version;

pub use blueprint::{AgentBlueprint, AgentRegistry};
pub use config::OrchestratorConfig;
pub use context_builder::{ContextBuilder, NodeContext};
pub use deadlock::{DeadlockDetector, DeadlockReport};
pub use error::{OrchestratorError, Result};
pub use execution::{ExecutionOrchestrator, ExecutionOutcome, ExecutionStats};
pub use hitl::{Checkpoint, HitlService, ReviewRequest, ReviewResult};
pub use node_processor::NodeProcessor;
pub use recovery::RecoveryManager;
