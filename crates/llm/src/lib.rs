//! `AgentAdapter` implementations: the orchestrator's only boundary into
//! model-provider-specific code (spec §6).
//!
//! An adapter receives a [`taskgraph_core::TaskNode`], the action the
//! orchestrator wants performed (`plan`, `execute`, `aggregate`, `atomize`,
//! `modify_plan`), and an assembled [`adapter::AgentContext`], and returns one
//! of the three verdict shapes in [`adapter::AdapterOutput`].
//!
//! # Local Providers
//!
//! - **Ollama** - popular local LLM runner with wide model support
//!
//! # Remote Providers
//!
//! - **Claude** - Anthropic's Claude models
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::remote::ClaudeAdapter;
//! use llm::config::RemoteLlmConfig;
//! use llm::adapter::{AgentAdapter, AgentAction, AgentContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RemoteLlmConfig::from_env(
//!         "ANTHROPIC_API_KEY",
//!         "https://api.anthropic.com",
//!         "claude-3-5-sonnet-20241022",
//!     )?;
//!     let adapter = ClaudeAdapter::new(config);
//!     // adapter.process(&node, AgentAction::Execute, &context).await?;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod provider_utils;

#[macro_use]
mod provider_macros;

#[cfg(feature = "local")]
pub mod local;

#[cfg(feature = "remote")]
pub mod remote;

pub use adapter::{
    AdapterOutput, AgentAction, AgentAdapter, AgentContext, AgentResult, AtomizerOutput,
    PlanOutput, PlannedSubTask,
};
pub use config::{LocalLlmConfig, RemoteLlmConfig};
pub use error::{LlmError, Result};
pub use provider_utils::{ModelInfo, ProviderUtils};
