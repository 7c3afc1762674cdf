//! Remote `AgentAdapter` implementations: cloud-hosted LLM APIs requiring an
//! API key.
//!
//! - **Claude** - Anthropic's Claude models (Claude 3 Opus, Sonnet, Haiku, 3.5 Sonnet)

pub mod claude;

pub use claude::ClaudeAdapter;
