//! Local `AgentAdapter` implementations: providers running on localhost or
//! local networks. No API keys required.
//!
//! - **Ollama** - popular local LLM runner with wide model support

pub mod ollama;

pub use ollama::OllamaAdapter;
