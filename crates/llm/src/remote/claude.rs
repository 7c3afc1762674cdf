//! Anthropic Claude adapter: a remote `AgentAdapter` backed by the Messages
//! API. The adapter asks the model to respond with a single JSON object
//! shaped for the requested action and parses that object back into the
//! corresponding `AdapterOutput` variant.

use crate::adapter::{
    AdapterOutput, AgentAction, AgentAdapter, AgentContext, AgentResult, AtomizerOutput, PlanOutput,
};
use crate::config::RemoteLlmConfig;
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskgraph_core::TaskNode;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude adapter (Claude 3 Opus/Sonnet/Haiku, 3.5 Sonnet, ...).
#[derive(Clone)]
pub struct ClaudeAdapter {
    config: RemoteLlmConfig,
    client: Client,
}

impl ClaudeAdapter {
    pub fn new(config: RemoteLlmConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { config, client }
    }

    fn system_prompt(&self, action: AgentAction) -> &'static str {
        match action {
            AgentAction::Plan | AgentAction::ModifyPlan => {
                "You are a planning agent in a hierarchical task orchestrator. \
                 Respond with a single JSON object: \
                 {\"sub_tasks\": [{\"goal\": str, \"task_type\": \"SEARCH\"|\"THINK\"|\"WRITE\"|\"AGGREGATE\", \
                 \"node_type\": \"PLAN\"|\"EXECUTE\"|\"AGGREGATE\", \"depends_on_indices\": [int]}], \"notes\": str|null}. \
                 No prose outside the JSON object."
            }
            AgentAction::Execute => {
                "You are an execution agent in a hierarchical task orchestrator. \
                 Respond with a single JSON object: {\"result\": <any JSON value>, \"summary\": str|null}. \
                 No prose outside the JSON object."
            }
            AgentAction::Aggregate => {
                "You are an aggregation agent in a hierarchical task orchestrator, combining \
                 the results of completed sub-tasks into a single answer for the parent goal. \
                 Respond with a single JSON object: {\"result\": <any JSON value>, \"summary\": str|null}. \
                 No prose outside the JSON object."
            }
            AgentAction::Atomize => {
                "You are an atomizer deciding whether a task is simple enough to execute directly \
                 or needs to be broken into sub-tasks. Respond with a single JSON object: \
                 {\"should_plan\": bool, \"reasoning\": str|null}. No prose outside the JSON object."
            }
        }
    }

    fn user_prompt(&self, node: &TaskNode, context: &AgentContext) -> String {
        format!(
            "Goal: {}\n\nContext:\n{}",
            node.goal, context.formatted_context
        )
    }

    fn parse_output(action: AgentAction, text: &str) -> Result<AdapterOutput> {
        let value: Value = serde_json::from_str(text.trim())
            .map_err(|e| LlmError::InvalidResponse(format!("not valid JSON: {e}")))?;
        match action {
            AgentAction::Plan | AgentAction::ModifyPlan => {
                let plan: PlanOutput = serde_json::from_value(value)
                    .map_err(|e| LlmError::InvalidResponse(format!("bad plan output: {e}")))?;
                Ok(AdapterOutput::Plan(plan))
            }
            AgentAction::Atomize => {
                let atomizer: AtomizerOutput = serde_json::from_value(value)
                    .map_err(|e| LlmError::InvalidResponse(format!("bad atomizer output: {e}")))?;
                Ok(AdapterOutput::Atomizer(atomizer))
            }
            AgentAction::Execute | AgentAction::Aggregate => {
                let result: AgentResult = serde_json::from_value(value)
                    .map_err(|e| LlmError::InvalidResponse(format!("bad result output: {e}")))?;
                Ok(AdapterOutput::Result(result))
            }
        }
    }
}

#[async_trait]
impl AgentAdapter for ClaudeAdapter {
    fn name(&self) -> &str {
        "claude"
    }

    async fn process(
        &self,
        node: &TaskNode,
        action: AgentAction,
        context: &AgentContext,
    ) -> Result<AdapterOutput> {
        let url = format!("{}/v1/messages", self.config.base_url);

        let req_body = ClaudeRequest {
            model: self.config.model.clone(),
            system: self.system_prompt(action).to_string(),
            messages: vec![ClaudeMessage {
                role: "user".to_string(),
                content: self.user_prompt(node, context),
            }],
            max_tokens: 4096,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&req_body)
            .send()
            .await
            .map_err(LlmError::HttpError)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(if status.as_u16() == 401 {
                LlmError::AuthenticationError(error_text)
            } else if status.as_u16() == 429 {
                LlmError::RateLimitExceeded(error_text)
            } else {
                LlmError::ProviderError(format!("Claude API error {status}: {error_text}"))
            });
        }

        let claude_resp: ClaudeResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let text = claude_resp
            .content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Self::parse_output(action, &text)
    }
}

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    system: String,
    messages: Vec<ClaudeMessage>,
    max_tokens: usize,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_creation() {
        let config = RemoteLlmConfig::new(
            "test-key",
            "https://api.anthropic.com",
            "claude-3-opus-20240229",
        );
        let _adapter = ClaudeAdapter::new(config);
    }

    #[test]
    fn parse_execute_output() {
        let out = ClaudeAdapter::parse_output(
            AgentAction::Execute,
            r#"{"result": {"answer": 42}, "summary": "computed the answer"}"#,
        )
        .unwrap();
        match out {
            AdapterOutput::Result(r) => assert_eq!(r.result["answer"], 42),
            _ => panic!("expected AdapterOutput::Result"),
        }
    }

    #[test]
    fn parse_plan_output() {
        let out = ClaudeAdapter::parse_output(
            AgentAction::Plan,
            r#"{"sub_tasks": [{"goal": "step one", "task_type": "THINK", "node_type": "EXECUTE", "depends_on_indices": []}]}"#,
        )
        .unwrap();
        match out {
            AdapterOutput::Plan(p) => assert_eq!(p.sub_tasks.len(), 1),
            _ => panic!("expected AdapterOutput::Plan"),
        }
    }
}
