//! Ollama adapter: a local `AgentAdapter` talking to a locally-running
//! Ollama server over its `/api/chat` endpoint. Mirrors `remote::claude`'s
//! JSON-verdict convention so the orchestrator can treat local and remote
//! adapters identically.

use crate::adapter::{
    AdapterOutput, AgentAction, AgentAdapter, AgentContext, AgentResult, AtomizerOutput, PlanOutput,
};
use crate::config::LocalLlmConfig;
use crate::error::{LlmError, Result};
use crate::provider_utils::{ModelInfo, ProviderUtils};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskgraph_core::TaskNode;

/// Ollama adapter for local LLM inference.
#[derive(Clone)]
pub struct OllamaAdapter {
    config: LocalLlmConfig,
    client: Client,
}

impl OllamaAdapter {
    pub fn new(config: LocalLlmConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { config, client }
    }

    pub async fn check_health(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.config.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn system_prompt(action: AgentAction) -> &'static str {
        match action {
            AgentAction::Plan | AgentAction::ModifyPlan => {
                "You are a planning agent in a hierarchical task orchestrator. \
                 Respond with a single JSON object: \
                 {\"sub_tasks\": [{\"goal\": str, \"task_type\": \"SEARCH\"|\"THINK\"|\"WRITE\"|\"AGGREGATE\", \
                 \"node_type\": \"PLAN\"|\"EXECUTE\"|\"AGGREGATE\", \"depends_on_indices\": [int]}], \"notes\": str|null}. \
                 No prose outside the JSON object."
            }
            AgentAction::Execute => {
                "You are an execution agent. Respond with a single JSON object: \
                 {\"result\": <any JSON value>, \"summary\": str|null}. No prose outside the JSON object."
            }
            AgentAction::Aggregate => {
                "You are an aggregation agent combining sub-task results into one answer. \
                 Respond with a single JSON object: {\"result\": <any JSON value>, \"summary\": str|null}. \
                 No prose outside the JSON object."
            }
            AgentAction::Atomize => {
                "You decide whether a task needs to be broken into sub-tasks. Respond with a single \
                 JSON object: {\"should_plan\": bool, \"reasoning\": str|null}. No prose outside the JSON object."
            }
        }
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
impl AgentAdapter for OllamaAdapter {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn process(
        &self,
        node: &TaskNode,
        action: AgentAction,
        context: &AgentContext,
    ) -> Result<AdapterOutput> {
        let url = format!("{}/api/chat", self.config.base_url);

        let req_body = OllamaRequest {
            model: self.config.model.clone(),
            messages: vec![
                OllamaMessage {
                    role: "system".to_string(),
                    content: Self::system_prompt(action).to_string(),
                },
                OllamaMessage {
                    role: "user".to_string(),
                    content: format!("Goal: {}\n\nContext:\n{}", node.goal, context.formatted_context),
                },
            ],
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&req_body)
            .send()
            .await
            .map_err(LlmError::HttpError)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::ProviderError(format!("Ollama API error {status}: {error_text}")));
        }

        let ollama_resp: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Self::parse_output(action, &ollama_resp.message.content)
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

#[async_trait]
impl ProviderUtils for OllamaAdapter {
    async fn ping(&self) -> Result<bool> {
        self.check_health().await
    }

    async fn fetch_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.config.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(LlmError::ProviderError("failed to fetch models from Ollama".to_string()));
        }

        #[derive(Deserialize)]
        struct OllamaModelsResponse {
            models: Vec<OllamaModelInfo>,
        }

        #[derive(Deserialize)]
        struct OllamaModelInfo {
            name: String,
            #[serde(default)]
            size: Option<u64>,
        }

        let models_response: OllamaModelsResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(models_response
            .models
            .into_iter()
            .map(|m| {
                let mut info = ModelInfo::new(&m.name).with_name(&m.name);
                if let Some(size) = m.size {
                    let size_gb = size as f64 / 1_000_000_000.0;
                    if let Some(n) = serde_json::Number::from_f64(size_gb) {
                        info.metadata.insert("size_gb".to_string(), serde_json::Value::Number(n));
                    }
                }
                info
            })
            .collect())
    }

    async fn use_model(&mut self, model: impl Into<String> + Send) -> Result<String> {
        let model = model.into();
        self.config.model = model.clone();
        Ok(model)
    }

    fn current_model(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_creation() {
        let config = LocalLlmConfig::new("http://localhost:11434", "llama2");
        let _adapter = OllamaAdapter::new(config);
    }

    #[test]
    fn parse_atomizer_output() {
        let out = OllamaAdapter::parse_output(
            AgentAction::Atomize,
            r#"{"should_plan": false, "reasoning": "simple lookup"}"#,
        )
        .unwrap();
        match out {
            AdapterOutput::Atomizer(a) => assert!(!a.should_plan),
            _ => panic!("expected AdapterOutput::Atomizer"),
        }
    }
}
