//! Agent selection: which [`llm::AgentAdapter`] handles a given node.
//!
//! Selection order (§4.5, resolved from spec §9's open question on
//! blueprint precedence): task-specific blueprint for the node's
//! `task_type`, then the registry default, then a prefix-composed blueprint
//! keyed on the node's goal text, then the hard fallback.

use std::collections::HashMap;
use std::sync::Arc;

use taskgraph_core::{TaskNode, TaskType};

use crate::error::{OrchestratorError, Result};
use llm::AgentAdapter;

/// A named binding from selection criteria to a concrete adapter instance.
#[derive(Clone)]
pub struct AgentBlueprint {
    pub name: String,
    pub adapter: Arc<dyn AgentAdapter>,
}

impl AgentBlueprint {
    pub fn new(name: impl Into<String>, adapter: Arc<dyn AgentAdapter>) -> Self {
        AgentBlueprint { name: name.into(), adapter }
    }
}

impl std::fmt::Debug for AgentBlueprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBlueprint").field("name", &self.name).finish()
    }
}

/// Registry of available agent blueprints, resolved per node.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    by_task_type: HashMap<TaskType, AgentBlueprint>,
    by_goal_prefix: Vec<(String, AgentBlueprint)>,
    default_blueprint: Option<AgentBlueprint>,
    fallback_blueprint: Option<AgentBlueprint>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a blueprint for an exact `TaskType`. Highest selection priority.
    pub fn register_for_task_type(&mut self, task_type: TaskType, blueprint: AgentBlueprint) {
        self.by_task_type.insert(task_type, blueprint);
    }

    /// Bind the registry-wide default, used when no task-type binding exists.
    pub fn set_default(&mut self, blueprint: AgentBlueprint) {
        self.default_blueprint = Some(blueprint);
    }

    /// Bind a blueprint selected when the node's goal starts with `prefix`.
    /// Prefix bindings are tried in registration order, before the default,
    /// after the task-type binding.
    pub fn register_for_goal_prefix(&mut self, prefix: impl Into<String>, blueprint: AgentBlueprint) {
        self.by_goal_prefix.push((prefix.into(), blueprint));
    }

    /// Bind the hard fallback used only when nothing else resolves.
    pub fn set_fallback(&mut self, blueprint: AgentBlueprint) {
        self.fallback_blueprint = Some(blueprint);
    }

    /// Resolve the blueprint for `node`, honoring the selection order:
    /// task-specific -> default -> prefix-composed -> fallback.
    pub fn resolve(&self, node: &TaskNode) -> Result<&AgentBlueprint> {
        if let Some(b) = self.by_task_type.get(&node.task_type) {
            return Ok(b);
        }
        if let Some(b) = &self.default_blueprint {
            return Ok(b);
        }
        for (prefix, blueprint) in &self.by_goal_prefix {
            if node.goal.starts_with(prefix.as_str()) {
                return Ok(blueprint);
            }
        }
        if let Some(b) = &self.fallback_blueprint {
            return Ok(b);
        }
        Err(OrchestratorError::NoAgentResolved(node.task_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llm::{AdapterOutput, AgentAction, AgentContext, AgentResult};
    use taskgraph_core::{NodeType, TaskId};

    struct StubAdapter(&'static str);

    #[async_trait]
    impl AgentAdapter for StubAdapter {
        fn name(&self) -> &str {
            self.0
        }

        async fn process(
            &self,
            _node: &TaskNode,
            _action: AgentAction,
            _context: &AgentContext,
        ) -> llm::Result<AdapterOutput> {
            Ok(AdapterOutput::Result(AgentResult { result: serde_json::json!({}), summary: None }))
        }
    }

    fn node(goal: &str, task_type: TaskType) -> TaskNode {
        TaskNode::new(TaskId::root(), goal, task_type, NodeType::Execute, 0, None)
    }

    #[test]
    fn task_type_beats_default() {
        let mut registry = AgentRegistry::new();
        registry.set_default(AgentBlueprint::new("default", Arc::new(StubAdapter("default"))));
        registry.register_for_task_type(TaskType::Search, AgentBlueprint::new("searcher", Arc::new(StubAdapter("searcher"))));

        let n = node("find something", TaskType::Search);
        assert_eq!(registry.resolve(&n).unwrap().name, "searcher");
    }

    #[test]
    fn prefix_used_when_no_type_or_default_binding() {
        let mut registry = AgentRegistry::new();
        registry.register_for_goal_prefix("urgent:", AgentBlueprint::new("urgent", Arc::new(StubAdapter("urgent"))));
        registry.set_fallback(AgentBlueprint::new("fallback", Arc::new(StubAdapter("fallback"))));

        let n = node("urgent: fix the build", TaskType::Think);
        assert_eq!(registry.resolve(&n).unwrap().name, "urgent");

        let n2 = node("normal task", TaskType::Think);
        assert_eq!(registry.resolve(&n2).unwrap().name, "fallback");
    }

    #[test]
    fn no_binding_is_an_error() {
        let registry = AgentRegistry::new();
        let n = node("anything", TaskType::Think);
        assert!(registry.resolve(&n).is_err());
    }
}
