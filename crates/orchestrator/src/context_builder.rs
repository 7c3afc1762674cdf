//! Assembles the context string handed to an [`llm::AgentAdapter`] (§4.7): a
//! section-delimited walk up the ancestor chain (goal + summary, bounded by
//! `context_ancestor_layers`), plus sibling summaries, capped at
//! `context_word_limit` words by truncating the oldest ancestor sections
//! first.

use taskgraph_core::{TaskGraph, TaskId, TaskNode};

use crate::config::OrchestratorConfig;

/// A built context plus the word count it occupies, for callers that want to
/// log or test size-policy behavior directly.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub formatted: String,
    pub word_count: usize,
    pub truncated: bool,
}

pub struct ContextBuilder<'a> {
    config: &'a OrchestratorConfig,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(config: &'a OrchestratorConfig) -> Self {
        ContextBuilder { config }
    }

    /// Build the context for `node` within `graph`.
    pub fn build(&self, graph: &TaskGraph, node: &TaskNode) -> NodeContext {
        let ancestors = self.ancestor_chain(graph, node);
        let siblings = self.sibling_summaries(graph, node);

        let mut sections: Vec<String> = Vec::new();
        sections.push(format!("=== Root Goal ===\n{}", node.goal));

        let bounded_ancestors: Vec<&TaskNode> = ancestors
            .iter()
            .rev()
            .take(self.config.context_ancestor_layers)
            .collect();

        for ancestor in bounded_ancestors.iter().rev() {
            let summary = ancestor.output_summary.as_deref().unwrap_or("(no summary yet)");
            sections.push(format!(
                "=== Ancestor (layer {}) ===\nGoal: {}\nSummary: {}",
                ancestor.layer, ancestor.goal, summary
            ));
        }

        if !siblings.is_empty() {
            let mut block = String::from("=== Sibling Results ===\n");
            for (goal, summary) in &siblings {
                block.push_str(&format!("- {goal}: {summary}\n"));
            }
            sections.push(block);
        }

        sections.push(format!("=== Current Task ===\n{}", node.goal));

        let (formatted, truncated) = self.enforce_word_limit(sections);
        let word_count = formatted.split_whitespace().count();

        NodeContext { formatted, word_count, truncated }
    }

    /// Build the context for an `AGGREGATING` node (§4.7 "Aggregation":
    /// parent hierarchy + horizontal dependencies + the children's full
    /// results). Each child contributes its `DONE` result, its `FAILED`
    /// error, or — for a child still `PENDING`/non-terminal when aggregation
    /// was forced by stuck-aggregation recovery (§4.9, §8 scenario 3) — its
    /// goal and an explicit "not completed" marker, so a degraded summary can
    /// still account for what never finished instead of silently omitting
    /// it.
    pub fn build_aggregation(&self, graph: &TaskGraph, node: &TaskNode) -> NodeContext {
        let ancestors = self.ancestor_chain(graph, node);
        let mut sections: Vec<String> = Vec::new();
        sections.push(format!("=== Root Goal ===\n{}", node.goal));

        let bounded_ancestors: Vec<&TaskNode> = ancestors
            .iter()
            .rev()
            .take(self.config.context_ancestor_layers)
            .collect();
        for ancestor in bounded_ancestors.iter().rev() {
            let summary = ancestor.output_summary.as_deref().unwrap_or("(no summary yet)");
            sections.push(format!(
                "=== Ancestor (layer {}) ===\nGoal: {}\nSummary: {}",
                ancestor.layer, ancestor.goal, summary
            ));
        }

        let mut block = String::from("=== Child Task Results ===\n");
        for child_id in &node.planned_sub_task_ids {
            let Some(child) = graph.get_node(child_id) else { continue };
            match child.status {
                taskgraph_core::TaskStatus::Done => {
                    let output = child
                        .output_summary
                        .clone()
                        .or_else(|| child.result.as_ref().map(|r| r.to_string()))
                        .unwrap_or_else(|| "(no output)".to_string());
                    block.push_str(&format!("Task ID: {}\nGoal: {}\nOutput: {}\n\n", child.task_id, child.goal, output));
                }
                taskgraph_core::TaskStatus::Failed => {
                    let err = child.error.clone().unwrap_or_else(|| "unknown error".to_string());
                    block.push_str(&format!(
                        "Task ID: {}\nGoal: {}\nOutput: (FAILED: {})\n\n",
                        child.task_id, child.goal, err
                    ));
                }
                other => {
                    block.push_str(&format!(
                        "Task ID: {}\nGoal: {}\nOutput: (not completed, status={:?} -- included for a degraded aggregation)\n\n",
                        child.task_id, child.goal, other
                    ));
                }
            }
        }
        sections.push(block);
        sections.push(format!("=== Current Task ===\n{}", node.goal));

        let (formatted, truncated) = self.enforce_word_limit(sections);
        let word_count = formatted.split_whitespace().count();
        NodeContext { formatted, word_count, truncated }
    }

    fn ancestor_chain(&self, graph: &TaskGraph, node: &TaskNode) -> Vec<TaskNode> {
        let mut chain = Vec::new();
        let mut current = node.parent_node_id.clone();
        while let Some(id) = current {
            match graph.get_node(&id) {
                Some(parent) => {
                    current = parent.parent_node_id.clone();
                    chain.push(parent);
                }
                None => break,
            }
        }
        chain
    }

    fn sibling_summaries(&self, graph: &TaskGraph, node: &TaskNode) -> Vec<(String, String)> {
        let Some(parent_id) = &node.parent_node_id else {
            return Vec::new();
        };
        let Some(parent) = graph.get_node(parent_id) else {
            return Vec::new();
        };
        parent
            .planned_sub_task_ids
            .iter()
            .filter(|id| *id != &node.task_id)
            .filter_map(|id| graph.get_node(id))
            .filter(|sibling| sibling.output_summary.is_some())
            .map(|sibling| (sibling.goal.clone(), sibling.output_summary.clone().unwrap()))
            .collect()
    }

    /// Drop whole sections, oldest ancestor first (but never the root goal or
    /// current task sections), until the word count fits the configured
    /// ceiling.
    fn enforce_word_limit(&self, mut sections: Vec<String>) -> (String, bool) {
        let mut truncated = false;
        loop {
            let joined = sections.join("\n\n");
            let words = joined.split_whitespace().count();
            if words <= self.config.context_word_limit || sections.len() <= 2 {
                return (joined, truncated);
            }
            // sections[0] is root goal, last is current task; drop the
            // earliest ancestor/sibling section in between.
            sections.remove(1);
            truncated = true;
        }
    }

    #[allow(dead_code)]
    fn node_path(&self, graph: &TaskGraph, node: &TaskNode) -> Vec<TaskId> {
        let mut path = vec![node.task_id.clone()];
        path.extend(self.ancestor_chain(graph, node).into_iter().map(|n| n.task_id));
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgraph_core::{GraphId, NodeType, TaskType};

    fn build_graph() -> (TaskGraph, TaskId) {
        let graph = TaskGraph::new();
        let root_id = graph.init_root("ship the release").unwrap();
        graph.with_node_mut(&root_id, |n| n.output_summary = Some("planning underway".into()));
        let gid = GraphId::for_node(&root_id);
        graph.add_graph(gid.clone(), false).unwrap();
        let child = TaskNode::new(root_id.child(0), "write changelog", TaskType::Write, NodeType::Execute, 1, Some(root_id.clone()));
        let child_id = child.task_id.clone();
        graph.add_node(&gid, child).unwrap();
        graph.with_node_mut(&root_id, |n| n.planned_sub_task_ids = vec![child_id.clone()]);
        (graph, child_id)
    }

    #[test]
    fn context_includes_ancestor_goal_and_summary() {
        let (graph, child_id) = build_graph();
        let node = graph.get_node(&child_id).unwrap();
        let config = OrchestratorConfig::default();
        let builder = ContextBuilder::new(&config);
        let ctx = builder.build(&graph, &node);

        assert!(ctx.formatted.contains("ship the release"));
        assert!(ctx.formatted.contains("planning underway"));
        assert!(!ctx.truncated);
    }

    #[test]
    fn word_limit_truncates_oldest_sections_first() {
        let (graph, child_id) = build_graph();
        let node = graph.get_node(&child_id).unwrap();
        let mut config = OrchestratorConfig::default();
        config.context_word_limit = 3;
        let builder = ContextBuilder::new(&config);
        let ctx = builder.build(&graph, &node);

        assert!(ctx.truncated);
        assert!(ctx.formatted.contains("Current Task"));
    }
}
