//! Hierarchical task and graph identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A hierarchical task identifier, e.g. `root.1.2`.
///
/// Segments after the first describe descent through planned sub-task indices,
/// so `task_id.starts_with(parent.task_id)` for any descendant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// The synthetic root task id.
    pub fn root() -> Self {
        TaskId("root".to_string())
    }

    pub fn new(raw: impl Into<String>) -> Self {
        TaskId(raw.into())
    }

    /// Build the id of the `index`-th planned sub-task of this node.
    pub fn child(&self, index: usize) -> Self {
        TaskId(format!("{}.{}", self.0, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Depth implied by the id's dotted structure (root has depth 0).
    pub fn implied_layer(&self) -> usize {
        self.0.matches('.').count()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        TaskId(s)
    }
}

/// Identifier of a sub-graph (one per planning node that has produced children).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GraphId(String);

impl GraphId {
    pub fn root() -> Self {
        GraphId("graph.root".to_string())
    }

    pub fn new(raw: impl Into<String>) -> Self {
        GraphId(raw.into())
    }

    /// Derive the sub-graph id owned by a planning node.
    pub fn for_node(task_id: &TaskId) -> Self {
        GraphId(format!("graph.{}", task_id.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_ids_extend_the_parent_path() {
        let root = TaskId::root();
        let a = root.child(0);
        let b = a.child(1);
        assert_eq!(a.as_str(), "root.0");
        assert_eq!(b.as_str(), "root.0.1");
        assert_eq!(b.implied_layer(), 2);
    }
}
