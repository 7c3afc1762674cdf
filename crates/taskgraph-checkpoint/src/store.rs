//! In-memory [`KnowledgeStore`] implementation.
//!
//! Thread-safe via `DashMap`; ideal for development, tests, and as the
//! backing store wrapped by [`crate::batching::BatchedStateManager`] in
//! production use.

use dashmap::DashMap;
use taskgraph_core::{KnowledgeRecord, KnowledgeStore, TaskId};

/// Reference `KnowledgeStore` backed by a concurrent hash map. Data is lost on
/// process restart; combine with [`crate::collaborator::FileCheckpointCollaborator`]
/// if that matters.
#[derive(Default)]
pub struct InMemoryKnowledgeStore {
    records: DashMap<TaskId, KnowledgeRecord>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl KnowledgeStore for InMemoryKnowledgeStore {
    fn put(&self, record: KnowledgeRecord) {
        self.records.insert(record.task_id.clone(), record);
    }

    fn get(&self, task_id: &TaskId) -> Option<KnowledgeRecord> {
        self.records.get(task_id).map(|r| r.clone())
    }

    fn remove(&self, task_id: &TaskId) {
        self.records.remove(task_id);
    }

    fn all(&self) -> Vec<KnowledgeRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgraph_core::{NodeType, TaskNode, TaskType};

    #[test]
    fn put_then_get_round_trips() {
        let store = InMemoryKnowledgeStore::new();
        let node = TaskNode::new(TaskId::new("a"), "goal", TaskType::Think, NodeType::Execute, 0, None);
        store.put(KnowledgeRecord::from(&node));
        let record = store.get(&TaskId::new("a")).unwrap();
        assert_eq!(record.goal, "goal");
    }
}
