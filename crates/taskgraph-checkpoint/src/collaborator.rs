//! The checkpoint collaborator (§6): an optional component that can snapshot
//! a [`TaskGraph`] plus its knowledge-store contents to durable storage and
//! load them back, byte-for-byte, into a fresh process.
//!
//! The orchestration core never calls this itself — the spec is explicit that
//! the core "does not persist across process restarts except through an
//! optional checkpoint collaborator" — but `ExecutionOrchestrator` accepts one
//! and calls it at configured intervals / on shutdown.

use crate::error::{CheckpointError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use taskgraph_core::{GraphSnapshot, KnowledgeRecord, KnowledgeStore, TaskGraph};

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointPayload {
    graph: GraphSnapshot,
    knowledge: Vec<KnowledgeRecord>,
    metadata: Value,
    created_at: DateTime<Utc>,
}

/// Serialization format is implementation-defined (we use `bincode`); it
/// must round-trip every field of §3's data model, which is why `TaskNode`
/// and friends all derive `Serialize`/`Deserialize`.
pub trait CheckpointCollaborator: Send + Sync {
    fn create_checkpoint(
        &self,
        graph: &TaskGraph,
        knowledge_store: &dyn KnowledgeStore,
        metadata: Value,
    ) -> Result<String>;

    fn load_checkpoint(&self, checkpoint_id: &str) -> Result<(TaskGraph, Vec<KnowledgeRecord>, Value)>;
}

/// Writes one checkpoint file per call under `base_dir`, named by an
/// incrementing sequence number so the latest checkpoint sorts last.
pub struct FileCheckpointCollaborator {
    base_dir: PathBuf,
}

impl FileCheckpointCollaborator {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(FileCheckpointCollaborator { base_dir })
    }

    fn path_for(&self, checkpoint_id: &str) -> PathBuf {
        self.base_dir.join(format!("{checkpoint_id}.ckpt"))
    }
}

impl CheckpointCollaborator for FileCheckpointCollaborator {
    fn create_checkpoint(
        &self,
        graph: &TaskGraph,
        knowledge_store: &dyn KnowledgeStore,
        metadata: Value,
    ) -> Result<String> {
        let payload = CheckpointPayload {
            graph: graph.export(),
            knowledge: knowledge_store.all(),
            metadata,
            created_at: Utc::now(),
        };
        let checkpoint_id = format!("ckpt-{}", payload.created_at.timestamp_nanos_opt().unwrap_or(0));
        let bytes = bincode::serialize(&payload)?;
        fs::write(self.path_for(&checkpoint_id), bytes)?;
        Ok(checkpoint_id)
    }

    fn load_checkpoint(&self, checkpoint_id: &str) -> Result<(TaskGraph, Vec<KnowledgeRecord>, Value)> {
        let path = self.path_for(checkpoint_id);
        if !Path::new(&path).exists() {
            return Err(CheckpointError::NotFound(checkpoint_id.to_string()));
        }
        let bytes = fs::read(path)?;
        let payload: CheckpointPayload = bincode::deserialize(&bytes)?;
        Ok((TaskGraph::import(payload.graph), payload.knowledge, payload.metadata))
    }
}

/// Reference implementation with no filesystem dependency, used in tests and
/// for short-lived in-process runs that still want checkpoint semantics.
#[derive(Default)]
pub struct InMemoryCheckpointCollaborator {
    saved: parking_lot::Mutex<std::collections::HashMap<String, CheckpointPayload>>,
}

impl InMemoryCheckpointCollaborator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointCollaborator for InMemoryCheckpointCollaborator {
    fn create_checkpoint(
        &self,
        graph: &TaskGraph,
        knowledge_store: &dyn KnowledgeStore,
        metadata: Value,
    ) -> Result<String> {
        let payload = CheckpointPayload {
            graph: graph.export(),
            knowledge: knowledge_store.all(),
            metadata,
            created_at: Utc::now(),
        };
        let checkpoint_id = format!("ckpt-{}", payload.created_at.timestamp_nanos_opt().unwrap_or(0));
        self.saved.lock().insert(checkpoint_id.clone(), payload);
        Ok(checkpoint_id)
    }

    fn load_checkpoint(&self, checkpoint_id: &str) -> Result<(TaskGraph, Vec<KnowledgeRecord>, Value)> {
        let saved = self.saved.lock();
        let payload = saved
            .get(checkpoint_id)
            .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.to_string()))?;
        Ok((
            TaskGraph::import(payload.graph.clone()),
            payload.knowledge.clone(),
            payload.metadata.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryKnowledgeStore;
    use serde_json::json;

    #[test]
    fn save_and_load_round_trips_graph_and_knowledge_store() {
        let graph = TaskGraph::new();
        let root_id = graph.init_root("summarize paper X").unwrap();
        let knowledge = InMemoryKnowledgeStore::new();
        knowledge.put(KnowledgeRecord::from(&graph.get_node(&root_id).unwrap()));

        let dir = tempfile::tempdir().unwrap();
        let collaborator = FileCheckpointCollaborator::new(dir.path()).unwrap();
        let id = collaborator
            .create_checkpoint(&graph, &knowledge, json!({"step": 1}))
            .unwrap();

        let (restored_graph, restored_knowledge, metadata) = collaborator.load_checkpoint(&id).unwrap();
        assert_eq!(
            restored_graph.get_node(&root_id).unwrap().goal,
            graph.get_node(&root_id).unwrap().goal
        );
        assert_eq!(restored_knowledge.len(), 1);
        assert_eq!(metadata["step"], 1);
    }

    #[test]
    fn loading_an_unknown_checkpoint_errors() {
        let dir = tempfile::tempdir().unwrap();
        let collaborator = FileCheckpointCollaborator::new(dir.path()).unwrap();
        assert!(collaborator.load_checkpoint("does-not-exist").is_err());
    }
}
