//! `BatchedStateManager`: coalesces knowledge-store writes (§4.10).
//!
//! A state update is held in an in-memory map keyed by `task_id`
//! (deduplicating in-flight writes for the same task) and flushed when either
//! `batch_size` or `batch_timeout_ms` is reached, on shutdown, or
//! immediately for failures, which bypass batching entirely for durability.

use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use taskgraph_core::{KnowledgeRecord, KnowledgeStore, TaskId, TaskStatus};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub compression_threshold_bytes: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            batch_size: 50,
            batch_timeout_ms: 100,
            compression_threshold_bytes: 1024,
        }
    }
}

/// Wraps an inner [`KnowledgeStore`] and coalesces writes into it.
pub struct BatchedStateManager {
    inner: Arc<dyn KnowledgeStore>,
    pending: Mutex<HashMap<TaskId, KnowledgeRecord>>,
    config: BatchConfig,
    notify: Notify,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl BatchedStateManager {
    pub fn new(inner: Arc<dyn KnowledgeStore>, config: BatchConfig) -> Arc<Self> {
        let manager = Arc::new(BatchedStateManager {
            inner,
            pending: Mutex::new(HashMap::new()),
            config,
            notify: Notify::new(),
            flusher: Mutex::new(None),
        });
        manager.clone().spawn_flusher();
        manager
    }

    fn spawn_flusher(self: Arc<Self>) {
        let timeout = Duration::from_millis(self.config.batch_timeout_ms);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        self.flush_all();
                    }
                    _ = self.notify.notified() => {
                        self.flush_all();
                    }
                }
            }
        });
        *self.flusher.lock() = Some(handle);
    }

    /// Compress `result_or_summary` payloads at or above the configured
    /// threshold into a `{_compressed, data, original_size}` envelope,
    /// recording the bookkeeping in `aux_data` rather than the payload
    /// itself.
    fn compress_if_needed(&self, mut record: KnowledgeRecord) -> KnowledgeRecord {
        let Some(payload) = &record.result_or_summary else {
            return record;
        };
        let Ok(raw) = serde_json::to_vec(payload) else {
            return record;
        };
        if raw.len() < self.config.compression_threshold_bytes {
            return record;
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        if encoder.write_all(&raw).is_err() {
            return record;
        }
        let Ok(compressed) = encoder.finish() else {
            return record;
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(&compressed);
        let original_size = raw.len();
        record.result_or_summary = Some(json!({
            "_compressed": true,
            "data": encoded,
            "original_size": original_size,
        }));
        if let Some(obj) = record.aux_data.as_object_mut() {
            obj.insert(
                "_compression".to_string(),
                json!({ "original_size": original_size, "compressed_size": compressed_len(&record) }),
            );
        }
        record
    }

    /// Flush every pending write into the inner store.
    pub fn flush_all(&self) {
        let drained: Vec<KnowledgeRecord> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, v)| v).collect()
        };
        if drained.is_empty() {
            return;
        }
        debug!(count = drained.len(), "flushing batched state writes");
        for record in drained {
            self.inner.put(record);
        }
    }

    pub async fn shutdown(&self) {
        self.flush_all();
        if let Some(handle) = self.flusher.lock().take() {
            handle.abort();
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

fn compressed_len(record: &KnowledgeRecord) -> usize {
    record
        .result_or_summary
        .as_ref()
        .and_then(|v| v.get("data"))
        .and_then(|d| d.as_str())
        .map(|s| s.len())
        .unwrap_or(0)
}

impl KnowledgeStore for BatchedStateManager {
    fn put(&self, record: KnowledgeRecord) {
        if record.status == TaskStatus::Failed {
            warn!(task_id = %record.task_id, "failure bypasses batching for immediate durability");
            self.inner.put(record);
            return;
        }
        let record = self.compress_if_needed(record);
        let should_flush = {
            let mut pending = self.pending.lock();
            pending.insert(record.task_id.clone(), record);
            pending.len() >= self.config.batch_size
        };
        if should_flush {
            self.notify.notify_one();
        }
    }

    fn get(&self, task_id: &TaskId) -> Option<KnowledgeRecord> {
        if let Some(record) = self.pending.lock().get(task_id) {
            return Some(record.clone());
        }
        self.inner.get(task_id)
    }

    fn remove(&self, task_id: &TaskId) {
        self.pending.lock().remove(task_id);
        self.inner.remove(task_id);
    }

    fn all(&self) -> Vec<KnowledgeRecord> {
        let mut merged: HashMap<TaskId, KnowledgeRecord> = self
            .inner
            .all()
            .into_iter()
            .map(|r| (r.task_id.clone(), r))
            .collect();
        for (id, record) in self.pending.lock().iter() {
            merged.insert(id.clone(), record.clone());
        }
        merged.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryKnowledgeStore;
    use taskgraph_core::{NodeType, TaskNode, TaskType};

    fn record(id: &str, status: TaskStatus) -> KnowledgeRecord {
        let mut node = TaskNode::new(TaskId::new(id), "g", TaskType::Think, NodeType::Execute, 0, None);
        node.status = status;
        KnowledgeRecord::from(&node)
    }

    #[tokio::test]
    async fn flush_all_makes_prior_writes_visible_to_get() {
        let inner = Arc::new(InMemoryKnowledgeStore::new());
        let mgr = BatchedStateManager::new(inner.clone(), BatchConfig::default());
        mgr.put(record("a", TaskStatus::Running));
        assert!(inner.get(&TaskId::new("a")).is_none());
        mgr.flush_all();
        assert!(inner.get(&TaskId::new("a")).is_some());
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn failures_bypass_batching() {
        let inner = Arc::new(InMemoryKnowledgeStore::new());
        let mgr = BatchedStateManager::new(inner.clone(), BatchConfig::default());
        mgr.put(record("a", TaskStatus::Failed));
        assert!(inner.get(&TaskId::new("a")).is_some());
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn reaching_batch_size_triggers_a_flush() {
        let inner = Arc::new(InMemoryKnowledgeStore::new());
        let config = BatchConfig {
            batch_size: 2,
            batch_timeout_ms: 60_000,
            ..Default::default()
        };
        let mgr = BatchedStateManager::new(inner.clone(), config);
        mgr.put(record("a", TaskStatus::Running));
        mgr.put(record("b", TaskStatus::Running));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(inner.get(&TaskId::new("a")).is_some());
        assert!(inner.get(&TaskId::new("b")).is_some());
        mgr.shutdown().await;
    }
}
