//! Human-in-the-loop review checkpoints (§4.8). Each checkpoint pauses a
//! node at a well-defined point; the orchestrator blocks on
//! [`HitlService::request_review`] until a human responds or the configured
//! timeout elapses, at which point `auto_approve_after_timeout` decides
//! whether the node proceeds or the review is treated as a rejection.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;

use taskgraph_core::TaskId;

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};

/// The points in a node's lifecycle at which a human may be asked to weigh
/// in (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Checkpoint {
    PlanGeneration,
    PlanModification,
    Atomization,
    BeforeExecution,
    AggregationReview,
    RootGoalReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub task_id: TaskId,
    pub checkpoint: Checkpoint,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReviewResult {
    Approved { feedback: Option<String> },
    Rejected { reason: String },
    /// `request_modification` in the external interface (§6): the reviewer
    /// wants the plan changed, not thrown away. Only honored at the
    /// `PlanGeneration` checkpoint, which routes it through the
    /// `PlanModifier` adapter without touching `replan_attempts` (§8
    /// scenario 6: user-initiated modification is not a replan).
    RequestModification { instructions: String },
    /// `aborted`: the human ended the review, distinct from a rejection —
    /// the node is cancelled rather than failed.
    Aborted,
}

struct Pending {
    request: ReviewRequest,
    responder: oneshot::Sender<ReviewResult>,
}

/// Coordinates outstanding reviews. A caller (a human operator, or a test
/// harness) drains `pending()` and answers with [`HitlService::respond`];
/// `request_review` is the handler-facing half of the rendezvous.
pub struct HitlService {
    config: Arc<OrchestratorConfig>,
    outstanding: Mutex<Vec<Pending>>,
}

impl HitlService {
    pub fn new(config: Arc<OrchestratorConfig>) -> Self {
        HitlService { config, outstanding: Mutex::new(Vec::new()) }
    }

    /// Called by a handler that has reached a checkpoint. Blocks until a
    /// human responds via [`Self::respond`] or the HITL timeout elapses.
    pub async fn request_review(&self, task_id: TaskId, checkpoint: Checkpoint, payload: Value) -> Result<ReviewResult> {
        let (tx, rx) = oneshot::channel();
        let request = ReviewRequest { task_id: task_id.clone(), checkpoint, payload };
        {
            let mut outstanding = self.outstanding.lock().await;
            outstanding.push(Pending { request, responder: tx });
        }

        let wait = timeout(Duration::from_secs(self.config.hitl_timeout_seconds), rx).await;
        match wait {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(OrchestratorError::General(format!("review channel dropped for {task_id}"))),
            Err(_) => {
                self.outstanding.lock().await.retain(|p| p.request.task_id != task_id);
                if self.config.auto_approve_after_timeout {
                    tracing::warn!(%task_id, ?checkpoint, "HITL timeout, auto-approving");
                    Ok(ReviewResult::Approved { feedback: Some("auto-approved after timeout".into()) })
                } else {
                    Err(OrchestratorError::HitlTimeout(task_id.to_string()))
                }
            }
        }
    }

    /// Snapshot of currently outstanding review requests, for a UI or test
    /// harness to present to a human.
    pub async fn pending(&self) -> Vec<ReviewRequest> {
        self.outstanding.lock().await.iter().map(|p| p.request.clone()).collect()
    }

    /// Answer the oldest outstanding review for `task_id`. Returns `false` if
    /// no review for that task is outstanding (already timed out, or never
    /// requested).
    pub async fn respond(&self, task_id: &TaskId, result: ReviewResult) -> bool {
        let mut outstanding = self.outstanding.lock().await;
        if let Some(pos) = outstanding.iter().position(|p| &p.request.task_id == task_id) {
            let pending = outstanding.remove(pos);
            let _ = pending.responder.send(result);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn respond_resolves_request_review() {
        let config = Arc::new(OrchestratorConfig::default());
        let service = Arc::new(HitlService::new(config));
        let task_id = TaskId::new("root.0");

        let svc = service.clone();
        let tid = task_id.clone();
        let handle = tokio::spawn(async move {
            svc.request_review(tid, Checkpoint::PlanGeneration, serde_json::json!({})).await
        });

        tokio::task::yield_now().await;
        assert!(service.respond(&task_id, ReviewResult::Approved { feedback: None }).await);

        let result = handle.await.unwrap().unwrap();
        matches!(result, ReviewResult::Approved { .. });
    }

    #[tokio::test]
    async fn timeout_without_auto_approve_is_an_error() {
        let mut cfg = OrchestratorConfig::default();
        cfg.hitl_timeout_seconds = 0;
        cfg.auto_approve_after_timeout = false;
        let service = HitlService::new(Arc::new(cfg));

        let result = service
            .request_review(TaskId::new("root.1"), Checkpoint::BeforeExecution, serde_json::json!({}))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn timeout_with_auto_approve_resolves_ok() {
        let mut cfg = OrchestratorConfig::default();
        cfg.hitl_timeout_seconds = 0;
        cfg.auto_approve_after_timeout = true;
        let service = HitlService::new(Arc::new(cfg));

        let result = service
            .request_review(TaskId::new("root.1"), Checkpoint::BeforeExecution, serde_json::json!({}))
            .await
            .unwrap();
        matches!(result, ReviewResult::Approved { .. });
    }
}
