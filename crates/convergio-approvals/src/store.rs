use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use convergio_types::new_id;
use tokio::sync::{Notify, RwLock};

use crate::error::{ApprovalError, ApprovalResult};
use crate::types::{ApprovalRequest, ApprovalStatus, AwaitOutcome, Decision, NewApprovalRequest};

/// In-memory HITL approval store (C7). One pending request per conversation
/// is enforced at `create` time; `await_decision` blocks the calling turn
/// on a per-request `Notify` until `decide` fires it or the timeout elapses,
/// at which point the request is marked `Expired` and treated as rejected
/// (§12 open-question decision #1).
///
/// Concurrency follows the same `Arc<RwLock<HashMap<..>>>` shape as
/// `convergio_breaker::CircuitBreaker`'s scope map: short critical sections,
/// no lock held across an await point that isn't the `Notify` wait itself.
#[derive(Default)]
pub struct ApprovalStore {
    requests: RwLock<HashMap<String, ApprovalRequest>>,
    pending_by_conv: RwLock<HashMap<String, String>>,
    notifiers: RwLock<HashMap<String, Arc<Notify>>>,
}

impl ApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending approval request. Fails if `new.conv_id` already
    /// has one outstanding (§3 invariant).
    pub async fn create(&self, new: NewApprovalRequest) -> ApprovalResult<String> {
        let mut pending_by_conv = self.pending_by_conv.write().await;
        if pending_by_conv.contains_key(&new.conv_id) {
            return Err(ApprovalError::AlreadyPending(new.conv_id.clone()));
        }

        let id = new_id("appr");
        let request = ApprovalRequest {
            id: id.clone(),
            conv_id: new.conv_id.clone(),
            turn_index: new.turn_index,
            action_type: new.action_type,
            payload: new.payload,
            risk_level: new.risk_level,
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
            approver_id: None,
            notes: None,
        };

        pending_by_conv.insert(new.conv_id, id.clone());
        self.requests.write().await.insert(id.clone(), request);
        self.notifiers.write().await.insert(id.clone(), Arc::new(Notify::new()));

        tracing::info!(approval_id = %id, "approval request created");
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> ApprovalResult<ApprovalRequest> {
        self.requests
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))
    }

    /// True if `conv_id` currently has an outstanding pending request.
    pub async fn has_pending(&self, conv_id: &str) -> bool {
        self.pending_by_conv.read().await.contains_key(conv_id)
    }

    /// Record a terminal human decision. Idempotent: calling this again on
    /// an already-terminal request is a no-op that returns the existing
    /// record rather than erroring (§8 round-trip property).
    pub async fn decide(
        &self,
        id: &str,
        approver_id: impl Into<String>,
        decision: Decision,
        notes: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        let mut requests = self.requests.write().await;
        let request = requests.get_mut(id).ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;

        if request.status.is_terminal() {
            return Ok(request.clone());
        }

        request.status = match decision {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Reject => ApprovalStatus::Rejected,
        };
        request.decided_at = Some(Utc::now());
        request.approver_id = Some(approver_id.into());
        request.notes = notes;
        let result = request.clone();
        drop(requests);

        self.pending_by_conv.write().await.remove(&result.conv_id);
        if let Some(notify) = self.notifiers.read().await.get(id) {
            notify.notify_waiters();
            notify.notify_one();
        }

        tracing::info!(approval_id = %id, status = ?result.status, "approval decided");
        Ok(result)
    }

    /// Block until `id` is decided or `timeout` elapses. On timeout, marks
    /// the request `Expired` and returns `Expired` (treated as rejection by
    /// the orchestrator).
    pub async fn await_decision(&self, id: &str, timeout: Duration) -> ApprovalResult<AwaitOutcome> {
        let notify = self
            .notifiers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;

        if let Some(outcome) = self.terminal_outcome(id).await? {
            return Ok(outcome);
        }

        let notified = notify.notified();
        tokio::pin!(notified);
        match tokio::time::timeout(timeout, &mut notified).await {
            Ok(()) => self
                .terminal_outcome(id)
                .await?
                .ok_or_else(|| ApprovalError::NotFound(id.to_string())),
            Err(_elapsed) => self.expire(id).await,
        }
    }

    async fn terminal_outcome(&self, id: &str) -> ApprovalResult<Option<AwaitOutcome>> {
        let request = self.get(id).await?;
        Ok(match request.status {
            ApprovalStatus::Pending => None,
            ApprovalStatus::Approved => Some(AwaitOutcome::Approved),
            ApprovalStatus::Rejected => Some(AwaitOutcome::Rejected),
            ApprovalStatus::Expired => Some(AwaitOutcome::Expired),
        })
    }

    async fn expire(&self, id: &str) -> ApprovalResult<AwaitOutcome> {
        let mut requests = self.requests.write().await;
        let request = requests.get_mut(id).ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;
        if request.status.is_terminal() {
            return Ok(match request.status {
                ApprovalStatus::Approved => AwaitOutcome::Approved,
                ApprovalStatus::Rejected => AwaitOutcome::Rejected,
                _ => AwaitOutcome::Expired,
            });
        }
        request.status = ApprovalStatus::Expired;
        request.decided_at = Some(Utc::now());
        let conv_id = request.conv_id.clone();
        drop(requests);
        self.pending_by_conv.write().await.remove(&conv_id);
        tracing::warn!(approval_id = %id, "approval request expired");
        Ok(AwaitOutcome::Expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergio_safety::RiskLevel;

    fn new_request(conv_id: &str) -> NewApprovalRequest {
        NewApprovalRequest {
            conv_id: conv_id.to_string(),
            turn_index: 1,
            action_type: "delete_records".to_string(),
            payload: serde_json::json!({"table": "customers"}),
            risk_level: RiskLevel::High,
        }
    }

    #[tokio::test]
    async fn second_pending_request_for_same_conversation_is_rejected() {
        let store = ApprovalStore::new();
        store.create(new_request("conv-1")).await.unwrap();
        let err = store.create(new_request("conv-1")).await.unwrap_err();
        assert!(matches!(err, ApprovalError::AlreadyPending(_)));
    }

    #[tokio::test]
    async fn decide_approve_resolves_pending_await() {
        let store = Arc::new(ApprovalStore::new());
        let id = store.create(new_request("conv-1")).await.unwrap();

        let waiter_store = store.clone();
        let waiter_id = id.clone();
        let waiter = tokio::spawn(async move {
            waiter_store.await_decision(&waiter_id, Duration::from_secs(5)).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        store.decide(&id, "manager-1", Decision::Approve, None).await.unwrap();

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome, AwaitOutcome::Approved);
        assert!(!store.has_pending("conv-1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn await_decision_times_out_and_expires() {
        let store = ApprovalStore::new();
        let id = store.create(new_request("conv-1")).await.unwrap();

        let outcome = store.await_decision(&id, Duration::from_secs(30)).await.unwrap();
        assert_eq!(outcome, AwaitOutcome::Expired);

        let request = store.get(&id).await.unwrap();
        assert_eq!(request.status, ApprovalStatus::Expired);
        assert!(!store.has_pending("conv-1").await);
    }

    #[tokio::test]
    async fn decide_is_idempotent_on_terminal_state() {
        let store = ApprovalStore::new();
        let id = store.create(new_request("conv-1")).await.unwrap();
        let first = store.decide(&id, "a", Decision::Reject, None).await.unwrap();
        let second = store.decide(&id, "b", Decision::Approve, None).await.unwrap();
        assert_eq!(first.status, second.status);
        assert_eq!(second.approver_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn conversation_can_open_a_new_request_after_the_first_resolves() {
        let store = ApprovalStore::new();
        let id = store.create(new_request("conv-1")).await.unwrap();
        store.decide(&id, "a", Decision::Approve, None).await.unwrap();
        let second = store.create(new_request("conv-1")).await;
        assert!(second.is_ok());
    }
}
