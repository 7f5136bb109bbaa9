use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ApprovalError;

/// Lifetime of a headless approval request
pub const HEADLESS_APPROVAL_TTL: Duration = Duration::from_secs(5 * 60);

/// Settled outcomes kept for late waiters
const UNCLAIMED_LIMIT: usize = 8;

type Outcome = Result<(), ApprovalError>;

/// Out-of-band approval a non-interactive caller waits on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadlessApprovalRequest {
    pub id: String,
    /// Unix millis
    pub created_at: u64,
    /// Unix millis
    pub expires_at: u64,
}

struct Pending {
    request: HeadlessApprovalRequest,
    sender: oneshot::Sender<Outcome>,
    receiver: Option<oneshot::Receiver<Outcome>>,
    timer: Option<JoinHandle<()>>,
}

struct Unclaimed {
    id: String,
    settled_at: Instant,
    receiver: oneshot::Receiver<Outcome>,
}

#[derive(Default)]
struct Slots {
    pending: Option<Pending>,
    /// Settled before anyone waited; kept for one TTL so a late `wait`
    /// still sees it. Oldest first.
    unclaimed: VecDeque<Unclaimed>,
}

impl Slots {
    fn evict_unclaimed(&mut self, ttl: Duration) {
        let before = self.unclaimed.len();
        self.unclaimed.retain(|entry| entry.settled_at.elapsed() < ttl);
        while self.unclaimed.len() > UNCLAIMED_LIMIT {
            self.unclaimed.pop_front();
        }
        let evicted = before - self.unclaimed.len();
        if evicted > 0 {
            debug!(evicted, "dropped unclaimed headless outcomes");
        }
    }

    fn claim(&mut self, id: &str) -> Option<oneshot::Receiver<Outcome>> {
        let index = self.unclaimed.iter().position(|entry| entry.id == id)?;
        self.unclaimed.remove(index).map(|entry| entry.receiver)
    }
}

/// Single-slot registry of headless approvals.
///
/// At most one request is pending at a time. A spawned timer rejects it
/// with [`ApprovalError::Expired`] once the TTL elapses.
#[derive(Clone)]
pub struct HeadlessApprovals {
    slots: Arc<Mutex<Slots>>,
    ttl: Duration,
}

impl Default for HeadlessApprovals {
    fn default() -> Self {
        Self::new(HEADLESS_APPROVAL_TTL)
    }
}

impl HeadlessApprovals {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots::default())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a request; refused while another one is pending.
    /// Must be called from within a tokio runtime.
    pub fn create(&self) -> Result<HeadlessApprovalRequest, ApprovalError> {
        let mut slots = self.slots();
        slots.evict_unclaimed(self.ttl);
        if let Some(pending) = &slots.pending {
            return Err(ApprovalError::AlreadyPending {
                id: pending.request.id.clone(),
            });
        }

        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let request = HeadlessApprovalRequest {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            expires_at: now + self.ttl.as_millis() as u64,
        };

        let timer = {
            let approvals = self.clone();
            let id = request.id.clone();
            let ttl = self.ttl;
            tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                if approvals.settle(&id, Err(ApprovalError::Expired(id.clone()))) {
                    warn!(request_id = %id, "headless approval expired");
                }
            })
        };

        let (sender, receiver) = oneshot::channel();
        slots.pending = Some(Pending {
            request: request.clone(),
            sender,
            receiver: Some(receiver),
            timer: Some(timer),
        });
        info!(request_id = %request.id, expires_at = request.expires_at, "headless approval created");
        Ok(request)
    }

    pub fn pending(&self) -> Option<HeadlessApprovalRequest> {
        self.slots().pending.as_ref().map(|p| p.request.clone())
    }

    /// Wait for `id` to be resolved, rejected or to expire. Single-use.
    pub async fn wait(&self, id: &str) -> Result<(), ApprovalError> {
        let receiver = {
            let mut slots = self.slots();
            slots.evict_unclaimed(self.ttl);
            let from_pending = slots
                .pending
                .as_mut()
                .filter(|p| p.request.id == id)
                .and_then(|p| p.receiver.take());
            match from_pending {
                Some(receiver) => receiver,
                None => slots
                    .claim(id)
                    .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?,
            }
        };
        receiver.await.unwrap_or(Err(ApprovalError::Dropped))
    }

    pub fn resolve(&self, id: &str) -> Result<(), ApprovalError> {
        if !self.settle(id, Ok(())) {
            return Err(ApprovalError::NotFound(id.to_string()));
        }
        info!(request_id = %id, "headless approval resolved");
        Ok(())
    }

    pub fn reject(&self, id: &str, reason: impl Into<String>) -> Result<(), ApprovalError> {
        let reason = reason.into();
        if !self.settle(id, Err(ApprovalError::Rejected { reason: reason.clone() })) {
            return Err(ApprovalError::NotFound(id.to_string()));
        }
        info!(request_id = %id, reason = %reason, "headless approval rejected");
        Ok(())
    }

    /// Free the slot and deliver `outcome`. False if `id` is not pending.
    fn settle(&self, id: &str, outcome: Outcome) -> bool {
        let mut slots = self.slots();
        if slots.pending.as_ref().map(|p| p.request.id.as_str()) != Some(id) {
            return false;
        }
        let Some(mut pending) = slots.pending.take() else {
            return false;
        };

        if let Some(timer) = pending.timer.take() {
            // no-op when called from the timer itself, which is finishing anyway
            timer.abort();
        }
        // a dropped waiter is fine; the outcome is simply unobserved
        let _ = pending.sender.send(outcome);
        if let Some(receiver) = pending.receiver.take() {
            slots.unclaimed.push_back(Unclaimed {
                id: id.to_string(),
                settled_at: Instant::now(),
                receiver,
            });
        }
        slots.evict_unclaimed(self.ttl);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_wakes_waiter() {
        let approvals = HeadlessApprovals::default();
        let request = approvals.create().unwrap();
        assert_eq!(request.expires_at - request.created_at, 5 * 60 * 1000);

        let waiter = {
            let approvals = approvals.clone();
            let id = request.id.clone();
            tokio::spawn(async move { approvals.wait(&id).await })
        };
        tokio::task::yield_now().await;
        approvals.resolve(&request.id).unwrap();

        assert_eq!(waiter.await.unwrap(), Ok(()));
        assert!(approvals.pending().is_none());
    }

    #[tokio::test]
    async fn test_expires_without_resolution() {
        let approvals = HeadlessApprovals::new(Duration::from_millis(30));
        let request = approvals.create().unwrap();

        assert_eq!(
            approvals.wait(&request.id).await,
            Err(ApprovalError::Expired(request.id.clone()))
        );
        assert_eq!(
            approvals.resolve(&request.id),
            Err(ApprovalError::NotFound(request.id))
        );
    }

    #[tokio::test]
    async fn test_only_one_pending() {
        let approvals = HeadlessApprovals::default();
        let first = approvals.create().unwrap();

        assert_eq!(
            approvals.create(),
            Err(ApprovalError::AlreadyPending { id: first.id.clone() })
        );

        approvals.reject(&first.id, "denied").unwrap();
        assert_eq!(
            approvals.wait(&first.id).await,
            Err(ApprovalError::Rejected { reason: "denied".into() })
        );
        assert!(approvals.create().is_ok());
    }

    #[tokio::test]
    async fn test_unclaimed_outcomes_are_bounded() {
        let approvals = HeadlessApprovals::default();
        for _ in 0..50 {
            let request = approvals.create().unwrap();
            approvals.resolve(&request.id).unwrap();
        }
        assert_eq!(approvals.slots().unclaimed.len(), UNCLAIMED_LIMIT);

        let short = HeadlessApprovals::new(Duration::from_millis(1));
        for _ in 0..50 {
            let request = short.create().unwrap();
            tokio::time::sleep(Duration::from_millis(3)).await;
            assert!(short.pending().is_none(), "{} should have expired", request.id);
        }
        assert!(short.slots().unclaimed.len() <= 1);
    }

    #[tokio::test]
    async fn test_late_wait_after_ttl_is_not_found() {
        let approvals = HeadlessApprovals::new(Duration::from_millis(20));
        let request = approvals.create().unwrap();
        approvals.resolve(&request.id).unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(
            approvals.wait(&request.id).await,
            Err(ApprovalError::NotFound(request.id))
        );
    }

    #[tokio::test]
    async fn test_single_use() {
        let approvals = HeadlessApprovals::default();
        let request = approvals.create().unwrap();
        approvals.resolve(&request.id).unwrap();

        assert_eq!(approvals.wait(&request.id).await, Ok(()));
        assert_eq!(
            approvals.wait(&request.id).await,
            Err(ApprovalError::NotFound(request.id))
        );
    }
}
