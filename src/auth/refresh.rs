//! Single-flight coordination of session refreshes.
//!
//! The coordinator owns the refresh state machine (`Idle` / `Refreshing`) and
//! the queue of requests waiting on an in-flight refresh. It performs no I/O:
//! the caller that wins [`RefreshCoordinator::begin`] runs the refresh and
//! reports the outcome through its [`RefreshGuard`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::RefreshError;

/// Result delivered to every request released from the queue: the new access
/// token, or the failure that ended the session
pub type RefreshOutcome = Result<String, RefreshError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshState {
    Idle,
    Refreshing { started_at: Instant },
}

struct PendingRequest {
    id: Uuid,
    sender: oneshot::Sender<RefreshOutcome>,
}

struct CoordinatorInner {
    state: RefreshState,
    pending: VecDeque<PendingRequest>,
    /// Bumped every time a refresh settles
    epoch: u64,
    /// Access token produced by the last refresh, cleared when one fails
    issued: Option<String>,
    refreshes_started: u64,
}

/// Snapshot of the coordinator for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    pub refreshing: bool,
    pub pending: usize,
    pub epoch: u64,
    pub refreshes_started: u64,
}

/// What a request that just saw a 401 should do next
pub enum Ticket {
    /// No refresh is running; the holder must perform one and settle the guard
    Leader(RefreshGuard),
    /// A refresh is running; wait for its outcome
    Follower(Waiter),
    /// A refresh settled after the request was sent; replay with the current
    /// token instead of refreshing again
    Rotated,
}

/// Mutual exclusion for refresh attempts plus the FIFO queue of blocked
/// requests. Cloning shares the same state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Mutex<CoordinatorInner>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CoordinatorInner {
                state: RefreshState::Idle,
                pending: VecDeque::new(),
                epoch: 0,
                issued: None,
                refreshes_started: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorInner> {
        // Nothing panics while the lock is held; recover the data regardless
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Epoch to capture before sending a request; passed back to [`begin`]
    ///
    /// [`begin`]: RefreshCoordinator::begin
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Decide how a request that was sent during `seen_epoch` with
    /// `sent_token` and came back 401 should recover. The check and the state
    /// transition happen under one lock, so exactly one caller becomes the
    /// leader.
    ///
    /// A request counts as stale only when a refresh settled since it was
    /// sent and it did not already carry the token that refresh issued.
    pub fn begin(&self, seen_epoch: u64, sent_token: Option<&str>) -> Ticket {
        let mut inner = self.lock();
        let state = inner.state;

        match state {
            RefreshState::Refreshing { .. } => {
                let (sender, receiver) = oneshot::channel();
                let id = Uuid::new_v4();
                inner.pending.push_back(PendingRequest { id, sender });
                debug!(
                    request_id = %id,
                    queued = inner.pending.len(),
                    "Refresh in flight, queueing request"
                );
                Ticket::Follower(Waiter { id, receiver })
            }
            RefreshState::Idle
                if inner.epoch != seen_epoch && inner.issued.as_deref() != sent_token =>
            {
                trace!(
                    seen_epoch,
                    epoch = inner.epoch,
                    "Session refreshed since request was sent"
                );
                Ticket::Rotated
            }
            RefreshState::Idle => {
                inner.state = RefreshState::Refreshing {
                    started_at: Instant::now(),
                };
                inner.refreshes_started += 1;
                Ticket::Leader(RefreshGuard {
                    coordinator: self.clone(),
                    settled: false,
                })
            }
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.lock().state, RefreshState::Refreshing { .. })
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn stats(&self) -> RefreshStats {
        let inner = self.lock();
        RefreshStats {
            refreshing: matches!(inner.state, RefreshState::Refreshing { .. }),
            pending: inner.pending.len(),
            epoch: inner.epoch,
            refreshes_started: inner.refreshes_started,
        }
    }

    /// Return to `Idle` and release the queue in arrival order.
    /// Returns the ids of the released requests, in release order.
    fn settle(&self, outcome: &RefreshOutcome) -> Vec<Uuid> {
        let (drained, elapsed) = {
            let mut inner = self.lock();
            let elapsed = match inner.state {
                RefreshState::Refreshing { started_at } => Some(started_at.elapsed()),
                RefreshState::Idle => None,
            };
            inner.state = RefreshState::Idle;
            inner.epoch += 1;
            inner.issued = outcome.as_ref().ok().cloned();
            (std::mem::take(&mut inner.pending), elapsed)
        };

        let mut released = Vec::with_capacity(drained.len());
        for pending in drained {
            // A receiver that was dropped just means its caller gave up
            if pending.sender.send(outcome.clone()).is_err() {
                trace!(request_id = %pending.id, "Queued request no longer waiting");
            }
            released.push(pending.id);
        }

        debug!(
            released = released.len(),
            success = outcome.is_ok(),
            elapsed_ms = elapsed.map(|d| d.as_millis() as u64),
            "Refresh settled"
        );
        released
    }
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by the leader for the duration of a refresh.
///
/// Dropping the guard without calling [`settle`](RefreshGuard::settle)
/// (cancellation, panic) still returns the coordinator to `Idle` and rejects
/// every queued request with [`RefreshError::Abandoned`].
pub struct RefreshGuard {
    coordinator: RefreshCoordinator,
    settled: bool,
}

impl RefreshGuard {
    /// Publish the refresh outcome to every queued request
    pub fn settle(mut self, outcome: &RefreshOutcome) -> Vec<Uuid> {
        self.settled = true;
        self.coordinator.settle(outcome)
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Refresh dropped before completion, releasing queued requests");
            self.coordinator.settle(&Err(RefreshError::Abandoned));
        }
    }
}

/// A queued request waiting for the in-flight refresh
pub struct Waiter {
    id: Uuid,
    receiver: oneshot::Receiver<RefreshOutcome>,
}

impl Waiter {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn wait(self) -> RefreshOutcome {
        self.receiver
            .await
            .unwrap_or(Err(RefreshError::Abandoned))
    }
}
