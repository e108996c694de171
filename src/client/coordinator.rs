//! Single-flight token refresh coordination.
//!
//! One [`RefreshCoordinator`] is shared by every clone of a
//! [`Client`](super::Client). The first request that fails with `401` becomes
//! the refresh leader; requests failing while the refresh is in flight are
//! queued as [`PendingRequest`] values and settled in FIFO order once the
//! leader reports the outcome.
//!
//! ```text
//!   Idle ──401──▶ Refreshing ──settled──▶ Draining ──queue empty──▶ Idle
//!                   ▲    │                   ▲   │
//!                   └401─┘ (enqueue)         └401┘ (enqueue, settled with the same outcome)
//! ```
//!
//! The state lock is only held for synchronous check-and-set sections, never
//! across an `.await`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

use super::HttpRequest;
use super::transport::ResponseFuture;
use crate::{Error, ErrorKind, Result};

/// Observable phase of the refresh protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Refreshing,
    Draining,
}

/// A request that failed with `401` and waits for the refresh outcome.
pub(crate) struct PendingRequest {
    request: HttpRequest,
    original: Error,
    completion: oneshot::Sender<Completion>,
}

impl PendingRequest {
    /// The caller stopped waiting (its future was dropped).
    pub(crate) fn is_abandoned(&self) -> bool {
        self.completion.is_closed()
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.request.id)
            .field("method", &self.request.method)
            .field("path", &self.request.path)
            .finish()
    }
}

/// What a queued caller receives when the refresh settles.
pub(crate) enum Completion {
    /// Replay already issued with the new token.
    Replay(ResponseFuture),
    Reject(Error),
}

/// Why a refresh did not produce a new access token.
#[derive(Debug)]
pub(crate) enum RefreshFailure {
    /// The leader's caller aborted. Credentials are kept.
    Cancelled,
    /// Network failure, timeout or a non-`401` status. Credentials are kept.
    Transient(Error),
    /// The backend rejected the refresh token. The session is over.
    Invalid(Error),
}

impl RefreshFailure {
    pub(crate) fn classify(error: Error) -> Self {
        match error.kind() {
            ErrorKind::Cancelled => RefreshFailure::Cancelled,
            ErrorKind::AuthExpired => RefreshFailure::Invalid(error),
            _ => RefreshFailure::Transient(error),
        }
    }

    pub(crate) fn ends_session(&self) -> bool {
        matches!(self, RefreshFailure::Invalid(_))
    }
}

#[derive(Default)]
enum RefreshState {
    #[default]
    Idle,
    Refreshing { waiters: VecDeque<PendingRequest> },
    Draining { waiters: VecDeque<PendingRequest> },
}

impl RefreshState {
    fn phase(&self) -> RefreshPhase {
        match self {
            RefreshState::Idle => RefreshPhase::Idle,
            RefreshState::Refreshing { .. } => RefreshPhase::Refreshing,
            RefreshState::Draining { .. } => RefreshPhase::Draining,
        }
    }
}

/// Result of reporting a `401` to the coordinator.
pub(crate) enum Admission {
    /// No refresh was running; the caller must perform it and settle `leader`.
    Leader {
        leader: RefreshLeader,
        request: HttpRequest,
        original: Error,
    },
    /// A refresh is running; await the completion.
    Queued(oneshot::Receiver<Completion>),
}

/// Single-flight refresh state shared by every clone of a
/// [`Client`](super::Client).
///
/// Only the phase and counters are public. Admission and settlement stay
/// inside the client:
///
/// ```compile_fail
/// use species_gateway::client::RefreshLeader;
/// ```
#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    refreshes: AtomicU64,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("phase", &self.phase())
            .field("waiting", &self.waiting())
            .field("refreshes", &self.refreshes())
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn phase(&self) -> RefreshPhase {
        self.lock().phase()
    }

    /// Number of queued requests.
    pub fn waiting(&self) -> usize {
        match &*self.lock() {
            RefreshState::Refreshing { waiters } | RefreshState::Draining { waiters } => {
                waiters.len()
            }
            RefreshState::Idle => 0,
        }
    }

    /// Number of refresh cycles started so far.
    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Report a request that failed with `401`.
    pub(crate) fn admit(self: &Arc<Self>, request: HttpRequest, original: Error) -> Admission {
        let mut state = self.lock();
        match &mut *state {
            RefreshState::Refreshing { waiters } | RefreshState::Draining { waiters } => {
                let (tx, rx) = oneshot::channel();
                tracing::debug!(
                    request_id = %request.id,
                    path = %request.path,
                    position = waiters.len(),
                    "Refresh in flight, queueing request"
                );
                waiters.push_back(PendingRequest {
                    request,
                    original,
                    completion: tx,
                });
                Admission::Queued(rx)
            }
            idle @ RefreshState::Idle => {
                *idle = RefreshState::Refreshing {
                    waiters: VecDeque::new(),
                };
                self.refreshes.fetch_add(1, Ordering::SeqCst);
                Admission::Leader {
                    leader: RefreshLeader {
                        coordinator: Arc::clone(self),
                        settled: false,
                    },
                    request,
                    original,
                }
            }
        }
    }

    fn begin_drain(&self) {
        let mut state = self.lock();
        let waiters = match std::mem::take(&mut *state) {
            RefreshState::Refreshing { waiters } => waiters,
            _ => VecDeque::new(),
        };
        *state = RefreshState::Draining { waiters };
    }

    /// Pop the next waiter, or return to `Idle` once the queue is empty.
    ///
    /// Emptiness check and the transition happen under one lock so a request
    /// admitted while draining is never stranded.
    fn next_waiter(&self) -> Option<PendingRequest> {
        let mut state = self.lock();
        let next = match &mut *state {
            RefreshState::Draining { waiters } => waiters.pop_front(),
            _ => None,
        };
        if next.is_none() {
            *state = RefreshState::Idle;
        }
        next
    }

    fn drain(&self, mut settle: impl FnMut(PendingRequest) -> bool) -> usize {
        self.begin_drain();
        let mut settled = 0;
        while let Some(pending) = self.next_waiter() {
            if pending.is_abandoned() {
                tracing::debug!(
                    request_id = %pending.request.id,
                    "Skipping abandoned request"
                );
                continue;
            }
            if settle(pending) {
                settled += 1;
            }
        }
        settled
    }
}

/// Held by the request performing the refresh.
///
/// Must be settled with [`replay`](Self::replay) or [`reject`](Self::reject).
/// Dropping it unsettled (the leader's future was dropped mid-refresh) rejects
/// every waiter, the same as a cancelled refresh.
pub(crate) struct RefreshLeader {
    coordinator: Arc<RefreshCoordinator>,
    settled: bool,
}

impl RefreshLeader {
    /// Settle successfully: issue each waiter's replay in FIFO order.
    ///
    /// Returns the number of replays handed out.
    pub(crate) fn replay(mut self, mut issue: impl FnMut(&HttpRequest) -> Result<ResponseFuture>) -> usize {
        self.settled = true;
        self.coordinator.drain(|pending| {
            let PendingRequest {
                request,
                completion,
                ..
            } = pending;

            let outcome = if request.is_cancelled() {
                Completion::Reject(Error::Cancelled)
            } else {
                match issue(&request) {
                    Ok(future) => Completion::Replay(future),
                    Err(e) => Completion::Reject(e),
                }
            };
            completion.send(outcome).is_ok()
        })
    }

    /// Settle unsuccessfully: every waiter gets its own original error back.
    pub(crate) fn reject(mut self) -> usize {
        self.settled = true;
        reject_all(&self.coordinator)
    }
}

fn reject_all(coordinator: &RefreshCoordinator) -> usize {
    coordinator.drain(|pending| {
        let PendingRequest {
            request,
            original,
            completion,
        } = pending;

        let error = if request.is_cancelled() {
            Error::Cancelled
        } else {
            original
        };
        completion.send(Completion::Reject(error)).is_ok()
    })
}

impl Drop for RefreshLeader {
    fn drop(&mut self) {
        if !self.settled {
            let rejected = reject_all(&self.coordinator);
            tracing::warn!(rejected, "Refresh abandoned before completion");
        }
    }
}
