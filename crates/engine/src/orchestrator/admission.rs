//! Bounded FIFO of pending requests with cooldown and single-flight checks.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use opencore_domain::{Rejection, RequesterId};

use super::guard::CooldownGuard;
use super::request::QueuedRequest;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Counters for status reporting and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionSnapshot {
    pub queued: usize,
    pub active: usize,
    pub cooling: usize,
}

struct AdmissionState {
    pending: VecDeque<QueuedRequest>,
    guard: CooldownGuard,
}

/// The shared queue, cooldown map and active set, behind one lock.
pub struct AdmissionQueue {
    capacity: usize,
    state: Mutex<AdmissionState>,
}

impl AdmissionQueue {
    pub fn new(capacity: usize, cooldown: std::time::Duration) -> Self {
        Self {
            capacity,
            state: Mutex::new(AdmissionState {
                pending: VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY)),
                guard: CooldownGuard::new(cooldown),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admit a request at the tail of the queue.
    ///
    /// On rejection the request is handed back untouched so the caller can
    /// answer its continuation outside the lock.
    pub fn admit(
        &self,
        request: QueuedRequest,
        now: DateTime<Utc>,
    ) -> Result<(), (Rejection, QueuedRequest)> {
        self.admit_and_then(request, now, |_| {})
    }

    /// Like [`admit`](Self::admit), running `on_admit` under the lock once the
    /// request is accepted and before it can be dequeued.
    pub fn admit_and_then(
        &self,
        request: QueuedRequest,
        now: DateTime<Utc>,
        on_admit: impl FnOnce(&QueuedRequest),
    ) -> Result<(), (Rejection, QueuedRequest)> {
        let mut state = self.lock();

        if let Some(requester) = request.requester_id {
            if let Some(remaining) = state.guard.remaining(requester, now) {
                let retry_after_secs = (remaining.num_milliseconds().max(0) as u64).div_ceil(1000);
                return Err((Rejection::CooldownActive { retry_after_secs }, request));
            }
            if state.guard.is_active(requester) {
                return Err((Rejection::AlreadyPending, request));
            }
        }

        if state.pending.len() >= self.capacity {
            let current = state.pending.len();
            return Err((
                Rejection::QueueFull {
                    current,
                    max: self.capacity,
                },
                request,
            ));
        }

        if let Some(requester) = request.requester_id {
            state.guard.activate(requester);
        }
        on_admit(&request);
        state.pending.push_back(request);
        Ok(())
    }

    /// Take the oldest pending request.
    pub fn pop_front(&self) -> Option<QueuedRequest> {
        self.lock().pending.pop_front()
    }

    /// Terminal outcome: leave the active set and stamp the cooldown.
    pub fn release(&self, requester: RequesterId, now: DateTime<Utc>) {
        self.lock().guard.release(requester, now);
    }

    /// Remove every pending request, freeing their requesters without a
    /// cooldown stamp. The caller answers the returned continuations.
    pub fn drain(&self) -> Vec<QueuedRequest> {
        let mut state = self.lock();
        let drained: Vec<_> = state.pending.drain(..).collect();
        for requester in drained.iter().filter_map(|r| r.requester_id) {
            state.guard.deactivate(requester);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_active(&self, requester: RequesterId) -> bool {
        self.lock().guard.is_active(requester)
    }

    pub fn is_blocked(&self, requester: RequesterId, now: DateTime<Utc>) -> bool {
        self.lock().guard.is_blocked(requester, now)
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        let state = self.lock();
        AdmissionSnapshot {
            queued: state.pending.len(),
            active: state.guard.active_count(),
            cooling: state.guard.cooldown_count(),
        }
    }
}
