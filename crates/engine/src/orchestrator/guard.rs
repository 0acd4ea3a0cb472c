//! Per-requester cooldown and single-flight bookkeeping.
//!
//! Not synchronized on its own: the admission queue keeps it under the same
//! lock as the pending FIFO so that check-then-insert at admission can never
//! interleave with a release from the result router.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use opencore_domain::RequesterId;

/// Default cooldown after a completed request.
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;

#[derive(Debug)]
pub struct CooldownGuard {
    window: Duration,
    last_completed: HashMap<RequesterId, DateTime<Utc>>,
    active: HashSet<RequesterId>,
}

impl CooldownGuard {
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            window: Duration::from_std(window).unwrap_or(Duration::zero()),
            last_completed: HashMap::new(),
            active: HashSet::new(),
        }
    }

    /// True while `now - last_completed < window`.
    pub fn is_blocked(&self, requester: RequesterId, now: DateTime<Utc>) -> bool {
        self.remaining(requester, now).is_some()
    }

    /// Time left in the requester's cooldown, if any.
    pub fn remaining(&self, requester: RequesterId, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_completed.get(&requester)?;
        let elapsed = now - *last;
        (elapsed < self.window).then(|| self.window - elapsed)
    }

    pub fn is_active(&self, requester: RequesterId) -> bool {
        self.active.contains(&requester)
    }

    /// Mark the requester as holding an outstanding request.
    ///
    /// Returns false if it already held one.
    pub fn activate(&mut self, requester: RequesterId) -> bool {
        self.active.insert(requester)
    }

    /// Terminal outcome for the requester: leave the active set and start the
    /// cooldown. Failures stamp the cooldown exactly like successes.
    pub fn release(&mut self, requester: RequesterId, now: DateTime<Utc>) {
        self.active.remove(&requester);
        self.last_completed.insert(requester, now);
    }

    /// Leave the active set without stamping a completion. Used when a
    /// request is cancelled before it was ever sent.
    pub fn deactivate(&mut self, requester: RequesterId) {
        self.active.remove(&requester);
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn cooldown_count(&self) -> usize {
        self.last_completed.len()
    }
}
