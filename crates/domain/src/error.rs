//! Admission errors reported synchronously to callers of the engine.
//!
//! None of these ever reach the dispatch queue or the audit trail as a
//! "sent" event: a rejected submission simply never existed as far as the
//! external endpoint is concerned.

use thiserror::Error;

/// Why a submission was turned away at the door.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The pending queue is at capacity (backpressure).
    #[error("LLM queue full: {current}/{max} requests pending")]
    QueueFull { current: usize, max: usize },

    /// The requester completed a request too recently.
    #[error("Requester is cooling down, retry in {retry_after_secs}s")]
    CooldownActive { retry_after_secs: u64 },

    /// The requester already has a request queued or in flight.
    #[error("Requester already has a pending request")]
    AlreadyPending,

    /// No prompt template is registered under this name.
    #[error("Unknown policy: {0}")]
    UnknownPolicy(String),
}

impl Rejection {
    /// Create an UnknownPolicy rejection.
    pub fn unknown_policy(name: impl Into<String>) -> Self {
        Self::UnknownPolicy(name.into())
    }

    /// Short machine-readable code, used in logs and status payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::QueueFull { .. } => "queue_full",
            Self::CooldownActive { .. } => "cooldown_active",
            Self::AlreadyPending => "already_pending",
            Self::UnknownPolicy(_) => "unknown_policy",
        }
    }
}
