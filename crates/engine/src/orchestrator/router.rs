//! Terminal-outcome handling: validate, release, audit, then answer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use opencore_domain::{Answer, RequestOutcome};

use crate::infrastructure::ports::{AuditResponse, ClockPort};

use super::admission::AdmissionQueue;
use super::dispatcher::DispatchOutcome;
use super::journal::AuditJournal;
use super::request::{Continuation, QueuedRequest};
use super::schema::SchemaRegistry;

const NO_LATENCY: u64 = u64::MAX;

/// An answer ready to be handed to its continuation.
///
/// Split from routing so the scheduler can clear its busy flag before user
/// code runs.
#[derive(Debug)]
#[must_use = "a delivery must be delivered"]
pub struct Delivery {
    continuation: Continuation,
    answer: Answer,
    outcome: RequestOutcome,
}

impl Delivery {
    pub fn outcome(&self) -> RequestOutcome {
        self.outcome
    }

    pub fn deliver(self) {
        self.continuation.fire(self.answer);
    }
}

pub struct ResultRouter {
    queue: Arc<AdmissionQueue>,
    schemas: Arc<SchemaRegistry>,
    journal: AuditJournal,
    clock: Arc<dyn ClockPort>,
    last_latency_ms: AtomicU64,
}

impl ResultRouter {
    pub fn new(
        queue: Arc<AdmissionQueue>,
        schemas: Arc<SchemaRegistry>,
        journal: AuditJournal,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            queue,
            schemas,
            journal,
            clock,
            last_latency_ms: AtomicU64::new(NO_LATENCY),
        }
    }

    /// Latency of the most recent successful endpoint call.
    pub fn last_latency_ms(&self) -> Option<u64> {
        match self.last_latency_ms.load(Ordering::Relaxed) {
            NO_LATENCY => None,
            ms => Some(ms),
        }
    }

    /// Settle a dispatched request. The requester is released and the
    /// cooldown stamped whatever the outcome.
    pub fn route(&self, request: QueuedRequest, outcome: DispatchOutcome) -> Delivery {
        let QueuedRequest {
            id,
            requester_id,
            policy,
            continuation,
            ..
        } = request;
        let attempts = outcome.attempts();

        let (answer, marker, raw, error, latency_ms) = match outcome {
            DispatchOutcome::Success {
                answer, latency_ms, ..
            } => {
                self.last_latency_ms.store(latency_ms, Ordering::Relaxed);
                let checked = policy
                    .as_deref()
                    .map(|name| self.schemas.validate(name, &answer))
                    .transpose();
                match checked {
                    Ok(_) => (
                        Some(answer.clone()),
                        RequestOutcome::Success,
                        Some(answer),
                        None,
                        Some(latency_ms),
                    ),
                    Err(violation) => {
                        tracing::error!(
                            request_id = %id,
                            policy = policy.as_deref().unwrap_or_default(),
                            error = %violation,
                            "LLM response failed schema validation"
                        );
                        (
                            None,
                            RequestOutcome::ValidationFailed,
                            Some(answer),
                            Some(violation.to_string()),
                            Some(latency_ms),
                        )
                    }
                }
            }
            DispatchOutcome::Fatal { error, .. } => {
                (None, RequestOutcome::Failed, None, Some(error.to_string()), None)
            }
        };

        let now = self.clock.now();
        if let Some(requester) = requester_id {
            self.queue.release(requester, now);
        }

        self.journal.response(AuditResponse {
            request_id: id,
            response: raw,
            outcome: marker,
            attempts,
            latency_ms,
            error,
            completed_at: now,
        });

        tracing::info!(
            request_id = %id,
            outcome = %marker,
            attempts,
            "LLM request completed"
        );

        Delivery {
            continuation,
            answer,
            outcome: marker,
        }
    }

    /// Settle a request that never reached the endpoint (shutdown). Its
    /// requester was already freed by the drain.
    pub fn cancel(&self, request: QueuedRequest) -> Delivery {
        self.journal.response(AuditResponse {
            request_id: request.id,
            response: None,
            outcome: RequestOutcome::Cancelled,
            attempts: 0,
            latency_ms: None,
            error: None,
            completed_at: self.clock.now(),
        });
        Delivery {
            continuation: request.continuation,
            answer: None,
            outcome: RequestOutcome::Cancelled,
        }
    }
}
