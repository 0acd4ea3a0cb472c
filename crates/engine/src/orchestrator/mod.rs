//! LLM request orchestration.
//!
//! Callers submit prompts (raw or via a named policy template). Submissions
//! pass admission control (cooldown, single-flight, capacity), wait in a FIFO
//! queue and are sent one at a time by a periodic scheduler. Every accepted
//! submission is answered exactly once, with the model's text or `None`.

pub mod admission;
pub mod dispatcher;
pub mod guard;
pub mod journal;
pub mod policy;
pub mod request;
pub mod router;
pub mod scheduler;
pub mod schema;


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use opencore_domain::{Rejection, RequesterId};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::ports::{AuditPort, AuditRequest, ClockPort, LlmPort};

pub use admission::{AdmissionQueue, AdmissionSnapshot, DEFAULT_QUEUE_CAPACITY};
pub use dispatcher::{DispatchConfig, DispatchOutcome, Dispatcher};
pub use guard::DEFAULT_COOLDOWN_SECS;
pub use journal::AuditJournal;
pub use policy::{PolicyError, PolicyResolver};
pub use request::{Admission, Continuation, PendingAnswer, QueuedRequest};
pub use router::{Delivery, ResultRouter};
pub use scheduler::{Scheduler, TickOutcome, DEFAULT_INTERVAL};
pub use schema::{ResponseSchema, SchemaRegistry, SchemaViolation};

/// Engine tuning. Defaults match production values.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub queue_capacity: usize,
    pub cooldown: Duration,
    pub dispatch: DispatchConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: DEFAULT_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            dispatch: DispatchConfig::default(),
        }
    }
}

/// Point-in-time view of the engine, served on `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorStatus {
    pub enabled: bool,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub active_requesters: usize,
    pub busy: bool,
    pub last_latency_ms: Option<u64>,
}

pub struct LlmOrchestrator {
    enabled: bool,
    queue: Arc<AdmissionQueue>,
    policies: Arc<PolicyResolver>,
    scheduler: Arc<Scheduler>,
    router: Arc<ResultRouter>,
    journal: AuditJournal,
    clock: Arc<dyn ClockPort>,
    cancel: CancellationToken,
}

impl LlmOrchestrator {
    /// Wire the engine together. Spawns the audit writer, so this must run
    /// inside a Tokio runtime; the scheduler only starts with [`start`].
    ///
    /// [`start`]: Self::start
    pub fn new(
        config: OrchestratorConfig,
        llm: Arc<dyn LlmPort>,
        audit: Arc<dyn AuditPort>,
        clock: Arc<dyn ClockPort>,
        policies: Arc<PolicyResolver>,
        schemas: Arc<SchemaRegistry>,
    ) -> Self {
        let queue = Arc::new(AdmissionQueue::new(config.queue_capacity, config.cooldown));
        let (journal, _) = AuditJournal::spawn(audit);
        let router = Arc::new(ResultRouter::new(
            Arc::clone(&queue),
            schemas,
            journal.clone(),
            Arc::clone(&clock),
        ));
        let dispatcher = Arc::new(Dispatcher::new(llm, config.dispatch));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&queue),
            dispatcher,
            Arc::clone(&router),
            config.interval,
        ));

        Self {
            enabled: config.enabled,
            queue,
            policies,
            scheduler,
            router,
            journal,
            clock,
            cancel: CancellationToken::new(),
        }
    }

    /// Submit a raw prompt. The returned future resolves to the answer.
    pub fn submit(
        &self,
        prompt: impl Into<String>,
        requester: Option<RequesterId>,
    ) -> Result<PendingAnswer, Rejection> {
        let (continuation, rx) = Continuation::channel();
        let admission = self.submit_with(prompt, requester, continuation)?;
        Ok(PendingAnswer::new(admission, rx))
    }

    /// Submit a raw prompt with a callback continuation.
    ///
    /// The continuation runs exactly once: with the answer, or with `None`
    /// when the engine is disabled or shut down, the request is rejected, or
    /// it fails.
    pub fn submit_with(
        &self,
        prompt: impl Into<String>,
        requester: Option<RequesterId>,
        continuation: Continuation,
    ) -> Result<Admission, Rejection> {
        if let Some(refused) = self.refuse_when_inactive() {
            continuation.fire(None);
            return Ok(refused);
        }
        self.enqueue(prompt.into(), requester, None, continuation)
    }

    /// Resolve the named template with `values` and submit the result. The
    /// answer must match the template's response schema.
    pub fn submit_by_policy(
        &self,
        name: &str,
        values: &HashMap<String, String>,
        requester: Option<RequesterId>,
    ) -> Result<PendingAnswer, Rejection> {
        let (continuation, rx) = Continuation::channel();
        let admission = self.submit_by_policy_with(name, values, requester, continuation)?;
        Ok(PendingAnswer::new(admission, rx))
    }

    pub fn submit_by_policy_with(
        &self,
        name: &str,
        values: &HashMap<String, String>,
        requester: Option<RequesterId>,
        continuation: Continuation,
    ) -> Result<Admission, Rejection> {
        if let Some(refused) = self.refuse_when_inactive() {
            continuation.fire(None);
            return Ok(refused);
        }
        let Some(prompt) = self.policies.resolve(name, values) else {
            tracing::error!(policy = name, "No policy template registered");
            continuation.fire(None);
            return Err(Rejection::unknown_policy(name));
        };
        self.enqueue(prompt, requester, Some(name.to_string()), continuation)
    }

    fn refuse_when_inactive(&self) -> Option<Admission> {
        if !self.enabled {
            return Some(Admission::Disabled);
        }
        if self.cancel.is_cancelled() {
            tracing::debug!("LLM orchestrator shut down, refusing submission");
            return Some(Admission::Stopped);
        }
        None
    }

    fn enqueue(
        &self,
        prompt: String,
        requester: Option<RequesterId>,
        policy: Option<String>,
        continuation: Continuation,
    ) -> Result<Admission, Rejection> {
        let now = self.clock.now();
        let request = QueuedRequest::new(prompt, requester, policy, now, continuation);
        let request_id = request.id;

        let admitted = self.queue.admit_and_then(request, now, |request| {
            self.journal.request(AuditRequest {
                request_id: request.id,
                requester_id: request.requester_id,
                policy: request.policy.clone(),
                prompt: request.prompt.clone(),
                submitted_at: request.submitted_at,
            });
        });

        match admitted {
            Ok(()) if self.cancel.is_cancelled() => {
                // Shutdown drained the queue between the check and admission.
                self.cancel_queued();
                Ok(Admission::Stopped)
            }
            Ok(()) => {
                tracing::info!(
                    request_id = %request_id,
                    requester_id = ?requester,
                    queue_size = self.queue.len(),
                    "LLM request queued"
                );
                Ok(Admission::Queued(request_id))
            }
            Err((rejection, request)) => {
                tracing::warn!(
                    requester_id = ?requester,
                    reason = rejection.code(),
                    "LLM request rejected: {}",
                    rejection
                );
                // Answer outside the queue lock; the callback may resubmit.
                request.continuation.fire(None);
                Err(rejection)
            }
        }
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    pub fn last_latency_ms(&self) -> Option<u64> {
        self.router.last_latency_ms()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn policies(&self) -> &PolicyResolver {
        &self.policies
    }

    pub fn status(&self) -> OrchestratorStatus {
        let snapshot = self.queue.snapshot();
        OrchestratorStatus {
            enabled: self.enabled,
            queue_size: snapshot.queued,
            queue_capacity: self.queue.capacity(),
            active_requesters: snapshot.active,
            busy: self.scheduler.is_busy(),
            last_latency_ms: self.last_latency_ms(),
        }
    }

    /// Run one scheduler tick immediately.
    pub fn tick(&self) -> TickOutcome {
        self.scheduler.tick()
    }

    /// Spawn the periodic scheduler. Disabled engines never start one.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if !self.enabled {
            tracing::info!("LLM orchestration disabled, scheduler not started");
            return None;
        }
        let scheduler = Arc::clone(&self.scheduler);
        Some(tokio::spawn(scheduler.run(self.cancel.child_token())))
    }

    /// Stop the scheduler and answer every queued request with `None`.
    ///
    /// A dispatch already in flight runs to completion and is answered
    /// normally.
    /// Later submissions are answered with `None` without being queued.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.cancel_queued();
        self.journal.flush().await;
    }

    fn cancel_queued(&self) {
        let drained = self.queue.drain();
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Cancelling queued LLM requests");
        }
        for request in drained {
            self.router.cancel(request).deliver();
        }
    }

    /// Wait until pending audit records have reached the store.
    pub async fn flush_audit(&self) {
        self.journal.flush().await;
    }
}
