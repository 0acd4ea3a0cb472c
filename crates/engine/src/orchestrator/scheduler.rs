//! Periodic ticker that moves one request at a time from the queue to the
//! dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opencore_domain::RequestId;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::ports::LlmError;

use super::admission::AdmissionQueue;
use super::dispatcher::{DispatchOutcome, Dispatcher};
use super::router::ResultRouter;

/// Default tick interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A dispatch (including its retries) is still in progress.
    Busy,
    /// Nothing was queued.
    Idle,
    Dispatched(RequestId),
}

/// Clears the busy flag when dropped, including on unwind.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    queue: Arc<AdmissionQueue>,
    dispatcher: Arc<Dispatcher>,
    router: Arc<ResultRouter>,
    busy: Arc<AtomicBool>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        queue: Arc<AdmissionQueue>,
        dispatcher: Arc<Dispatcher>,
        router: Arc<ResultRouter>,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            router,
            busy: Arc::new(AtomicBool::new(false)),
            interval,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Dequeue the head and dispatch it on a new task, unless a dispatch is
    /// already running. Must be called inside a Tokio runtime.
    pub fn tick(&self) -> TickOutcome {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("Dispatch in progress, skipping tick");
            return TickOutcome::Busy;
        }
        let busy = BusyGuard(Arc::clone(&self.busy));

        let Some(request) = self.queue.pop_front() else {
            return TickOutcome::Idle;
        };
        let request_id = request.id;
        tracing::debug!(
            request_id = %request_id,
            remaining = self.queue.len(),
            "Dispatching LLM request"
        );

        let dispatcher = Arc::clone(&self.dispatcher);
        let router = Arc::clone(&self.router);
        let prompt = request.prompt.clone();
        tokio::spawn(async move {
            // The call runs on its own task so a panicking adapter still
            // reaches the router and releases the requester.
            let call = tokio::spawn(async move { dispatcher.dispatch(request_id, &prompt).await });
            let outcome = match call.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        request_id = %request_id,
                        error = %e,
                        "LLM dispatch task failed"
                    );
                    DispatchOutcome::Fatal {
                        attempts: 1,
                        error: LlmError::RequestFailed(format!("dispatch task failed: {e}")),
                    }
                }
            };
            let delivery = router.route(request, outcome);
            drop(busy);
            delivery.deliver();
        });

        TickOutcome::Dispatched(request_id)
    }

    /// Tick every `interval` until cancelled. The first tick fires
    /// immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Starting LLM dispatch scheduler"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("LLM dispatch scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::ports::{LlmError, LlmPort, LlmRequest, LlmResponse, MockAuditPort};
    use crate::orchestrator::dispatcher::DispatchConfig;
    use crate::orchestrator::journal::AuditJournal;
    use crate::orchestrator::request::{Continuation, QueuedRequest};
    use crate::orchestrator::schema::SchemaRegistry;
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Notify;

    /// LLM that holds every call until released.
    struct GatedLlm {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl LlmPort for GatedLlm {
        async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
            self.gate.notified().await;
            Ok(LlmResponse::new(format!("echo: {}", request.prompt)))
        }
    }

    fn scheduler(llm: Arc<dyn LlmPort>, interval: Duration) -> (Arc<Scheduler>, Arc<AdmissionQueue>) {
        let mut audit = MockAuditPort::new();
        audit.expect_record_request().returning(|_| Ok(()));
        audit.expect_record_response().returning(|_| Ok(()));
        let (journal, _) = AuditJournal::spawn(Arc::new(audit));

        let queue = Arc::new(AdmissionQueue::new(10, Duration::from_secs(60)));
        let router = Arc::new(ResultRouter::new(
            Arc::clone(&queue),
            Arc::new(SchemaRegistry::builtin()),
            journal,
            Arc::new(SystemClock::new()),
        ));
        let config = DispatchConfig {
            base_delay_ms: 1,
            attempt_timeout: Duration::from_secs(5),
            ..DispatchConfig::default()
        };
        let dispatcher = Arc::new(Dispatcher::new(llm, config));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&queue), dispatcher, router, interval));
        (scheduler, queue)
    }

    fn enqueue(queue: &AdmissionQueue, prompt: &str) -> tokio::sync::oneshot::Receiver<Option<String>> {
        let (continuation, rx) = Continuation::channel();
        queue
            .admit(QueuedRequest::new(prompt, None, None, Utc::now(), continuation), Utc::now())
            .expect("admit");
        rx
    }

    #[tokio::test]
    async fn idle_tick_leaves_flag_clear() {
        let gate = Arc::new(Notify::new());
        let (scheduler, _queue) = scheduler(Arc::new(GatedLlm { gate }), DEFAULT_INTERVAL);
        assert_eq!(scheduler.tick(), TickOutcome::Idle);
        assert!(!scheduler.is_busy());
    }

    #[tokio::test]
    async fn one_dispatch_at_a_time() {
        let gate = Arc::new(Notify::new());
        let (scheduler, queue) = scheduler(
            Arc::new(GatedLlm {
                gate: Arc::clone(&gate),
            }),
            DEFAULT_INTERVAL,
        );
        let first = enqueue(&queue, "first");
        let _second = enqueue(&queue, "second");

        assert!(matches!(scheduler.tick(), TickOutcome::Dispatched(_)));
        assert_eq!(scheduler.tick(), TickOutcome::Busy);
        assert_eq!(queue.len(), 1, "second request stays queued while busy");

        gate.notify_one();
        assert_eq!(first.await.unwrap().as_deref(), Some("echo: first"));
        assert!(!scheduler.is_busy());
        assert!(matches!(scheduler.tick(), TickOutcome::Dispatched(_)));
    }

    #[tokio::test]
    async fn run_loop_dispatches_until_cancelled() {
        let gate = Arc::new(Notify::new());
        let (scheduler, queue) = scheduler(
            Arc::new(GatedLlm {
                gate: Arc::clone(&gate),
            }),
            Duration::from_millis(10),
        );
        let answer = enqueue(&queue, "tick me");
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&scheduler).run(cancel.clone()));

        gate.notify_one();
        assert_eq!(answer.await.unwrap().as_deref(), Some("echo: tick me"));

        cancel.cancel();
        handle.await.expect("scheduler task");
    }
}
