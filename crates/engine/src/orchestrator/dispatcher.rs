//! Outbound call with timeout and bounded exponential-backoff retry.
//!
//! Every failure (transport, timeout, non-2xx, malformed payload) is treated
//! as retryable. The backoff sleeps on the dispatch task itself, so the
//! scheduler's busy flag stays set for the whole retry sequence and no other
//! request is sent in between.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opencore_domain::RequestId;

use crate::infrastructure::ports::{LlmError, LlmPort, LlmRequest};

/// Fixed number of attempts per request.
pub const MAX_ATTEMPTS: u32 = 3;

/// Fixed per-attempt timeout.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry
    pub base_delay_ms: u64,
    /// Bound on a single attempt
    pub attempt_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay_ms: 1000,
            attempt_timeout: ATTEMPT_TIMEOUT,
        }
    }
}

/// Terminal result of dispatching one request.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Success {
        answer: String,
        attempts: u32,
        latency_ms: u64,
    },
    Fatal {
        attempts: u32,
        error: LlmError,
    },
}

impl DispatchOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Fatal { attempts, .. } => *attempts,
        }
    }
}

/// Sends requests to the LLM endpoint, retrying failures.
pub struct Dispatcher {
    llm: Arc<dyn LlmPort>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(llm: Arc<dyn LlmPort>, config: DispatchConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Delay after the given failed attempt: base * 2^(attempt-1)
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.config.base_delay_ms.saturating_mul(factor))
    }

    async fn attempt(&self, request: LlmRequest) -> Result<(String, u64), LlmError> {
        let started = Instant::now();
        let timeout = self.config.attempt_timeout;
        match tokio::time::timeout(timeout, self.llm.generate(request)).await {
            Ok(Ok(response)) => Ok((response.content, started.elapsed().as_millis() as u64)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(LlmError::Timeout(timeout.as_millis() as u64)),
        }
    }

    /// Run the Sending -> {Success, Retryable, Fatal} state machine to a
    /// terminal outcome.
    pub async fn dispatch(&self, request_id: RequestId, prompt: &str) -> DispatchOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(LlmRequest::new(prompt)).await {
                Ok((answer, latency_ms)) => {
                    if attempt > 1 {
                        tracing::info!(
                            request_id = %request_id,
                            attempt,
                            "LLM request succeeded after retry"
                        );
                    }
                    return DispatchOutcome::Success {
                        answer,
                        attempts: attempt,
                        latency_ms,
                    };
                }
                Err(error) if attempt < max_attempts => {
                    let delay = self.calculate_delay(attempt);
                    tracing::warn!(
                        request_id = %request_id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "LLM request failed, retrying..."
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!(
                        request_id = %request_id,
                        attempts = attempt,
                        error = %error,
                        "LLM request failed after all retry attempts"
                    );
                    return DispatchOutcome::Fatal {
                        attempts: attempt,
                        error,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ports::{LlmResponse, MockLlmPort};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> DispatchConfig {
        DispatchConfig {
            max_attempts: 3,
            base_delay_ms: 1, // Fast for tests
            attempt_timeout: Duration::from_millis(200),
        }
    }

    /// Mock LLM that fails a configurable number of times before succeeding
    struct FailingMockLlm {
        failures_remaining: AtomicU32,
        calls: AtomicU32,
    }

    impl FailingMockLlm {
        fn new(failure_count: u32) -> Self {
            Self {
                failures_remaining: AtomicU32::new(failure_count),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmPort for FailingMockLlm {
        async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                Err(LlmError::Status {
                    status: 503,
                    body: "overloaded".into(),
                })
            } else {
                Ok(LlmResponse::new("Success!"))
            }
        }
    }

    /// Mock LLM that never answers within the timeout
    struct SlowLlm;

    #[async_trait]
    impl LlmPort for SlowLlm {
        async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(LlmResponse::new("too late"))
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let mut mock = MockLlmPort::new();
        mock.expect_generate()
            .times(1)
            .withf(|request| request.prompt == "hello")
            .returning(|_| Ok(LlmResponse::new("hi")));
        let dispatcher = Dispatcher::new(Arc::new(mock), fast_config());

        match dispatcher.dispatch(RequestId::new(), "hello").await {
            DispatchOutcome::Success {
                answer, attempts, ..
            } => {
                assert_eq!(answer, "hi");
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fails_twice_then_succeeds_on_third_attempt() {
        let llm = Arc::new(FailingMockLlm::new(2));
        let dispatcher = Dispatcher::new(llm.clone(), fast_config());

        let outcome = dispatcher.dispatch(RequestId::new(), "prompt").await;
        match outcome {
            DispatchOutcome::Success {
                answer, attempts, ..
            } => {
                assert_eq!(answer, "Success!");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let llm = Arc::new(FailingMockLlm::new(10));
        let dispatcher = Dispatcher::new(llm.clone(), fast_config());

        let outcome = dispatcher.dispatch(RequestId::new(), "prompt").await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Fatal {
                attempts: 3,
                error: LlmError::Status { status: 503, .. }
            }
        ));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3, "no fourth attempt");
    }

    #[tokio::test]
    async fn invalid_payload_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut mock = MockLlmPort::new();
        mock.expect_generate().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(LlmError::InvalidResponse("No choices in LLM response".into()))
            } else {
                Ok(LlmResponse::new("ok"))
            }
        });
        let dispatcher = Dispatcher::new(Arc::new(mock), fast_config());

        let outcome = dispatcher.dispatch(RequestId::new(), "prompt").await;
        assert_eq!(outcome.attempts(), 2);
        assert!(matches!(outcome, DispatchOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn timeout_counts_as_retryable_failure() {
        let config = DispatchConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            attempt_timeout: Duration::from_millis(20),
        };
        let dispatcher = Dispatcher::new(Arc::new(SlowLlm), config);

        let outcome = dispatcher.dispatch(RequestId::new(), "prompt").await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Fatal {
                attempts: 2,
                error: LlmError::Timeout(20)
            }
        ));
    }

    #[test]
    fn backoff_doubles_from_one_second() {
        let dispatcher = Dispatcher::new(
            Arc::new(FailingMockLlm::new(0)),
            DispatchConfig::default(),
        );

        // Attempt 1 failed: 1000 * 2^0
        assert_eq!(dispatcher.calculate_delay(1), Duration::from_secs(1));
        // Attempt 2 failed: 1000 * 2^1
        assert_eq!(dispatcher.calculate_delay(2), Duration::from_secs(2));
        assert_eq!(dispatcher.config().max_attempts, 3);
        assert_eq!(dispatcher.config().attempt_timeout, Duration::from_secs(30));
    }
}
