//! Queued requests and exactly-once answer delivery.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use opencore_domain::{Answer, RequestId, RequesterId};
use tokio::sync::oneshot;

/// Caller-supplied continuation, invoked exactly once.
///
/// Dropping a continuation that never fired delivers `None`.
pub struct Continuation {
    callback: Option<Box<dyn FnOnce(Answer) + Send + 'static>>,
}

impl Continuation {
    pub fn new(callback: impl FnOnce(Answer) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// Continuation for fire-and-forget submissions.
    pub fn ignore() -> Self {
        Self { callback: None }
    }

    /// Continuation backed by a one-shot channel, paired with the future
    /// that receives the answer.
    pub fn channel() -> (Self, oneshot::Receiver<Answer>) {
        let (tx, rx) = oneshot::channel();
        let continuation = Self::new(move |answer| {
            // Receiver may already be gone; nothing to deliver to then.
            let _ = tx.send(answer);
        });
        (continuation, rx)
    }

    pub fn fire(mut self, answer: Answer) {
        if let Some(callback) = self.callback.take() {
            callback(answer);
        }
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(None);
        }
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

/// A request owned by the queue until dequeued, then by the dispatch task.
#[derive(Debug)]
pub struct QueuedRequest {
    pub id: RequestId,
    pub prompt: String,
    pub requester_id: Option<RequesterId>,
    /// Template name for policy-driven calls; selects the response schema.
    pub policy: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub continuation: Continuation,
}

impl QueuedRequest {
    pub fn new(
        prompt: impl Into<String>,
        requester_id: Option<RequesterId>,
        policy: Option<String>,
        submitted_at: DateTime<Utc>,
        continuation: Continuation,
    ) -> Self {
        Self {
            id: RequestId::new(),
            prompt: prompt.into(),
            requester_id,
            policy,
            submitted_at,
            continuation,
        }
    }
}

/// What happened to an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Queued for dispatch under this id.
    Queued(RequestId),
    /// The engine is disabled; the continuation already received `None`.
    Disabled,
    /// The engine has shut down; the continuation already received `None`.
    Stopped,
}

impl Admission {
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Queued(id) => Some(*id),
            Self::Disabled | Self::Stopped => None,
        }
    }
}

/// Future resolving to the answer of a submission.
#[derive(Debug)]
pub struct PendingAnswer {
    admission: Admission,
    rx: oneshot::Receiver<Answer>,
}

impl PendingAnswer {
    pub(crate) fn new(admission: Admission, rx: oneshot::Receiver<Answer>) -> Self {
        Self { admission, rx }
    }

    pub fn admission(&self) -> Admission {
        self.admission
    }

    pub fn request_id(&self) -> Option<RequestId> {
        self.admission.request_id()
    }
}

impl Future for PendingAnswer {
    type Output = Answer;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(None))
    }
}
