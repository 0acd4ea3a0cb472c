//! Ordered, non-blocking audit writes.
//!
//! Admission and routing hand records to a single writer task over an
//! unbounded channel, so a slow or failing audit store never delays a caller
//! and a response record is never written before its request record.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::infrastructure::ports::{AuditPort, AuditRequest, AuditResponse};

enum JournalEntry {
    Request(AuditRequest),
    Response(AuditResponse),
    Flush(oneshot::Sender<()>),
}

/// Handle to the audit writer task. Cheap to clone.
#[derive(Clone)]
pub struct AuditJournal {
    tx: mpsc::UnboundedSender<JournalEntry>,
}

impl AuditJournal {
    /// Spawn the writer task. It runs until every handle is dropped.
    pub fn spawn(audit: Arc<dyn AuditPort>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(journal_worker(audit, rx));
        (Self { tx }, handle)
    }

    pub fn request(&self, entry: AuditRequest) {
        self.send(JournalEntry::Request(entry));
    }

    pub fn response(&self, entry: AuditResponse) {
        self.send(JournalEntry::Response(entry));
    }

    /// Wait until everything journaled so far has been handed to the store.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(JournalEntry::Flush(tx));
        let _ = rx.await;
    }

    fn send(&self, entry: JournalEntry) {
        if self.tx.send(entry).is_err() {
            tracing::warn!("Audit journal closed, dropping record");
        }
    }
}

async fn journal_worker(audit: Arc<dyn AuditPort>, mut rx: mpsc::UnboundedReceiver<JournalEntry>) {
    tracing::debug!("Starting audit journal");
    while let Some(entry) = rx.recv().await {
        match entry {
            JournalEntry::Request(entry) => {
                if let Err(e) = audit.record_request(&entry).await {
                    tracing::error!(
                        request_id = %entry.request_id,
                        error = %e,
                        "Failed to audit LLM request"
                    );
                }
            }
            JournalEntry::Response(entry) => {
                if let Err(e) = audit.record_response(&entry).await {
                    tracing::error!(
                        request_id = %entry.request_id,
                        outcome = %entry.outcome,
                        error = %e,
                        "Failed to audit LLM response"
                    );
                }
            }
            JournalEntry::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Audit journal stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ports::{MockAuditPort, RepoError};
    use chrono::Utc;
    use mockall::Sequence;
    use opencore_domain::{RequestId, RequestOutcome};

    fn request(id: RequestId) -> AuditRequest {
        AuditRequest {
            request_id: id,
            requester_id: None,
            policy: None,
            prompt: "prompt".into(),
            submitted_at: Utc::now(),
        }
    }

    fn response(id: RequestId) -> AuditResponse {
        AuditResponse {
            request_id: id,
            response: Some("answer".into()),
            outcome: RequestOutcome::Success,
            attempts: 1,
            latency_ms: Some(12),
            error: None,
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn writes_in_submission_order() {
        let id = RequestId::new();
        let mut seq = Sequence::new();
        let mut mock = MockAuditPort::new();
        mock.expect_record_request()
            .withf(move |e| e.request_id == id)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_record_response()
            .withf(move |e| e.request_id == id)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let (journal, _handle) = AuditJournal::spawn(Arc::new(mock));
        journal.request(request(id));
        journal.response(response(id));
        journal.flush().await;
    }

    #[tokio::test]
    async fn store_failures_do_not_stop_the_writer() {
        let mut mock = MockAuditPort::new();
        mock.expect_record_request()
            .times(2)
            .returning(|_| Err(RepoError::database("record_request", "disk I/O error")));
        mock.expect_record_response().times(1).returning(|_| Ok(()));

        let (journal, _handle) = AuditJournal::spawn(Arc::new(mock));
        journal.request(request(RequestId::new()));
        journal.request(request(RequestId::new()));
        journal.response(response(RequestId::new()));
        journal.flush().await;
    }

    #[tokio::test]
    async fn worker_stops_when_handles_drop() {
        let mock = MockAuditPort::new();
        let (journal, handle) = AuditJournal::spawn(Arc::new(mock));
        drop(journal);
        handle.await.expect("journal task");
    }
}
