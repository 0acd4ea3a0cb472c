//! External service port traits (LLM endpoint, audit trail).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opencore_domain::{RequestId, RequestOutcome, RequesterId};
use serde::{Deserialize, Serialize};

use super::error::{LlmError, RepoError};

// =============================================================================
// LLM Types
// =============================================================================

/// A chat-completion request: one user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmRequest {
    pub prompt: String,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

/// Response from the LLM
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    /// `choices[0].message.content` of the completion
    pub content: String,
}

impl LlmResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

// =============================================================================
// LLM Port
// =============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmPort: Send + Sync {
    /// Send one request. No retries happen at this level.
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}

// =============================================================================
// Audit Types
// =============================================================================

/// Raw request as admitted, written before the request is ever dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRequest {
    pub request_id: RequestId,
    pub requester_id: Option<RequesterId>,
    /// Template name for policy-driven calls
    pub policy: Option<String>,
    pub prompt: String,
    pub submitted_at: DateTime<Utc>,
}

/// Terminal result of a request. The raw response text is kept even when
/// validation failed so operators can review it.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditResponse {
    pub request_id: RequestId,
    pub response: Option<String>,
    pub outcome: RequestOutcome,
    pub attempts: u32,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// One row of the audit trail, as read back for operator review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub request_id: RequestId,
    pub requester_id: Option<RequesterId>,
    pub policy: Option<String>,
    pub prompt: String,
    pub submitted_at: DateTime<Utc>,
    pub response: Option<String>,
    pub outcome: Option<RequestOutcome>,
    pub attempts: Option<u32>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Audit Port
// =============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditPort: Send + Sync {
    async fn record_request(&self, entry: &AuditRequest) -> Result<(), RepoError>;
    async fn record_response(&self, entry: &AuditResponse) -> Result<(), RepoError>;
}
