//! Port traits for infrastructure boundaries.
//!
//! Ports exist for:
//! - LLM calls (could swap OpenAI -> any compatible endpoint)
//! - The audit trail (could swap SQLite -> anything else)
//! - Clock (for testing)

mod error;
mod external;
mod testing;

pub use error::{LlmError, RepoError};

pub use external::{
    AuditEntry, AuditPort, AuditRequest, AuditResponse, LlmPort, LlmRequest, LlmResponse,
};

// =============================================================================
// Test-Only Mocks (only available during test builds)
// =============================================================================
#[cfg(test)]
pub use external::{MockAuditPort, MockLlmPort};

pub use testing::ClockPort;
