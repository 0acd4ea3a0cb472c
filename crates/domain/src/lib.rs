//! OpenCore domain types shared between LLM callers and the orchestration
//! engine.

pub mod error;
pub mod ids;
pub mod outcome;

pub use error::Rejection;
pub use ids::{RequestId, RequesterId};
pub use outcome::{Answer, RequestOutcome};
