//! Infrastructure implementations.
//!
//! Contains port trait implementations for external dependencies.

pub mod audit;
pub mod clock;
pub mod openai;
pub mod ports;
pub mod responses;
