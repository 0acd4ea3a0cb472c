//! API layer - operational HTTP surface.

pub mod http;

pub use http::{routes, ApiState};
