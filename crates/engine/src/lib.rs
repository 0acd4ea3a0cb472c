//! OpenCore Engine library.
//!
//! Orchestrates LLM requests for the game server add-on: admission control,
//! paced dispatch with retries, response validation and exactly-once answer
//! delivery.
//!
//! ## Structure
//!
//! - `orchestrator/` - queue, guard, scheduler, dispatcher, router, facade
//! - `infrastructure/` - External dependency implementations (ports + adapters)
//! - `api/` - Operational HTTP entry points
//! - `config` - Environment configuration

pub mod api;
pub mod config;
pub mod infrastructure;
pub mod orchestrator;

pub use config::EngineConfig;
pub use orchestrator::{LlmOrchestrator, OrchestratorConfig, OrchestratorStatus};
