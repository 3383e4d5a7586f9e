//! solforge: prompt to deployed, verified contract
//!
//! The orchestrator drives the engine's stage machine against adapter traits.
//! Concrete adapters shell out to Foundry and Slither and call an
//! OpenAI-compatible endpoint for generation.

pub mod adapters;
pub mod config;
pub mod input;
pub mod orchestrator;
pub mod report;
pub mod workspace;

pub use adapters::Adapters;
pub use config::PipelineConfig;
pub use orchestrator::{OrchestratorError, WorkflowOrchestrator, WorkflowResult};
