//! solforge-engine: the deterministic core of the contract pipeline
//!
//! Nothing in this crate talks to an LLM, a compiler or a chain. It owns the
//! workflow record and the decisions made about failures:
//!
//! - [`context`]: the durable per-workflow record and its diagnostic bundle
//! - [`deps`]: library detection, the shared cache lock, remappings
//! - [`healing`]: error classification and scoped source fixes
//! - [`retry`]: per-stage attempt state machines and retry decisions
//! - [`network`]: the deployment allow-list

pub mod context;
pub mod deps;
pub mod error;
pub mod fs_atomic;
pub mod healing;
pub mod network;
pub mod retry;
pub mod stage;

pub use context::{ContextManager, ContextStore, FileContextStore, WorkflowContext, WorkflowId};
pub use error::{ContextError, PipelineError};
pub use healing::{ErrorKind, ErrorRecord, SelfHealingErrorHandler};
pub use network::{Network, UnsupportedNetwork};
pub use retry::{RetryCoordinator, RetryDecision, RetryPolicy};
pub use stage::{Stage, StageStatus};
