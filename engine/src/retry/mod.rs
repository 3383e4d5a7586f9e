//! Bounded retries with typed per-stage state machines

pub mod coordinator;
pub mod policy;
pub mod state;

pub use coordinator::{RetryCoordinator, RetryDecision};
pub use policy::{Backoff, RetryPolicy};
pub use state::{AttemptState, StageMachine, TransitionError, TransitionRecord};
