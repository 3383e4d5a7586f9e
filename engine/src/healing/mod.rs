//! Self-healing error classification and scoped auto-fixes

pub mod diagnostics;
pub mod handler;
pub mod record;
pub mod rules;
pub mod source;

pub use diagnostics::{parse_diagnostics, parse_errors, SolcDiagnostic};
pub use handler::SelfHealingErrorHandler;
pub use record::{ErrorKind, ErrorRecord, FixRecord, FixTarget, RuleMatch, SourceEdit};
pub use rules::{HealingRule, LibraryVersions, RuleOutcome};
