//! Test-failure analysis and learning engine.
//!
//! Pipeline: raw test output → [`parser`] → [`classifier`] → [`fixgen`]
//! (consulting [`learning`] through [`pattern`] keys) → candidates applied
//! by [`applier`] → outcomes recorded back into [`learning`] → unresolved
//! failures handed off through [`escalation`].

pub mod applier;
pub mod classifier;
pub mod config;
pub mod error;
pub mod escalation;
pub mod failure;
pub mod fixgen;
pub mod learning;
pub mod parser;
pub mod pattern;

pub use applier::{ApplyOptions, ApplyOutcome, FixApplier};
pub use classifier::FailureClassifier;
pub use config::EngineConfig;
pub use error::EngineError;
pub use escalation::EscalationGateway;
pub use failure::{ErrorType, TestFailure, TestResultSummary};
pub use fixgen::{FixCandidate, FixGenerator};
pub use learning::LearningStore;
