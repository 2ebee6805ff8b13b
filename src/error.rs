use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy for the engine.
///
/// Only `Parse` is ever surfaced from a top-level entry point: a malformed
/// structured report leaves the caller with no partial result to fall back
/// to. Everything else is contained to the item it concerns (one candidate,
/// one document, one store flush) and resolves to an explicit failed/empty
/// result slot instead of propagating.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed test report near: {excerpt}")]
    Parse { excerpt: String },

    #[error("could not load {path}: {reason}")]
    DocumentLoad { path: String, reason: String },

    #[error("fix could not be applied: {0}")]
    Apply(String),

    #[error("learning store i/o failed: {0}")]
    Storage(String),

    #[error("assistant did not reply within {0:?}")]
    EscalationTimeout(Duration),
}

impl EngineError {
    /// Builds a `Parse` error carrying a short excerpt of the offending
    /// input, enough to identify the document without echoing all of it.
    pub fn parse_excerpt(input: &str) -> Self {
        const EXCERPT_LIMIT: usize = 120;

        let trimmed = input.trim();
        let excerpt: String = trimmed.chars().take(EXCERPT_LIMIT).collect();
        let excerpt = if trimmed.chars().count() > EXCERPT_LIMIT {
            format!("{excerpt}...")
        } else {
            excerpt
        };

        EngineError::Parse { excerpt }
    }
}
