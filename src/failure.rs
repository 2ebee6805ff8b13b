use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/* ---------- error taxonomy ---------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    AssertionMismatch,
    NullReference,
    MissingImport,
    TestTimeout,
    MockAssertion,
    TypeError,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::AssertionMismatch => "assertion_mismatch",
            ErrorType::NullReference => "null_reference",
            ErrorType::MissingImport => "missing_import",
            ErrorType::TestTimeout => "test_timeout",
            ErrorType::MockAssertion => "mock_assertion",
            ErrorType::TypeError => "type_error",
            ErrorType::Unknown => "unknown",
        }
    }
}

/* ---------- failures ---------- */

/// One failed test case, as produced by the parser and enriched by the
/// classifier. Owned by the analysis run that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestFailure {
    pub test_name: String,
    pub test_file: String,
    pub error_message: String,
    pub error_type: ErrorType,
    /// Raw stack lines, verbatim, framework/vendor frames included.
    pub stack_trace: Vec<String>,
    pub suggestion: Option<String>,
}

impl TestFailure {
    pub fn new(
        test_name: impl Into<String>,
        test_file: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            test_file: test_file.into(),
            error_message: error_message.into(),
            error_type: ErrorType::Unknown,
            stack_trace: Vec::new(),
            suggestion: None,
        }
    }
}

/// Location of the first non-vendor, non-test frame of a stack trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/* ---------- run summary ---------- */

/// Aggregate of one test run. `total_tests` is authoritative; the pass,
/// fail and skip counters are informational and copied from the report
/// as-is (some formats exclude skips from the total).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResultSummary {
    pub total_tests: u32,
    pub passed_tests: u32,
    pub failed_tests: u32,
    pub skipped_tests: u32,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub failures: Vec<TestFailure>,
}

/* ---------- feedback ---------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRating {
    Helpful,
    PartiallyHelpful,
    Unhelpful,
}

/// One recorded fix outcome. Transient; folded into the learning store,
/// never persisted as its own entity.
#[derive(Debug, Clone, Default)]
pub struct FixFeedback {
    pub user_rating: Option<UserRating>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_type_round_trips_through_serde() {
        let json = serde_json::to_string(&ErrorType::AssertionMismatch).unwrap();
        assert_eq!(json, "\"assertion_mismatch\"");

        let back: ErrorType = serde_json::from_str("\"null_reference\"").unwrap();
        assert_eq!(back, ErrorType::NullReference);
    }

    #[test]
    fn as_str_matches_serde_names() {
        for et in [
            ErrorType::AssertionMismatch,
            ErrorType::NullReference,
            ErrorType::MissingImport,
            ErrorType::TestTimeout,
            ErrorType::MockAssertion,
            ErrorType::TypeError,
            ErrorType::Unknown,
        ] {
            let json = serde_json::to_string(&et).unwrap();
            assert_eq!(json, format!("\"{}\"", et.as_str()));
        }
    }
}
