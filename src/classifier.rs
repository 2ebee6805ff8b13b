use std::collections::HashMap;

use regex::Regex;

use crate::failure::{ErrorType, TestFailure};

/// One classification rule. Rules are evaluated strictly in table order;
/// the first matching predicate wins.
struct Rule {
    predicate: Regex,
    error_type: ErrorType,
    suggestion: &'static str,
}

/// Assigns an error type and an initial human-readable suggestion to each
/// failure via an ordered rule table. The assertion rule keys off matcher
/// names rather than `expect(`, so mock-call phrasing (which also goes
/// through `expect`) still reaches the mock rule further down.
pub struct FailureClassifier {
    rules: Vec<Rule>,
}

impl FailureClassifier {
    pub fn new() -> Self {
        let table: [(&str, ErrorType, &'static str); 6] = [
            (
                r"(?i)toequal|tobe\b|tomatch|tocontain|tostrictequal|assertionerror|expected.*received|deep equality",
                ErrorType::AssertionMismatch,
                "Compare the expected and received values; update the assertion or fix the code under test.",
            ),
            (
                r"(?i)cannot read propert(y|ies).*(undefined|null)|(undefined|null) is not an object|cannot destructure.*(undefined|null)",
                ErrorType::NullReference,
                "A value is undefined or null at access time. Guard the access or initialize the value first.",
            ),
            (
                r"(?i)cannot find module|module not found|could not resolve|\bis not defined\b",
                ErrorType::MissingImport,
                "An import is missing or its module path is wrong. Check the import statement and the package install.",
            ),
            (
                r"(?i)timeout.*exceeded|exceeded.*timeout|timed out|async callback was not invoked",
                ErrorType::TestTimeout,
                "The test ran past its deadline. Await the pending async work or raise the timeout.",
            ),
            (
                r"(?i)tohavebeencalled|tobecalled|mock function|number of calls",
                ErrorType::MockAssertion,
                "Mock call expectations did not match. Verify the call count and the arguments passed.",
            ),
            (
                r"(?i)is not assignable to|is not a function|not a constructor|of type .* is not",
                ErrorType::TypeError,
                "A value has an incompatible type. Check the type produced at the call site.",
            ),
        ];

        let rules = table
            .into_iter()
            .map(|(pattern, error_type, suggestion)| Rule {
                predicate: Regex::new(pattern).unwrap(),
                error_type,
                suggestion,
            })
            .collect();

        Self { rules }
    }

    /// Fills in `error_type` and `suggestion` in place. Unmatched messages
    /// stay `unknown` with a generic suggestion.
    pub fn analyze_failure(&self, failure: &mut TestFailure) {
        for rule in &self.rules {
            if rule.predicate.is_match(&failure.error_message) {
                failure.error_type = rule.error_type;
                failure.suggestion = Some(rule.suggestion.to_string());
                return;
            }
        }

        failure.error_type = ErrorType::Unknown;
        failure.suggestion =
            Some("No known pattern matched. Inspect the error message and stack trace.".to_string());
    }

    pub fn classify_all(&self, failures: &mut [TestFailure]) {
        for failure in failures {
            self.analyze_failure(failure);
        }
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Groups failures by error type, preserving input order within each group.
pub fn group_failures_by_type(failures: &[TestFailure]) -> HashMap<ErrorType, Vec<&TestFailure>> {
    let mut groups: HashMap<ErrorType, Vec<&TestFailure>> = HashMap::new();
    for failure in failures {
        groups.entry(failure.error_type).or_default().push(failure);
    }
    groups
}

const SUMMARY_EXAMPLES: usize = 3;

const SUMMARY_TYPE_ORDER: [ErrorType; 7] = [
    ErrorType::AssertionMismatch,
    ErrorType::NullReference,
    ErrorType::MissingImport,
    ErrorType::TestTimeout,
    ErrorType::MockAssertion,
    ErrorType::TypeError,
    ErrorType::Unknown,
];

/// Renders a short human summary: one paragraph per error type with up to
/// three representative test names.
pub fn create_failure_summary(failures: &[TestFailure]) -> String {
    if failures.is_empty() {
        return "No test failures to analyze.".to_string();
    }

    let groups = group_failures_by_type(failures);
    let mut out = format!("Found {} test failure(s):\n", failures.len());

    for error_type in SUMMARY_TYPE_ORDER {
        let Some(group) = groups.get(&error_type) else {
            continue;
        };

        out.push_str(&format!("\n{} ({}):\n", error_type.as_str(), group.len()));
        for failure in group.iter().take(SUMMARY_EXAMPLES) {
            out.push_str(&format!("  - {}\n", failure.test_name));
        }
        if group.len() > SUMMARY_EXAMPLES {
            out.push_str(&format!("  ...and {} more\n", group.len() - SUMMARY_EXAMPLES));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classified(message: &str) -> TestFailure {
        let mut failure = TestFailure::new("t", "t.test.js", message);
        FailureClassifier::new().analyze_failure(&mut failure);
        failure
    }

    #[test]
    fn assertion_phrasing_wins() {
        let f = classified("expect(received).toEqual(expected)");
        assert_eq!(f.error_type, ErrorType::AssertionMismatch);
        assert!(f.suggestion.is_some());
    }

    #[test]
    fn null_reference_phrasing() {
        let f = classified("TypeError: Cannot read property 'length' of undefined");
        assert_eq!(f.error_type, ErrorType::NullReference);
    }

    #[test]
    fn missing_import_phrasing() {
        assert_eq!(classified("Cannot find module 'lodash'").error_type, ErrorType::MissingImport);
        assert_eq!(classified("ReferenceError: describe is not defined").error_type, ErrorType::MissingImport);
    }

    #[test]
    fn timeout_phrasing() {
        let f = classified("Exceeded timeout of 5000 ms for a test");
        assert_eq!(f.error_type, ErrorType::TestTimeout);
    }

    #[test]
    fn mock_phrasing_is_not_swallowed_by_assertion_rules() {
        let f = classified("expect(jest.fn()).toHaveBeenCalledTimes(2), but it was called 0 times");
        assert_eq!(f.error_type, ErrorType::MockAssertion);
    }

    #[test]
    fn type_error_phrasing() {
        let f = classified("Type 'string' is not assignable to type 'number'");
        assert_eq!(f.error_type, ErrorType::TypeError);
    }

    #[test]
    fn unmatched_messages_stay_unknown() {
        let f = classified("something exploded in an unprecedented way");
        assert_eq!(f.error_type, ErrorType::Unknown);
        assert!(f.suggestion.is_some());
    }

    #[test]
    fn grouping_preserves_input_order() {
        let mut failures = vec![
            TestFailure::new("a", "f", "expect(1).toEqual(2)"),
            TestFailure::new("b", "f", "expect(3).toEqual(4)"),
            TestFailure::new("c", "f", "weird"),
        ];
        FailureClassifier::new().classify_all(&mut failures);

        let groups = group_failures_by_type(&failures);
        let names: Vec<&str> = groups[&ErrorType::AssertionMismatch]
            .iter()
            .map(|f| f.test_name.as_str())
            .collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn summary_empty_and_overflow() {
        assert_eq!(create_failure_summary(&[]), "No test failures to analyze.");

        let mut failures: Vec<TestFailure> = (0..5)
            .map(|i| TestFailure::new(format!("case {i}"), "f", "expect(1).toEqual(2)"))
            .collect();
        FailureClassifier::new().classify_all(&mut failures);

        let summary = create_failure_summary(&failures);
        assert!(summary.contains("Found 5 test failure(s)"));
        assert!(summary.contains("...and 2 more"));
    }
}
