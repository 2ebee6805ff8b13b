use chrono::Utc;
use regex::Regex;
use serde::Deserialize;

use crate::error::EngineError;
use crate::failure::{SourceLocation, TestFailure, TestResultSummary};

/* ---------- structured report shape ---------- */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructuredReport {
    num_total_tests: u32,
    #[serde(default)]
    num_passed_tests: u32,
    #[serde(default)]
    num_failed_tests: u32,
    #[serde(default)]
    num_pending_tests: u32,
    #[serde(default)]
    start_time: Option<u64>,
    #[serde(default)]
    end_time: Option<u64>,
    #[serde(default)]
    test_results: Vec<FileResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResult {
    name: String,
    #[serde(default)]
    assertion_results: Vec<AssertionResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssertionResult {
    title: String,
    status: String,
    #[serde(default)]
    failure_messages: Vec<String>,
}

/* ---------- structured parsing ---------- */

/// Parses a structured (jest-style JSON) test report. The report's counters
/// are copied verbatim; `total_tests` is authoritative and never re-derived
/// from the other three. Malformed input is the one error this module
/// surfaces, since the caller has no partial result to fall back to.
pub fn parse_structured(raw: &str) -> Result<TestResultSummary, EngineError> {
    let report: StructuredReport =
        serde_json::from_str(raw).map_err(|_| EngineError::parse_excerpt(raw))?;

    let duration_ms = match (report.start_time, report.end_time) {
        (Some(start), Some(end)) => end.saturating_sub(start),
        _ => 0,
    };

    let mut failures = Vec::new();
    for file in &report.test_results {
        for assertion in &file.assertion_results {
            if assertion.status != "failed" {
                continue;
            }

            let raw_message = assertion
                .failure_messages
                .first()
                .map(String::as_str)
                .unwrap_or("");
            let (message, stack) = split_message_and_stack(raw_message);

            let mut failure = TestFailure::new(&assertion.title, &file.name, message);
            failure.stack_trace = stack;
            failures.push(failure);
        }
    }

    Ok(TestResultSummary {
        total_tests: report.num_total_tests,
        passed_tests: report.num_passed_tests,
        failed_tests: report.num_failed_tests,
        skipped_tests: report.num_pending_tests,
        duration_ms,
        timestamp: Utc::now(),
        failures,
    })
}

/// Splits a failure message blob into the leading message text and the
/// trailing stack-frame lines. Frame lines are kept verbatim.
fn split_message_and_stack(raw: &str) -> (String, Vec<String>) {
    let mut message_lines = Vec::new();
    let mut stack = Vec::new();

    for line in raw.lines() {
        if is_frame_line(line) || !stack.is_empty() {
            stack.push(line.to_string());
        } else {
            message_lines.push(line);
        }
    }

    let message = message_lines.join("\n").trim().to_string();
    (message, stack)
}

fn is_frame_line(line: &str) -> bool {
    line.trim_start().starts_with("at ")
}

/* ---------- freeform parsing ---------- */

/// Scans free-form runner output for failure markers. Never fails; input
/// with no recognizable markers yields an empty list.
///
/// A failure is a marker line (the failed test's name), the next non-empty
/// line as its error message, then a run of indented lines kept verbatim as
/// the stack trace. Scanning stops at the next marker or end of input.
pub fn parse_freeform(text: &str, default_file: &str) -> Vec<TestFailure> {
    let duration_suffix = Regex::new(r"\s*\(\d+\s*m?s\)\s*$").unwrap();

    let lines: Vec<&str> = text.lines().collect();
    let mut failures = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let Some(name) = failure_marker_name(lines[i]) else {
            i += 1;
            continue;
        };
        let name = duration_suffix.replace(&name, "").into_owned();
        i += 1;

        // First non-empty line after the marker is the error message.
        let mut message = String::new();
        while i < lines.len() && failure_marker_name(lines[i]).is_none() {
            let trimmed = lines[i].trim();
            if !trimmed.is_empty() {
                message = trimmed.to_string();
                i += 1;
                break;
            }
            i += 1;
        }

        let mut stack = Vec::new();
        while i < lines.len() {
            let line = lines[i];
            if failure_marker_name(line).is_some() {
                break;
            }
            let indented = line.starts_with(' ') || line.starts_with('\t');
            if !indented || line.trim().is_empty() {
                break;
            }
            stack.push(line.to_string());
            i += 1;
        }

        if name.trim().is_empty() && message.is_empty() {
            continue;
        }

        let mut failure = TestFailure::new(name.trim(), default_file, message);
        failure.stack_trace = stack;
        failures.push(failure);
    }

    failures
}

/// Returns the test name when the line marks a failed test.
fn failure_marker_name(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    for marker in ["✕ ", "✗ ", "× ", "● "] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return Some(rest.to_string());
        }
    }
    trimmed.strip_prefix("FAIL: ").map(|rest| rest.to_string())
}

/* ---------- source location ---------- */

const VENDOR_FRAGMENTS: [&str; 5] = [
    "node_modules",
    "internal/",
    "node:",
    "jest-circus",
    "jest-jasmine",
];

const TEST_FILE_FRAGMENTS: [&str; 3] = [".test.", ".spec.", "__tests__"];

/// Walks frames in order, skipping vendor/dependency and test-file frames,
/// and returns the first remaining frame's location. Empty when no frame
/// qualifies.
pub fn extract_source_location(stack_trace: &[String]) -> SourceLocation {
    let frame = Regex::new(r"at\s+(?:.*?\()?([^():\s]+):(\d+):(\d+)\)?").unwrap();

    for line in stack_trace {
        let Some(caps) = frame.captures(line) else {
            continue;
        };
        let file = &caps[1];

        if VENDOR_FRAGMENTS.iter().any(|f| file.contains(f)) {
            continue;
        }
        if TEST_FILE_FRAGMENTS.iter().any(|f| file.contains(f)) {
            continue;
        }

        return SourceLocation {
            file: Some(file.to_string()),
            line: caps[2].parse().ok(),
            column: caps[3].parse().ok(),
        };
    }

    SourceLocation::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "numTotalTests": 3,
        "numPassedTests": 1,
        "numFailedTests": 2,
        "numPendingTests": 0,
        "startTime": 1000,
        "endTime": 1450,
        "testResults": [
            {
                "name": "src/math.test.js",
                "assertionResults": [
                    {
                        "title": "adds numbers",
                        "status": "failed",
                        "failureMessages": ["expect(received).toEqual(expected)\n\nExpected: 5\nReceived: 3\n    at Object.<anonymous> (src/math.test.js:10:20)"]
                    },
                    {
                        "title": "reads length",
                        "status": "failed",
                        "failureMessages": ["TypeError: Cannot read property 'length' of undefined\n    at sum (src/math.js:4:12)"]
                    },
                    {
                        "title": "multiplies",
                        "status": "passed",
                        "failureMessages": []
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn structured_report_yields_two_failures() {
        let summary = parse_structured(REPORT).unwrap();
        assert_eq!(summary.total_tests, 3);
        assert_eq!(summary.failed_tests, 2);
        assert_eq!(summary.duration_ms, 450);
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(summary.failures[0].test_name, "adds numbers");
        assert_eq!(summary.failures[0].test_file, "src/math.test.js");
        assert!(summary.failures[0]
            .error_message
            .starts_with("expect(received).toEqual(expected)"));
        assert_eq!(summary.failures[0].stack_trace.len(), 1);
    }

    #[test]
    fn missing_times_mean_zero_duration() {
        let raw = r#"{"numTotalTests": 0, "testResults": []}"#;
        let summary = parse_structured(raw).unwrap();
        assert_eq!(summary.duration_ms, 0);
    }

    #[test]
    fn malformed_report_carries_excerpt() {
        let err = parse_structured("{not json").unwrap_err();
        match err {
            EngineError::Parse { excerpt } => assert!(excerpt.contains("{not json")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn freeform_extracts_marker_message_and_stack() {
        let text = "\
PASS src/ok.test.js
  ✕ resolves config (12 ms)
    Error: Cannot find module './config'
        at Object.require (src/app.js:3:15)
        at node_modules/jest-runtime/build/index.js:100:5
  ✕ second case
    Error: expected 1 to be 2
";
        let failures = parse_freeform(text, "src/app.test.js");
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].test_name, "resolves config");
        assert_eq!(failures[0].test_file, "src/app.test.js");
        assert_eq!(failures[0].error_message, "Error: Cannot find module './config'");
        // Vendor frames are still kept verbatim in the trace.
        assert_eq!(failures[0].stack_trace.len(), 2);
        assert_eq!(failures[1].test_name, "second case");
    }

    #[test]
    fn freeform_never_fails_on_garbage() {
        assert!(parse_freeform("no markers here\njust noise", "x.js").is_empty());
        assert!(parse_freeform("", "x.js").is_empty());
    }

    #[test]
    fn source_location_skips_vendor_and_test_frames() {
        let stack = vec![
            "    at node_modules/jest-circus/build/run.js:10:3".to_string(),
            "    at Object.<anonymous> (src/math.test.js:10:20)".to_string(),
            "    at sum (src/math.js:4:12)".to_string(),
        ];
        let loc = extract_source_location(&stack);
        assert_eq!(loc.file.as_deref(), Some("src/math.js"));
        assert_eq!(loc.line, Some(4));
        assert_eq!(loc.column, Some(12));
    }

    #[test]
    fn source_location_is_empty_when_nothing_qualifies() {
        let stack = vec!["    at node:internal/modules/cjs/loader:1:1".to_string()];
        assert_eq!(extract_source_location(&stack), SourceLocation::default());
    }
}
