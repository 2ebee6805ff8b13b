use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::classifier::group_failures_by_type;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::failure::{TestFailure, TestResultSummary};

/* ---------- collaborator seams ---------- */

/// Narrow interface to an AI assistant: takes a rendered context document,
/// may return free-form text. The engine never parses the reply into
/// structured fixes; it is display/escalation material only.
pub trait AssistantChannel {
    fn request(&mut self, document: &str, timeout: Duration) -> Result<String, EngineError>;
}

/// Where context documents go when no assistant reply can be obtained
/// (a clipboard-like sink, a log, a panel). Receiving the document here is
/// a normal, expected path.
pub trait FallbackSink {
    fn publish(&mut self, document: &str);
}

/// Default sink: drop the document.
pub struct DiscardSink;

impl FallbackSink for DiscardSink {
    fn publish(&mut self, _document: &str) {}
}

/* ---------- outcomes ---------- */

/// Typed result of one hand-off. "Assistant unavailable" is data, not an
/// exception.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum EscalationOutcome {
    Reply { text: String },
    Fallback { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantSuggestion {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub confidence: f64,
    pub context: String,
}

/* ---------- context documents ---------- */

/// Renders the per-failure diagnostic document handed to the assistant.
/// Deterministic templated text with labeled sections.
pub fn build_single_failure_context(
    failure: &TestFailure,
    source: Option<&str>,
    config: &EngineConfig,
) -> String {
    let mut out = String::new();

    out.push_str("TEST FAILURE\n");
    out.push_str(&format!("Test: {}\n", failure.test_name));
    out.push_str(&format!("File: {}\n", failure.test_file));

    out.push_str("\nERROR\n");
    out.push_str(&format!("Type: {}\n", failure.error_type.as_str()));
    out.push_str(&format!("Message: {}\n", failure.error_message));

    if !failure.stack_trace.is_empty() {
        out.push_str("\nSTACK TRACE\n");
        for line in &failure.stack_trace {
            out.push_str(line);
            out.push('\n');
        }
    }

    if config.include_source {
        if let Some(source) = source {
            out.push_str(&format!("\nSOURCE (first {} lines)\n", config.max_context_lines));
            for line in source.lines().take(config.max_context_lines) {
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    if let Some(suggestion) = failure.suggestion.as_deref() {
        out.push_str("\nPATTERN-BASED SUGGESTION\n");
        out.push_str(suggestion);
        out.push('\n');
    }

    out.push_str("\nREQUEST\n");
    out.push_str("Explain the most likely root cause of this failure and propose a minimal, concrete fix. Do not refactor unrelated code.\n");

    out
}

/// Renders the whole-run summary document for batch hand-off.
pub fn build_batch_context(summary: &TestResultSummary) -> String {
    let mut out = String::new();

    out.push_str("TEST RUN SUMMARY\n");
    out.push_str(&format!(
        "Total: {}  Passed: {}  Failed: {}  Skipped: {}\n",
        summary.total_tests, summary.passed_tests, summary.failed_tests, summary.skipped_tests
    ));
    out.push_str(&format!("Duration: {} ms\n", summary.duration_ms));

    let groups = group_failures_by_type(&summary.failures);
    let mut types: Vec<_> = groups.keys().copied().collect();
    types.sort_by_key(|t| t.as_str());

    for error_type in types {
        let group = &groups[&error_type];
        out.push_str(&format!("\n{} ({})\n", error_type.as_str(), group.len()));
        for failure in group.iter().take(3) {
            out.push_str(&format!("- {}: {}\n", failure.test_name, failure.error_message));
        }
        if group.len() > 3 {
            out.push_str(&format!("...and {} more\n", group.len() - 3));
        }
    }

    out.push_str("\nREQUEST\nIdentify common root causes across these failures and the order they should be fixed in.\n");
    out
}

/* ---------- gateway ---------- */

const FALLBACK_CONFIDENCE: f64 = 0.1;
const ASSISTANT_CONFIDENCE: f64 = 0.5;

/// Hand-off point to the assistant. Bounded per run by the configured
/// escalation cap, with a typed fallback whenever no reply can be obtained
/// within the timeout. A new run supersedes any result still in flight
/// from an earlier one; stale replies are discarded, never merged.
pub struct EscalationGateway {
    channel: Option<Box<dyn AssistantChannel>>,
    fallback: Box<dyn FallbackSink>,
    config: EngineConfig,
    timeout: Duration,
    generation: u64,
}

impl EscalationGateway {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            channel: None,
            fallback: Box::new(DiscardSink),
            config,
            timeout: Duration::from_secs(30),
            generation: 0,
        }
    }

    pub fn with_channel(mut self, channel: Box<dyn AssistantChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_fallback(mut self, sink: Box<dyn FallbackSink>) -> Self {
        self.fallback = sink;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Marks the start of a new analysis run. Results belonging to earlier
    /// runs are discarded from here on.
    pub fn begin_run(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// One hand-off under the current run.
    pub fn escalate(&mut self, document: &str) -> EscalationOutcome {
        let run = self.generation;
        self.escalate_for(run, document)
    }

    /// One hand-off on behalf of run `run`. If a newer run has started by
    /// the time the reply lands, the reply is dropped.
    pub fn escalate_for(&mut self, run: u64, document: &str) -> EscalationOutcome {
        let Some(channel) = self.channel.as_mut() else {
            debug!("no assistant channel; publishing context for manual hand-off");
            self.fallback.publish(document);
            return EscalationOutcome::Fallback {
                reason: "no assistant channel configured".to_string(),
            };
        };

        let result = channel.request(document, self.timeout);

        if run != self.generation {
            info!(run, current = self.generation, "discarding stale escalation result");
            return EscalationOutcome::Fallback {
                reason: "superseded by a newer analysis run".to_string(),
            };
        }

        match result {
            Ok(text) => EscalationOutcome::Reply { text },
            Err(err) => {
                self.fallback.publish(document);
                EscalationOutcome::Fallback { reason: err.to_string() }
            }
        }
    }

    /// Escalates the highest-priority failures of a run, at most the
    /// configured cap, so hand-off cost stays bounded. Priority follows
    /// the configured error-type order; ties keep input order.
    pub fn analyze_top_failures(&mut self, failures: &[TestFailure]) -> Vec<AssistantSuggestion> {
        let run = self.begin_run();

        let mut ranked: Vec<&TestFailure> = failures.iter().collect();
        ranked.sort_by_key(|f| self.config.escalation_rank(f.error_type));
        ranked.truncate(self.config.max_escalations);

        let documents: Vec<String> = ranked
            .iter()
            .map(|f| build_single_failure_context(f, None, &self.config))
            .collect();

        documents
            .into_iter()
            .map(|document| match self.escalate_for(run, &document) {
                EscalationOutcome::Reply { text } => AssistantSuggestion {
                    kind: "assistant".to_string(),
                    message: text,
                    confidence: ASSISTANT_CONFIDENCE,
                    context: document,
                },
                EscalationOutcome::Fallback { reason } => AssistantSuggestion {
                    kind: "fallback".to_string(),
                    message: reason,
                    confidence: FALLBACK_CONFIDENCE,
                    context: document,
                },
            })
            .collect()
    }
}
