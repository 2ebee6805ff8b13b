use std::cmp::Ordering;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::applier::DocumentStore;
use crate::failure::{ErrorType, TestFailure};
use crate::learning::LearningStore;

/* ---------- candidate model ---------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixCategory {
    Import,
    Assertion,
    Mock,
    Type,
    Other,
}

impl FixCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixCategory::Import => "import",
            FixCategory::Assertion => "assertion",
            FixCategory::Mock => "mock",
            FixCategory::Type => "type",
            FixCategory::Other => "other",
        }
    }
}

/// One concrete source edit. Edits are line-oriented string replacements,
/// applied as a unit per candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TextEdit {
    /// Insert `text` as a new line before the 0-based `line`.
    InsertLine { line: usize, text: String },
    /// Replace the first occurrence of `old` anywhere in the document.
    ReplaceOnce { old: String, new: String },
    /// Replace `old` with `new` within the 0-based `line`.
    ReplaceAt { line: usize, old: String, new: String },
}

/// A proposed, not-yet-applied remediation. Empty `edits` with a command
/// means the fix runs an external process instead of rewriting source;
/// empty `edits` with no command is advisory text only (learned
/// suggestions), which the applier routes to `skipped`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixCandidate {
    pub id: String,
    pub title: String,
    pub description: String,
    pub target_file: String,
    pub edits: Vec<TextEdit>,
    pub confidence: f64,
    pub category: FixCategory,
    pub command: Option<String>,
}

/// Stable id derived from category + target, so re-generating for the same
/// failure produces the same ids.
pub fn candidate_id(category: FixCategory, target: &str) -> String {
    let slug: String = target
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    format!("{}-{}", category.as_str(), slug.trim_matches('-'))
}

/* ---------- generator ---------- */

/// Well-known test-framework globals and the import that provides them.
const KNOWN_GLOBALS: [(&str, &str); 10] = [
    ("describe", "@jest/globals"),
    ("it", "@jest/globals"),
    ("test", "@jest/globals"),
    ("expect", "@jest/globals"),
    ("beforeEach", "@jest/globals"),
    ("afterEach", "@jest/globals"),
    ("beforeAll", "@jest/globals"),
    ("afterAll", "@jest/globals"),
    ("jest", "@jest/globals"),
    ("vi", "vitest"),
];

const RELATIVE_IMPORT_EXTENSIONS: [&str; 4] = [".js", ".ts", ".jsx", ".tsx"];

/// Produces ranked fix candidates for one classified failure.
///
/// Generators that have no trustworthy strategy return nothing rather than
/// fabricate an edit; that holds for mock-assertion and type-error failures
/// today. Learned suggestions from the store are appended with the
/// pattern's empirical confidence, and the final list is stably sorted by
/// descending confidence.
pub struct FixGenerator<'a> {
    store: Option<&'a LearningStore>,
}

impl<'a> FixGenerator<'a> {
    pub fn new() -> FixGenerator<'static> {
        FixGenerator { store: None }
    }

    pub fn with_store(store: &'a LearningStore) -> Self {
        Self { store: Some(store) }
    }

    pub fn generate_fixes(&self, failure: &TestFailure, source: Option<&str>) -> Vec<FixCandidate> {
        let mut fixes = match failure.error_type {
            ErrorType::MissingImport => import_fixes(failure, source),
            ErrorType::AssertionMismatch => assertion_fixes(failure, source),
            // No implemented strategy; returning nothing beats guessing an
            // edit that could silently break the test further.
            ErrorType::MockAssertion | ErrorType::TypeError => Vec::new(),
            ErrorType::NullReference | ErrorType::TestTimeout | ErrorType::Unknown => Vec::new(),
        };

        if let Some(store) = self.store {
            fixes.extend(store.generate_learned_suggestions(failure));
        }

        // Stable sort: ties keep generator order.
        fixes.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));
        fixes
    }

    /// Like `generate_fixes`, loading the failing test's source through the
    /// document store first. A load failure is confined to this failure:
    /// it logs a diagnostic and yields no candidates.
    pub fn generate_fixes_from_disk(
        &self,
        failure: &TestFailure,
        docs: &dyn DocumentStore,
    ) -> Vec<FixCandidate> {
        match docs.load(&failure.test_file) {
            Ok(source) => self.generate_fixes(failure, Some(&source)),
            Err(err) => {
                warn!(file = %failure.test_file, %err, "skipping fix generation, source unreadable");
                Vec::new()
            }
        }
    }
}

/* ---------- import fixes ---------- */

fn import_fixes(failure: &TestFailure, source: Option<&str>) -> Vec<FixCandidate> {
    let mut out = Vec::new();

    let module_re = Regex::new(r#"[Cc]annot find module ['"]([^'"]+)['"]"#).unwrap();
    if let Some(caps) = module_re.captures(&failure.error_message) {
        let module = &caps[1];
        if module.starts_with("./") || module.starts_with("../") {
            // The right extension cannot be determined without filesystem
            // access, so propose one candidate per plausible extension.
            for ext in RELATIVE_IMPORT_EXTENSIONS {
                out.push(FixCandidate {
                    id: candidate_id(FixCategory::Import, &format!("{module}{ext}")),
                    title: format!("Import '{module}' with the {ext} extension"),
                    description: format!(
                        "The relative import '{module}' did not resolve; it may need an explicit {ext} extension."
                    ),
                    target_file: failure.test_file.clone(),
                    edits: vec![TextEdit::ReplaceOnce {
                        old: format!("'{module}'"),
                        new: format!("'{module}{ext}'"),
                    }],
                    confidence: 0.6,
                    category: FixCategory::Import,
                    command: None,
                });
            }
        } else {
            let ident = module_identifier(module);
            out.push(FixCandidate {
                id: candidate_id(FixCategory::Import, module),
                title: format!("Add missing import for '{module}'"),
                description: format!("The module '{module}' is used but never imported."),
                target_file: failure.test_file.clone(),
                edits: vec![TextEdit::InsertLine {
                    line: import_insertion_line(source),
                    text: format!("import {ident} from '{module}';"),
                }],
                confidence: 0.8,
                category: FixCategory::Import,
                command: None,
            });
        }
        return out;
    }

    let undefined_re = Regex::new(r"(\w+) is not defined").unwrap();
    if let Some(caps) = undefined_re.captures(&failure.error_message) {
        let ident = caps[1].to_string();
        if let Some((_, module)) = KNOWN_GLOBALS.iter().find(|(name, _)| *name == ident) {
            out.push(FixCandidate {
                id: candidate_id(FixCategory::Import, &ident),
                title: format!("Import test global '{ident}'"),
                description: format!("'{ident}' is a test-framework global provided by '{module}'."),
                target_file: failure.test_file.clone(),
                edits: vec![TextEdit::InsertLine {
                    line: import_insertion_line(source),
                    text: format!("import {{ {ident} }} from '{module}';"),
                }],
                confidence: 0.9,
                category: FixCategory::Import,
                command: None,
            });
        }
    }

    out
}

fn module_identifier(module: &str) -> String {
    let stem = module.rsplit('/').next().unwrap_or(module);
    let ident: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if ident.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true) {
        format!("_{ident}")
    } else {
        ident
    }
}

/// Line index after the last existing import, or the top of the file when
/// no source is available.
fn import_insertion_line(source: Option<&str>) -> usize {
    let Some(source) = source else {
        return 0;
    };

    let mut line = 0;
    for (idx, text) in source.lines().enumerate() {
        let trimmed = text.trim_start();
        if trimmed.starts_with("import ") || trimmed.contains("= require(") {
            line = idx + 1;
        }
    }
    line
}

/* ---------- assertion fixes ---------- */

fn assertion_fixes(failure: &TestFailure, source: Option<&str>) -> Vec<FixCandidate> {
    let message = &failure.error_message;
    let mut out = Vec::new();

    // Snapshot mismatches are command-based on purpose: the correct new
    // snapshot content cannot be computed without running the code.
    if message.to_lowercase().contains("snapshot") {
        out.push(FixCandidate {
            id: candidate_id(FixCategory::Assertion, &format!("snapshot-{}", failure.test_file)),
            title: "Re-run with snapshot update".to_string(),
            description: "The stored snapshot no longer matches. Re-run the test command with snapshot updating enabled.".to_string(),
            target_file: failure.test_file.clone(),
            edits: Vec::new(),
            confidence: 0.7,
            category: FixCategory::Assertion,
            command: Some(format!("npx jest -u {}", failure.test_file)),
        });
        return out;
    }

    if message.contains("toEqual") && expected_value_is_primitive(message) {
        if let Some(source) = source {
            let edits: Vec<TextEdit> = source
                .lines()
                .enumerate()
                .filter(|(_, text)| text.contains(".toEqual("))
                .map(|(line, _)| TextEdit::ReplaceAt {
                    line,
                    old: ".toEqual(".to_string(),
                    new: ".toBe(".to_string(),
                })
                .collect();

            if !edits.is_empty() {
                let count = edits.len();
                out.push(FixCandidate {
                    id: candidate_id(FixCategory::Assertion, &format!("tobe-{}", failure.test_file)),
                    title: "Use toBe for primitive comparison".to_string(),
                    description: format!(
                        "Deep equality on a primitive value; replaces {count} occurrence(s) of toEqual with toBe."
                    ),
                    target_file: failure.test_file.clone(),
                    edits,
                    confidence: 0.7,
                    category: FixCategory::Assertion,
                    command: None,
                });
            }
        }
    }

    let async_re = Regex::new(r"(?i)received promise|promise .* not awaited|did you forget to await").unwrap();
    if async_re.is_match(message) {
        if let Some(source) = source {
            if let Some((line, _)) = source
                .lines()
                .enumerate()
                .find(|(_, text)| text.contains("expect(") && !text.contains("await expect("))
            {
                out.push(FixCandidate {
                    id: candidate_id(FixCategory::Assertion, &format!("await-{}", failure.test_file)),
                    title: "Await the asynchronous expectation".to_string(),
                    description: "The expectation resolves a promise and must be awaited.".to_string(),
                    target_file: failure.test_file.clone(),
                    edits: vec![TextEdit::ReplaceAt {
                        line,
                        old: "expect(".to_string(),
                        new: "await expect(".to_string(),
                    }],
                    confidence: 0.65,
                    category: FixCategory::Assertion,
                    command: None,
                });
            }
        }
    }

    out
}

/// Whether the report's `Expected:` value looks like a primitive literal.
fn expected_value_is_primitive(message: &str) -> bool {
    let expected_re = Regex::new(r"Expected:\s*(.+)").unwrap();
    let Some(caps) = expected_re.captures(message) else {
        return false;
    };

    let value = caps[1].trim();
    let primitive = Regex::new(r#"^(-?\d+(\.\d+)?|true|false|null|"[^"]*")$"#).unwrap();
    primitive.is_match(value)
}
