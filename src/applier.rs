use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::fixgen::{FixCandidate, TextEdit};

/* ---------- collaborator seams ---------- */

/// Document load/save provider. The engine never touches the filesystem
/// directly for fixes; the host supplies this (an editor buffer provider,
/// or the bundled filesystem implementation).
pub trait DocumentStore {
    fn load(&self, path: &str) -> Result<String, EngineError>;
    fn save(&mut self, path: &str, contents: &str) -> Result<(), EngineError>;
}

/// Sink for command-based fixes. Invocation is fire-and-forget: the engine
/// records the fix as applied once the invocation itself succeeds and never
/// waits on the command's eventual effect.
pub trait CommandSink {
    fn invoke(&mut self, command: &str) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmDecision {
    Apply,
    Skip,
    Cancel,
}

/// Per-candidate confirmation. Cancel aborts the rest of the batch.
pub trait ConfirmPrompt {
    fn confirm(&mut self, candidate: &FixCandidate) -> ConfirmDecision;
}

/* ---------- default collaborators ---------- */

/// Filesystem-backed document store rooted at a workspace directory.
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

impl DocumentStore for FsDocumentStore {
    fn load(&self, path: &str) -> Result<String, EngineError> {
        fs::read_to_string(self.resolve(path)).map_err(|e| EngineError::DocumentLoad {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn save(&mut self, path: &str, contents: &str) -> Result<(), EngineError> {
        fs::write(self.resolve(path), contents)
            .map_err(|e| EngineError::Apply(format!("could not save {path}: {e}")))
    }
}

/// Runs command-based fixes through the shell.
pub struct ShellCommandSink {
    workdir: PathBuf,
}

impl ShellCommandSink {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self { workdir: workdir.into() }
    }
}

impl CommandSink for ShellCommandSink {
    fn invoke(&mut self, command: &str) -> Result<(), EngineError> {
        info!(%command, "invoking command fix");
        Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .spawn()
            .map(|_| ())
            .map_err(|e| EngineError::Apply(format!("could not start '{command}': {e}")))
    }
}

/* ---------- batch apply ---------- */

#[derive(Debug, Clone, Serialize)]
pub struct FailedFix {
    pub candidate: FixCandidate,
    pub error: String,
}

/// Three disjoint partitions of the input batch, each in input order.
#[derive(Debug, Default, Serialize)]
pub struct ApplyOutcome {
    pub applied: Vec<FixCandidate>,
    pub failed: Vec<FailedFix>,
    pub skipped: Vec<FixCandidate>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    pub confirm: bool,
}

pub struct FixApplier<'a> {
    docs: &'a mut dyn DocumentStore,
    commands: &'a mut dyn CommandSink,
}

impl<'a> FixApplier<'a> {
    pub fn new(docs: &'a mut dyn DocumentStore, commands: &'a mut dyn CommandSink) -> Self {
        Self { docs, commands }
    }

    /// Applies candidates strictly in order, one at a time, so two fixes
    /// touching the same file never interleave. Each candidate's edits are
    /// one atomic unit: any load/apply/save failure marks the candidate
    /// failed and leaves the file untouched by it. A Cancel from the prompt
    /// moves the current and every remaining candidate to `skipped`.
    pub fn apply_fixes(
        &mut self,
        candidates: Vec<FixCandidate>,
        options: ApplyOptions,
        mut prompt: Option<&mut dyn ConfirmPrompt>,
    ) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        let mut pending = candidates.into_iter();

        while let Some(candidate) = pending.next() {
            if options.confirm {
                let decision = prompt
                    .as_deref_mut()
                    .map(|p| p.confirm(&candidate))
                    .unwrap_or(ConfirmDecision::Apply);

                match decision {
                    ConfirmDecision::Apply => {}
                    ConfirmDecision::Skip => {
                        outcome.skipped.push(candidate);
                        continue;
                    }
                    ConfirmDecision::Cancel => {
                        outcome.skipped.push(candidate);
                        outcome.skipped.extend(pending);
                        break;
                    }
                }
            }

            if !candidate.edits.is_empty() {
                match self.apply_edit_fix(&candidate) {
                    Ok(()) => outcome.applied.push(candidate),
                    Err(err) => {
                        warn!(id = %candidate.id, %err, "fix failed");
                        outcome.failed.push(FailedFix { candidate, error: err.to_string() });
                    }
                }
            } else if let Some(command) = candidate.command.clone() {
                match self.commands.invoke(&command) {
                    Ok(()) => outcome.applied.push(candidate),
                    Err(err) => {
                        outcome.failed.push(FailedFix { candidate, error: err.to_string() })
                    }
                }
            } else {
                // Advisory candidate (learned suggestion): nothing to run.
                outcome.skipped.push(candidate);
            }
        }

        outcome
    }

    fn apply_edit_fix(&mut self, candidate: &FixCandidate) -> Result<(), EngineError> {
        let source = self.docs.load(&candidate.target_file)?;
        let updated = apply_edits(&source, &candidate.edits)?;
        self.docs.save(&candidate.target_file, &updated)
    }
}

/// Applies all edits against an in-memory copy. Every edit must land or
/// the whole unit fails; nothing partial is ever written back.
pub fn apply_edits(source: &str, edits: &[TextEdit]) -> Result<String, EngineError> {
    let had_trailing_newline = source.ends_with('\n');
    let mut lines: Vec<String> = source.lines().map(str::to_string).collect();

    for edit in edits {
        match edit {
            TextEdit::InsertLine { line, text } => {
                if *line > lines.len() {
                    return Err(EngineError::Apply(format!(
                        "insert line {line} out of bounds ({} lines)",
                        lines.len()
                    )));
                }
                lines.insert(*line, text.clone());
            }
            TextEdit::ReplaceOnce { old, new } => {
                let Some(idx) = lines.iter().position(|l| l.contains(old.as_str())) else {
                    return Err(EngineError::Apply(format!("'{old}' not found in document")));
                };
                lines[idx] = lines[idx].replacen(old.as_str(), new, 1);
            }
            TextEdit::ReplaceAt { line, old, new } => {
                let Some(text) = lines.get_mut(*line) else {
                    return Err(EngineError::Apply(format!("line {line} out of bounds")));
                };
                if !text.contains(old.as_str()) {
                    return Err(EngineError::Apply(format!("'{old}' not found on line {line}")));
                }
                *text = text.replacen(old.as_str(), new, 1);
            }
        }
    }

    let mut out = lines.join("\n");
    if had_trailing_newline {
        out.push('\n');
    }
    Ok(out)
}
