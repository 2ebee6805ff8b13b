use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::failure::ErrorType;

/// Engine tunables. Everything has a default; an optional `failsift.toml`
/// at the workspace root overrides individual fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum recorded attempts before a learned pattern may drive
    /// suggestions.
    #[serde(default = "default_reliable_min_attempts")]
    pub reliable_min_attempts: u32,

    /// Minimum success rate before a learned pattern may drive suggestions.
    #[serde(default = "default_reliable_min_rate")]
    pub reliable_min_rate: f64,

    /// Hard cap on failures handed to the assistant per run.
    #[serde(default = "default_max_escalations")]
    pub max_escalations: usize,

    /// Escalation order, most urgent first. Types not listed here sort
    /// after all listed ones, in input order.
    #[serde(default = "default_escalation_priority")]
    pub escalation_priority: Vec<ErrorType>,

    /// Max source lines quoted in an escalation context document.
    #[serde(default = "default_max_context_lines")]
    pub max_context_lines: usize,

    /// Whether escalation documents include a source excerpt when one is
    /// available.
    #[serde(default = "default_include_source")]
    pub include_source: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reliable_min_attempts: default_reliable_min_attempts(),
            reliable_min_rate: default_reliable_min_rate(),
            max_escalations: default_max_escalations(),
            escalation_priority: default_escalation_priority(),
            max_context_lines: default_max_context_lines(),
            include_source: default_include_source(),
        }
    }
}

impl EngineConfig {
    /// Loads `failsift.toml` from the workspace root, falling back to
    /// defaults when the file is missing or unreadable. A present but
    /// malformed file is an error; silently ignoring it would mask typos.
    pub fn load(workspace_root: &Path) -> Result<Self, String> {
        let path = workspace_root.join("failsift.toml");
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path).map_err(|e| e.to_string())?;
        toml::from_str(&raw).map_err(|e| format!("invalid failsift.toml: {e}"))
    }

    /// Rank of an error type under the configured escalation order.
    pub fn escalation_rank(&self, error_type: ErrorType) -> usize {
        self.escalation_priority
            .iter()
            .position(|et| *et == error_type)
            .unwrap_or(self.escalation_priority.len())
    }
}

fn default_reliable_min_attempts() -> u32 {
    3
}

fn default_reliable_min_rate() -> f64 {
    0.6
}

fn default_max_escalations() -> usize {
    3
}

fn default_escalation_priority() -> Vec<ErrorType> {
    vec![
        ErrorType::AssertionMismatch,
        ErrorType::MissingImport,
        ErrorType::NullReference,
        ErrorType::TypeError,
        ErrorType::MockAssertion,
        ErrorType::TestTimeout,
        ErrorType::Unknown,
    ]
}

fn default_max_context_lines() -> usize {
    40
}

fn default_include_source() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.reliable_min_attempts, 3);
        assert!((cfg.reliable_min_rate - 0.6).abs() < f64::EPSILON);
        assert_eq!(cfg.max_escalations, 3);
    }

    #[test]
    fn assertion_and_import_rank_before_unknown() {
        let cfg = EngineConfig::default();
        assert!(cfg.escalation_rank(ErrorType::AssertionMismatch) < cfg.escalation_rank(ErrorType::Unknown));
        assert!(cfg.escalation_rank(ErrorType::MissingImport) < cfg.escalation_rank(ErrorType::Unknown));
    }

    #[test]
    fn partial_toml_overrides_merge_with_defaults() {
        let cfg: EngineConfig = toml::from_str("max_escalations = 5").unwrap();
        assert_eq!(cfg.max_escalations, 5);
        assert_eq!(cfg.reliable_min_attempts, 3);
    }

    #[test]
    fn unlisted_types_rank_last() {
        let cfg: EngineConfig =
            toml::from_str("escalation_priority = [\"missing_import\"]").unwrap();
        assert_eq!(cfg.escalation_rank(ErrorType::MissingImport), 0);
        assert_eq!(cfg.escalation_rank(ErrorType::Unknown), 1);
        assert_eq!(cfg.escalation_rank(ErrorType::TestTimeout), 1);
    }
}
