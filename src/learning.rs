use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::failure::{ErrorType, FixFeedback, TestFailure, UserRating};
use crate::fixgen::{candidate_id, FixCandidate, FixCategory};
use crate::pattern::{normalize, pattern_key};

/// Learned statistics for one canonical error signature. Created on the
/// first recorded attempt, updated in place forever after; only the
/// explicit clear operation removes patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixPattern {
    pub id: String,
    pub error_pattern: String,
    pub error_type: ErrorType,
    pub successful_fixes: Vec<String>,
    pub failed_fixes: Vec<String>,
    pub success_rate: f64,
    pub total_attempts: u32,
    pub confidence: f64,
    pub last_updated: DateTime<Utc>,
}

impl FixPattern {
    fn recompute(&mut self) {
        let successes = self.successful_fixes.len() as f64;
        let failures = self.failed_fixes.len() as f64;
        let attempts = successes + failures;

        self.total_attempts = attempts as u32;
        self.success_rate = if attempts == 0.0 { 0.0 } else { successes / attempts };
        // Damped rate: a short lucky streak should not read as certainty.
        self.confidence = self.success_rate * attempts / (attempts + 2.0);
        self.last_updated = Utc::now();
    }

    /// Evidence-weighted reliability score used for ranking.
    pub fn evidence_score(&self) -> f64 {
        self.success_rate * self.total_attempts as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningStats {
    pub total_patterns: usize,
    pub reliable_patterns: usize,
    pub total_attempts: u64,
    pub average_success_rate: f64,
}

/* ---------- persisted document ---------- */

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    patterns: Vec<(String, FixPattern)>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportDocument {
    export_date: DateTime<Utc>,
    stats: LearningStats,
    patterns: Vec<(String, FixPattern)>,
}

/* ---------- store ---------- */

const LEARNED_SUGGESTION_LIMIT: usize = 2;

/// Durable pattern → outcome table. Single-writer: every mutating call
/// updates the in-memory table (the source of truth for this process) and
/// flushes the whole document back to disk. Persistence is best-effort; a
/// failed flush is logged and never propagated, because learning must not
/// break the analysis that feeds it.
pub struct LearningStore {
    path: PathBuf,
    patterns: BTreeMap<String, FixPattern>,
    min_attempts: u32,
    min_rate: f64,
}

impl LearningStore {
    /// Opens the store at an explicit path. A missing or unreadable file
    /// degrades to an empty table, never an error.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let patterns = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<StoreDocument>(&raw) {
                Ok(doc) => doc.patterns.into_iter().collect(),
                Err(e) => {
                    warn!(path = %path.display(), %e, "learning store unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        Self {
            path,
            patterns,
            min_attempts: 3,
            min_rate: 0.6,
        }
    }

    /// Opens the store scoped to a workspace, keyed by a hash of its root
    /// path under the user config dir.
    pub fn open_workspace(workspace_root: &Path) -> Self {
        Self::open(default_store_path(workspace_root))
    }

    pub fn configure(&mut self, config: &EngineConfig) {
        self.min_attempts = config.reliable_min_attempts;
        self.min_rate = config.reliable_min_rate;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /* ---------- mutation ---------- */

    /// Folds one fix outcome into the pattern table and flushes it.
    pub fn record_fix_attempt(
        &mut self,
        failure: &TestFailure,
        fix_description: &str,
        success: bool,
        feedback: Option<&FixFeedback>,
    ) {
        let key = pattern_key(failure.error_type, &failure.error_message);
        let entry = self.patterns.entry(key).or_insert_with(|| FixPattern {
            id: Uuid::new_v4().to_string(),
            error_pattern: normalize(&failure.error_message),
            error_type: failure.error_type,
            successful_fixes: Vec::new(),
            failed_fixes: Vec::new(),
            success_rate: 0.0,
            total_attempts: 0,
            confidence: 0.0,
            last_updated: Utc::now(),
        });

        let description = describe_attempt(fix_description, feedback);
        if success {
            entry.successful_fixes.push(description);
        } else {
            entry.failed_fixes.push(description);
        }
        entry.recompute();

        if let Err(e) = self.save() {
            warn!(%e, "learning flush failed, keeping in-memory table");
        }
    }

    pub fn clear_learning_data(&mut self) {
        self.patterns.clear();
        if let Err(e) = self.save() {
            warn!(%e, "learning flush failed after clear");
        }
    }

    /* ---------- queries ---------- */

    /// Returns the learned pattern for a message only when it is reliable:
    /// enough attempts that one lucky success cannot drive suggestions, and
    /// a success rate that survived them.
    pub fn get_best_fix(&self, message: &str, error_type: ErrorType) -> Option<&FixPattern> {
        let key = pattern_key(error_type, message);
        let pattern = self.patterns.get(&key)?;

        if pattern.total_attempts >= self.min_attempts && pattern.success_rate >= self.min_rate {
            Some(pattern)
        } else {
            None
        }
    }

    /// Turns a reliable pattern's remembered successes into advisory
    /// candidates carrying the pattern's empirical confidence.
    pub fn generate_learned_suggestions(&self, failure: &TestFailure) -> Vec<FixCandidate> {
        let Some(pattern) = self.get_best_fix(&failure.error_message, failure.error_type) else {
            return Vec::new();
        };

        let mut seen = Vec::new();
        for description in pattern.successful_fixes.iter().rev() {
            if seen.len() >= LEARNED_SUGGESTION_LIMIT {
                break;
            }
            if !seen.contains(description) {
                seen.push(description.clone());
            }
        }

        seen.into_iter()
            .enumerate()
            .map(|(idx, description)| FixCandidate {
                id: candidate_id(FixCategory::Other, &format!("learned-{}-{idx}", pattern.id)),
                title: "Previously successful fix".to_string(),
                description,
                target_file: failure.test_file.clone(),
                edits: Vec::new(),
                confidence: pattern.confidence,
                category: FixCategory::Other,
                command: None,
            })
            .collect()
    }

    pub fn get_learning_stats(&self) -> LearningStats {
        let total_patterns = self.patterns.len();
        let reliable_patterns = self
            .patterns
            .values()
            .filter(|p| p.total_attempts >= self.min_attempts && p.success_rate >= self.min_rate)
            .count();
        let total_attempts = self.patterns.values().map(|p| p.total_attempts as u64).sum();
        let average_success_rate = if total_patterns == 0 {
            0.0
        } else {
            self.patterns.values().map(|p| p.success_rate).sum::<f64>() / total_patterns as f64
        };

        LearningStats {
            total_patterns,
            reliable_patterns,
            total_attempts,
            average_success_rate,
        }
    }

    /// Patterns ranked by evidence-weighted success, best first.
    pub fn get_most_reliable_patterns(&self, n: usize) -> Vec<&FixPattern> {
        let mut ranked: Vec<&FixPattern> = self.patterns.values().collect();
        ranked.sort_by(|a, b| {
            b.evidence_score()
                .partial_cmp(&a.evidence_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(n);
        ranked
    }

    /// Patterns still below the attempt threshold, fewest attempts first,
    /// to surface where more signal would help.
    pub fn get_patterns_needing_data(&self) -> Vec<&FixPattern> {
        let mut below: Vec<&FixPattern> = self
            .patterns
            .values()
            .filter(|p| p.total_attempts < self.min_attempts)
            .collect();
        below.sort_by_key(|p| p.total_attempts);
        below
    }

    /* ---------- import/export ---------- */

    pub fn export_learning_data(&self) -> Result<String, EngineError> {
        let doc = ExportDocument {
            export_date: Utc::now(),
            stats: self.get_learning_stats(),
            patterns: self.patterns.clone().into_iter().collect(),
        };
        serde_json::to_string_pretty(&doc).map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Replaces the table with the imported one and flushes. Returns the
    /// imported pattern count.
    pub fn import_learning_data(&mut self, json: &str) -> Result<usize, EngineError> {
        let doc: ExportDocument =
            serde_json::from_str(json).map_err(|e| EngineError::Storage(e.to_string()))?;

        self.patterns = doc.patterns.into_iter().collect();
        let count = self.patterns.len();
        self.save()?;
        Ok(count)
    }

    /* ---------- persistence ---------- */

    fn save(&self) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| EngineError::Storage(e.to_string()))?;
            }
        }

        let doc = StoreDocument {
            patterns: self.patterns.clone().into_iter().collect(),
        };
        let text =
            serde_json::to_string_pretty(&doc).map_err(|e| EngineError::Storage(e.to_string()))?;
        fs::write(&self.path, text).map_err(|e| EngineError::Storage(e.to_string()))
    }
}

/// Store file keyed by the workspace root, under the user config dir.
pub fn default_store_path(workspace_root: &Path) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(workspace_root.to_string_lossy().as_bytes());
    let hash = hex::encode(hasher.finalize());

    let mut base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push("failsift");
    base.push("stores");
    base.push(format!("{hash}.json"));
    base
}

fn describe_attempt(fix_description: &str, feedback: Option<&FixFeedback>) -> String {
    let Some(feedback) = feedback else {
        return fix_description.to_string();
    };

    let mut out = fix_description.to_string();
    if let Some(rating) = feedback.user_rating {
        let tag = match rating {
            UserRating::Helpful => "helpful",
            UserRating::PartiallyHelpful => "partially_helpful",
            UserRating::Unhelpful => "unhelpful",
        };
        out.push_str(&format!(" [rated {tag}]"));
    }
    if let Some(notes) = feedback.notes.as_deref() {
        out.push_str(&format!(" ({notes})"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> LearningStore {
        LearningStore::open(dir.path().join("store.json"))
    }

    fn null_failure() -> TestFailure {
        let mut f = TestFailure::new(
            "case",
            "src/app.test.js",
            "Cannot read property 'length' of undefined",
        );
        f.error_type = ErrorType::NullReference;
        f
    }

    #[test]
    fn attempts_accumulate_under_one_signature() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);
        let failure = null_failure();

        for _ in 0..4 {
            store.record_fix_attempt(&failure, "add a guard", false, None);
        }
        store.record_fix_attempt(&failure, "initialize the list", true, None);

        assert_eq!(store.len(), 1);
        let key = pattern_key(failure.error_type, &failure.error_message);
        let pattern = &store.patterns[&key];
        assert_eq!(pattern.total_attempts, 5);
        assert!((pattern.success_rate - 0.2).abs() < 1e-9);

        // Below the 0.6 rate threshold, so not served as a best fix.
        assert!(store.get_best_fix(&failure.error_message, failure.error_type).is_none());
    }

    #[test]
    fn signatures_generalize_across_payloads() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);

        let mut first = TestFailure::new("a", "f", "Expected 5 but received 3");
        first.error_type = ErrorType::AssertionMismatch;
        let mut second = TestFailure::new("b", "f", "Expected 42 but received 0");
        second.error_type = ErrorType::AssertionMismatch;

        store.record_fix_attempt(&first, "fix the constant", true, None);
        store.record_fix_attempt(&second, "fix the constant", true, None);

        assert_eq!(store.len(), 1);
    }

    #[test]
    fn best_fix_requires_both_thresholds() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);
        let failure = null_failure();

        // totalAttempts=2, successRate=1.0: still below the attempt bar.
        store.record_fix_attempt(&failure, "guard", true, None);
        store.record_fix_attempt(&failure, "guard", true, None);
        assert!(store.get_best_fix(&failure.error_message, failure.error_type).is_none());

        // totalAttempts=5, successRate=0.8: reliable.
        store.record_fix_attempt(&failure, "guard", true, None);
        store.record_fix_attempt(&failure, "guard", true, None);
        store.record_fix_attempt(&failure, "guard", false, None);
        let best = store.get_best_fix(&failure.error_message, failure.error_type).unwrap();
        assert_eq!(best.total_attempts, 5);
        assert!((best.success_rate - 0.8).abs() < 1e-9);
    }

    #[test]
    fn learned_suggestions_carry_pattern_confidence() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);
        let failure = null_failure();

        for _ in 0..4 {
            store.record_fix_attempt(&failure, "add a guard before access", true, None);
        }

        let suggestions = store.generate_learned_suggestions(&failure);
        assert_eq!(suggestions.len(), 1);
        assert!(suggestions[0].edits.is_empty());
        let expected = store
            .get_best_fix(&failure.error_message, failure.error_type)
            .unwrap()
            .confidence;
        assert!((suggestions[0].confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn store_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let failure = null_failure();

        {
            let mut store = LearningStore::open(&path);
            store.record_fix_attempt(&failure, "guard", true, None);
        }

        let reopened = LearningStore::open(&path);
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn corrupt_store_degrades_to_empty_and_keeps_working() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "not json at all").unwrap();

        let mut store = LearningStore::open(&path);
        assert!(store.is_empty());

        // Recording still succeeds; the failure was swallowed, not raised.
        store.record_fix_attempt(&null_failure(), "guard", true, None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn export_import_round_trip() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);
        store.record_fix_attempt(&null_failure(), "guard", true, None);

        let exported = store.export_learning_data().unwrap();
        assert!(exported.contains("exportDate"));

        let mut other = LearningStore::open(dir.path().join("other.json"));
        let count = other.import_learning_data(&exported).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn clear_empties_table_and_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let mut store = LearningStore::open(&path);
        store.record_fix_attempt(&null_failure(), "guard", true, None);
        store.clear_learning_data();

        assert!(store.is_empty());
        assert!(LearningStore::open(&path).is_empty());
    }

    #[test]
    fn stats_and_rankings() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);

        let solid = null_failure();
        for _ in 0..5 {
            store.record_fix_attempt(&solid, "guard", true, None);
        }

        let mut sparse = TestFailure::new("t", "f", "Exceeded timeout of 5000 ms");
        sparse.error_type = ErrorType::TestTimeout;
        store.record_fix_attempt(&sparse, "raise timeout", false, None);

        let stats = store.get_learning_stats();
        assert_eq!(stats.total_patterns, 2);
        assert_eq!(stats.reliable_patterns, 1);
        assert_eq!(stats.total_attempts, 6);

        let ranked = store.get_most_reliable_patterns(10);
        assert_eq!(ranked[0].error_type, ErrorType::NullReference);

        let needy = store.get_patterns_needing_data();
        assert_eq!(needy.len(), 1);
        assert_eq!(needy[0].error_type, ErrorType::TestTimeout);
    }

    #[test]
    fn feedback_is_folded_into_the_description() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);
        let failure = null_failure();

        let feedback = FixFeedback {
            user_rating: Some(UserRating::Helpful),
            notes: Some("worked on the second try".to_string()),
        };
        store.record_fix_attempt(&failure, "guard", true, Some(&feedback));

        let key = pattern_key(failure.error_type, &failure.error_message);
        let recorded = &store.patterns[&key].successful_fixes[0];
        assert!(recorded.contains("[rated helpful]"));
        assert!(recorded.contains("second try"));
    }
}
