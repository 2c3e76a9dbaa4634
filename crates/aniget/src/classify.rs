//! Failure classification.
//!
//! Maps the error text reported by a fetch engine to a reaction. The table
//! is configuration data: engines change their error wording between
//! releases, so deployments can ship an edited JSON table without a code
//! change. Matching is ordered, first match wins, case-insensitive
//! substring containment.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// What to do about a failed source attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    /// Abandon this source and move to the next candidate.
    Continue,
    /// Sleep with backoff and attempt the same source again.
    Retry,
    /// Abort the whole episode task.
    Crash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRule {
    /// Substring looked for in the engine error message.
    pub pattern: String,
    pub reaction: Reaction,
}

impl ClassificationRule {
    fn new(pattern: &str, reaction: Reaction) -> Self {
        Self {
            pattern: pattern.to_string(),
            reaction,
        }
    }
}

/// Ordered rule table mapping engine error text to reactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationTable {
    rules: Vec<ClassificationRule>,
}

impl ClassificationTable {
    pub fn from_rules(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// Load a table from a JSON file of the form
    /// `{"rules": [{"pattern": "...", "reaction": "retry"}, ...]}`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| OrchestratorError::read_file(path, source))?;
        serde_json::from_str(&raw).map_err(|source| OrchestratorError::TableFormat {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Classify an engine error message. `None` means the table has no
    /// rule for it; callers log that prominently and degrade to
    /// [`Reaction::Continue`].
    pub fn classify(&self, message: &str) -> Option<Reaction> {
        let message = message.to_lowercase();
        self.rules
            .iter()
            .find(|rule| message.contains(&rule.pattern.to_lowercase()))
            .map(|rule| rule.reaction)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for ClassificationTable {
    /// Built-in rules covering common yt-dlp error text.
    fn default() -> Self {
        use Reaction::*;
        Self::from_rules(vec![
            // Transient network conditions: wait and retry the same source.
            ClassificationRule::new("timed out", Retry),
            ClassificationRule::new("timeout", Retry),
            ClassificationRule::new("connection reset", Retry),
            ClassificationRule::new("connection refused", Retry),
            ClassificationRule::new("temporary failure in name resolution", Retry),
            ClassificationRule::new("http error 429", Retry),
            ClassificationRule::new("too many requests", Retry),
            ClassificationRule::new("http error 500", Retry),
            ClassificationRule::new("http error 502", Retry),
            ClassificationRule::new("http error 503", Retry),
            ClassificationRule::new("incomplete data", Retry),
            ClassificationRule::new("unable to download webpage", Retry),
            // Dead or unusable source: move on to the next candidate.
            ClassificationRule::new("http error 403", Continue),
            ClassificationRule::new("http error 404", Continue),
            ClassificationRule::new("video unavailable", Continue),
            ClassificationRule::new("private video", Continue),
            ClassificationRule::new("not available in your country", Continue),
            ClassificationRule::new("geo restricted", Continue),
            ClassificationRule::new("unsupported url", Continue),
            ClassificationRule::new("no video formats found", Continue),
            ClassificationRule::new("requested format is not available", Continue),
            // Local environment problems no other source will fix.
            ClassificationRule::new("no space left on device", Crash),
            ClassificationRule::new("disk quota exceeded", Crash),
            ClassificationRule::new("read-only file system", Crash),
            ClassificationRule::new("permission denied", Crash),
            ClassificationRule::new("unable to create directory", Crash),
            ClassificationRule::new("failed to launch fetch engine", Crash),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn first_matching_rule_wins() {
        let table = ClassificationTable::from_rules(vec![
            ClassificationRule::new("error", Reaction::Retry),
            ClassificationRule::new("error 404", Reaction::Continue),
        ]);
        assert_eq!(table.classify("HTTP Error 404"), Some(Reaction::Retry));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let table = ClassificationTable::default();
        assert_eq!(
            table.classify("ERROR: Connection RESET by peer"),
            Some(Reaction::Retry)
        );
    }

    #[test]
    fn unknown_message_is_unclassified() {
        let table = ClassificationTable::default();
        assert_eq!(table.classify("something entirely novel"), None);
    }

    #[test]
    fn default_table_covers_the_three_reactions() {
        let table = ClassificationTable::default();
        assert_eq!(table.classify("read timed out"), Some(Reaction::Retry));
        assert_eq!(
            table.classify("ERROR: Video unavailable"),
            Some(Reaction::Continue)
        );
        assert_eq!(
            table.classify("OSError: no space left on device"),
            Some(Reaction::Crash)
        );
    }

    #[test]
    fn loads_table_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"{"rules": [{"pattern": "boom", "reaction": "crash"}]}"#,
        )
        .unwrap();

        let table = ClassificationTable::from_json_file(file.path()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.classify("BOOM happened"), Some(Reaction::Crash));
    }

    #[test]
    fn invalid_table_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"rules": [{"pattern": "x", "reaction": "explode"}]}"#)
            .unwrap();
        let err = ClassificationTable::from_json_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("invalid classification table"));
    }
}
