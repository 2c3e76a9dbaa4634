use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// Default output path template, expanded per episode and handed to the
/// fetch engine (the `%(ext)s` placeholder is the engine's, left opaque).
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "{series}/{series} - {season}{episode}.%(ext)s";

/// Backoff configuration for retrying a single source.
///
/// The delay starts at `initial_delay_ms`, doubles after each retry and a
/// source is abandoned once the delay reaches `max_retry_delay_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Ceiling on the doubling delay; reaching it abandons the source.
    pub max_retry_delay_ms: u64,
    /// Add up to 25% random jitter to each sleep. Off by default so the
    /// retry schedule stays deterministic.
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_retry_delay_ms: 30000,
            use_jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}

/// Configurable options for a download run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// How many episodes download in parallel.
    pub worker_budget: usize,

    /// Fragment-level parallelism inside a single download, passed through
    /// to the fetch engine untouched.
    pub fragment_concurrency: usize,

    /// Language tags tried in order when picking candidate sources.
    pub language_preferences: Vec<String>,

    /// Directory the output template is resolved against.
    pub output_dir: PathBuf,

    /// Output path template; episodes may carry their own override.
    pub output_template: String,

    /// Format selection expression forwarded verbatim to the engine.
    pub format: Option<String>,

    /// Format sort expression forwarded verbatim to the engine.
    pub format_sort: Option<String>,

    /// Per-source retry behaviour.
    pub retry: RetryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_budget: 3,
            fragment_concurrency: 4,
            language_preferences: vec!["vostfr".to_string(), "vf".to_string()],
            output_dir: PathBuf::from("."),
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            format: None,
            format_sort: None,
            retry: RetryConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Set the worker budget.
    pub fn with_worker_budget(mut self, budget: usize) -> Self {
        self.worker_budget = budget;
        self
    }

    /// Set the fragment concurrency forwarded to the engine.
    pub fn with_fragment_concurrency(mut self, concurrency: usize) -> Self {
        self.fragment_concurrency = concurrency;
        self
    }

    /// Set the ordered language preference list.
    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.language_preferences = languages.into_iter().map(Into::into).collect();
        self
    }

    /// Set the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Validate budgets and delays before a run.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.worker_budget == 0 {
            return Err(OrchestratorError::configuration(
                "worker budget must be at least 1",
            ));
        }
        if self.fragment_concurrency == 0 {
            return Err(OrchestratorError::configuration(
                "fragment concurrency must be at least 1",
            ));
        }
        if self.retry.initial_delay_ms == 0 {
            return Err(OrchestratorError::configuration(
                "initial retry delay must be non-zero",
            ));
        }
        if self.retry.max_retry_delay_ms < self.retry.initial_delay_ms {
            return Err(OrchestratorError::configuration(
                "max retry delay must not be smaller than the initial delay",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(OrchestratorConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_worker_budget_is_rejected() {
        let config = OrchestratorConfig::default().with_worker_budget(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_retry_delays_are_rejected() {
        let config = OrchestratorConfig::default().with_retry(RetryConfig {
            initial_delay_ms: 5000,
            max_retry_delay_ms: 1000,
            use_jitter: false,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = OrchestratorConfig::default()
            .with_worker_budget(5)
            .with_languages(["vf"]);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: OrchestratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.worker_budget, 5);
        assert_eq!(parsed.language_preferences, vec!["vf".to_string()]);
    }
}
