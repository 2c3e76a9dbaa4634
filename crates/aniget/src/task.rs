//! Per-episode download task.
//!
//! Drives the source selector and the retry controller for one episode
//! until a source delivers, every candidate is exhausted, or a
//! crash-classified failure aborts the task. All per-source failures stay
//! inside the task; only the terminal outcome leaves it.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

use crate::catalog::{Episode, expand_output_template};
use crate::classify::ClassificationTable;
use crate::config::OrchestratorConfig;
use crate::engine::{FetchEngine, FetchOptions, ProgressCallback};
use crate::progress::ProgressHandle;
use crate::retry::{AttemptOutcome, RetryController};
use crate::selector::{SourceCandidate, SourceSelector};

/// Terminal state of one episode task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeOutcome {
    /// One source delivered the episode.
    Succeeded { language: String },
    /// No candidate source existed in any preferred language.
    NoSourceAvailable,
    /// Every candidate was tried and none delivered.
    SourcesExhausted,
    /// A crash-classified failure aborted the task.
    Fatal { message: String },
    /// The run was cancelled while this task was in flight.
    Cancelled,
}

impl EpisodeOutcome {
    /// Handled episodes advance the global completed counter. Aborted and
    /// cancelled ones do not, so true aborts are never miscounted as
    /// completions.
    pub fn is_handled(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::NoSourceAvailable | Self::SourcesExhausted
        )
    }
}

/// Host label for a progress row; falls back to a URL prefix when the
/// source is not a parseable URL.
pub fn host_label(source: &str) -> String {
    Url::parse(source)
        .ok()
        .and_then(|url| url.host_str().map(str::to_owned))
        .unwrap_or_else(|| source.chars().take(24).collect())
}

pub struct EpisodeTask {
    episode: Episode,
    config: Arc<OrchestratorConfig>,
    table: Arc<ClassificationTable>,
    engine: Arc<dyn FetchEngine>,
    progress: ProgressHandle,
    token: CancellationToken,
}

impl EpisodeTask {
    pub fn new(
        episode: Episode,
        config: Arc<OrchestratorConfig>,
        table: Arc<ClassificationTable>,
        engine: Arc<dyn FetchEngine>,
        progress: ProgressHandle,
        token: CancellationToken,
    ) -> Self {
        Self {
            episode,
            config,
            table,
            engine,
            progress,
            token,
        }
    }

    pub async fn run(self) -> EpisodeOutcome {
        let id = self.episode.id.clone();

        let mut sources =
            SourceSelector::new(&self.episode, &self.config.language_preferences).peekable();
        if sources.peek().is_none() {
            info!(episode = %id, "no player available");
            self.progress.finished(id, true);
            return EpisodeOutcome::NoSourceAvailable;
        }

        let controller = RetryController::new(&self.config.retry, &self.table, &self.token);
        let options = self.fetch_options();

        let mut outcome = EpisodeOutcome::SourcesExhausted;
        for candidate in sources {
            if self.token.is_cancelled() {
                outcome = EpisodeOutcome::Cancelled;
                break;
            }
            match self.attempt(&controller, &options, candidate).await {
                AttemptOutcome::Succeeded => {
                    outcome = EpisodeOutcome::Succeeded {
                        language: candidate.language.to_string(),
                    };
                    break;
                }
                AttemptOutcome::Abandoned => continue,
                AttemptOutcome::Fatal(err) => {
                    outcome = EpisodeOutcome::Fatal {
                        message: err.to_string(),
                    };
                    break;
                }
                AttemptOutcome::Cancelled => {
                    outcome = EpisodeOutcome::Cancelled;
                    break;
                }
            }
        }

        match &outcome {
            EpisodeOutcome::Succeeded { language } => {
                info!(episode = %id, language, "episode downloaded");
            }
            EpisodeOutcome::SourcesExhausted => {
                warn!(episode = %id, "all candidate sources failed");
            }
            EpisodeOutcome::Fatal { message } => {
                error!(episode = %id, error = %message, "episode task aborted");
            }
            EpisodeOutcome::Cancelled => {
                info!(episode = %id, "episode task cancelled");
            }
            EpisodeOutcome::NoSourceAvailable => {}
        }

        self.progress.finished(id, outcome.is_handled());
        outcome
    }

    async fn attempt(
        &self,
        controller: &RetryController<'_>,
        options: &FetchOptions,
        candidate: SourceCandidate<'_>,
    ) -> AttemptOutcome {
        self.progress.attempt_started(
            self.episode.id.clone(),
            host_label(candidate.url),
            candidate.language.to_string(),
        );

        let callback = self.progress_callback();
        controller
            .deliver(candidate.url, || {
                self.engine
                    .fetch(candidate.url, options, callback.clone(), &self.token)
            })
            .await
    }

    fn fetch_options(&self) -> FetchOptions {
        let template = self
            .episode
            .output_template
            .as_deref()
            .unwrap_or(&self.config.output_template);
        let relative = expand_output_template(template, &self.episode.id);
        FetchOptions {
            output_path: self.config.output_dir.join(relative),
            fragment_concurrency: self.config.fragment_concurrency,
            format: self.config.format.clone(),
            format_sort: self.config.format_sort.clone(),
        }
    }

    fn progress_callback(&self) -> ProgressCallback {
        let progress = self.progress.clone();
        let id = self.episode.id.clone();
        Arc::new(move |update| {
            progress.transfer(id.clone(), update.downloaded_bytes, update.total_bytes);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EpisodeId;
    use crate::config::RetryConfig;
    use crate::engine::{FetchUpdate, TransferStatus};
    use crate::error::FetchError;
    use crate::progress::progress_channel;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Engine that plays back a script keyed by source URL and records the
    /// order sources were attempted in.
    struct ScriptedEngine {
        script: HashMap<String, ScriptedResult>,
        calls: Mutex<Vec<String>>,
    }

    #[derive(Clone)]
    enum ScriptedResult {
        Ok,
        Exit(i32),
        Fail(&'static str),
    }

    impl ScriptedEngine {
        fn new(script: &[(&str, ScriptedResult)]) -> Arc<Self> {
            Arc::new(Self {
                script: script
                    .iter()
                    .map(|(url, result)| (url.to_string(), result.clone()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FetchEngine for ScriptedEngine {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch(
            &self,
            source: &str,
            _options: &FetchOptions,
            progress: ProgressCallback,
            _token: &CancellationToken,
        ) -> Result<i32, FetchError> {
            self.calls.lock().unwrap().push(source.to_string());
            match self.script.get(source) {
                Some(ScriptedResult::Ok) => {
                    progress(FetchUpdate {
                        status: TransferStatus::Downloading,
                        downloaded_bytes: 10,
                        total_bytes: Some(10),
                    });
                    Ok(0)
                }
                Some(ScriptedResult::Exit(code)) => Ok(*code),
                Some(ScriptedResult::Fail(message)) => Err(FetchError::engine(*message)),
                None => Err(FetchError::engine("unscripted source")),
            }
        }
    }

    fn episode(players: &[(&str, &[&str])]) -> Episode {
        Episode {
            id: EpisodeId::new("Test", 1, 1),
            players: players
                .iter()
                .map(|(lang, urls)| {
                    (
                        lang.to_string(),
                        urls.iter().map(|u| u.to_string()).collect(),
                    )
                })
                .collect(),
            output_template: None,
        }
    }

    fn config() -> Arc<OrchestratorConfig> {
        Arc::new(
            OrchestratorConfig::default()
                .with_languages(["vostfr", "vf"])
                .with_retry(RetryConfig {
                    initial_delay_ms: 10,
                    max_retry_delay_ms: 40,
                    use_jitter: false,
                }),
        )
    }

    fn task(episode: Episode, engine: Arc<ScriptedEngine>) -> EpisodeTask {
        let (progress, _rx) = progress_channel();
        EpisodeTask::new(
            episode,
            config(),
            Arc::new(ClassificationTable::default()),
            engine,
            progress,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn first_working_source_wins() {
        let engine = ScriptedEngine::new(&[("s1", ScriptedResult::Ok)]);
        let ep = episode(&[("vostfr", &["s1", "s2"])]);
        let outcome = task(ep, engine.clone()).run().await;

        assert_eq!(
            outcome,
            EpisodeOutcome::Succeeded {
                language: "vostfr".to_string()
            }
        );
        assert_eq!(engine.calls(), ["s1"]);
    }

    #[tokio::test]
    async fn falls_back_across_languages_in_order() {
        let engine = ScriptedEngine::new(&[
            ("vo-1", ScriptedResult::Fail("ERROR: Video unavailable")),
            ("vo-2", ScriptedResult::Fail("HTTP Error 404: Not Found")),
            ("vf-1", ScriptedResult::Ok),
        ]);
        let ep = episode(&[("vostfr", &["vo-1", "vo-2"]), ("vf", &["vf-1"])]);
        let outcome = task(ep, engine.clone()).run().await;

        assert_eq!(
            outcome,
            EpisodeOutcome::Succeeded {
                language: "vf".to_string()
            }
        );
        assert_eq!(engine.calls(), ["vo-1", "vo-2", "vf-1"]);
    }

    #[tokio::test]
    async fn no_players_means_no_fetch_at_all() {
        let engine = ScriptedEngine::new(&[]);
        let ep = episode(&[("raw", &["r-1"])]);
        let outcome = task(ep, engine.clone()).run().await;

        assert_eq!(outcome, EpisodeOutcome::NoSourceAvailable);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn single_dead_source_exhausts_the_episode() {
        let engine = ScriptedEngine::new(&[(
            "s1",
            ScriptedResult::Fail("ERROR: Video unavailable"),
        )]);
        let ep = episode(&[("vostfr", &["s1"])]);
        let outcome = task(ep, engine.clone()).run().await;

        assert_eq!(outcome, EpisodeOutcome::SourcesExhausted);
        assert_eq!(engine.calls(), ["s1"]);
    }

    #[tokio::test]
    async fn crash_classification_aborts_without_trying_more_sources() {
        let engine = ScriptedEngine::new(&[
            ("s1", ScriptedResult::Fail("no space left on device")),
            ("s2", ScriptedResult::Ok),
        ]);
        let ep = episode(&[("vostfr", &["s1", "s2"])]);
        let outcome = task(ep, engine.clone()).run().await;

        assert!(matches!(outcome, EpisodeOutcome::Fatal { .. }));
        assert!(!outcome.is_handled());
        assert_eq!(engine.calls(), ["s1"]);
    }

    #[tokio::test]
    async fn non_zero_exit_is_not_a_success() {
        let engine = ScriptedEngine::new(&[("s1", ScriptedResult::Exit(1))]);
        let ep = episode(&[("vostfr", &["s1"])]);
        let outcome = task(ep, engine.clone()).run().await;

        // The engine finished unhappily without raising: the source is
        // abandoned and the episode must not read as downloaded.
        assert_eq!(outcome, EpisodeOutcome::SourcesExhausted);
    }

    #[test]
    fn host_label_prefers_the_url_host() {
        assert_eq!(host_label("https://cdn.a.example/v/123"), "cdn.a.example");
        assert_eq!(host_label("not a url"), "not a url");
    }
}
