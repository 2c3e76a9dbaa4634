//! Download scheduler: bounded fan-out of episode tasks.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::catalog::{Episode, EpisodeId};
use crate::classify::ClassificationTable;
use crate::config::OrchestratorConfig;
use crate::engine::FetchEngine;
use crate::error::OrchestratorError;
use crate::progress::ProgressHandle;
use crate::task::{EpisodeOutcome, EpisodeTask};

/// Per-episode outcomes of one run, in completion order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<(EpisodeId, EpisodeOutcome)>,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, EpisodeOutcome::Succeeded { .. }))
    }

    pub fn no_source(&self) -> usize {
        self.count(|o| matches!(o, EpisodeOutcome::NoSourceAvailable))
    }

    pub fn exhausted(&self) -> usize {
        self.count(|o| matches!(o, EpisodeOutcome::SourcesExhausted))
    }

    pub fn fatal(&self) -> usize {
        self.count(|o| matches!(o, EpisodeOutcome::Fatal { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, EpisodeOutcome::Cancelled))
    }

    pub fn handled(&self) -> usize {
        self.count(EpisodeOutcome::is_handled)
    }

    pub fn outcome_for(&self, id: &EpisodeId) -> Option<&EpisodeOutcome> {
        self.outcomes
            .iter()
            .find(|(episode, _)| episode == id)
            .map(|(_, outcome)| outcome)
    }

    fn count(&self, predicate: impl Fn(&EpisodeOutcome) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| predicate(outcome))
            .count()
    }
}

/// Runs one episode task per catalog entry on a bounded worker pool.
///
/// The worker budget bounds episode-level parallelism; the fragment budget
/// inside [`OrchestratorConfig`] is a pass-through to the engine and is not
/// coordinated here beyond being bounded separately.
pub struct DownloadScheduler {
    config: Arc<OrchestratorConfig>,
    table: Arc<ClassificationTable>,
    engine: Arc<dyn FetchEngine>,
    progress: ProgressHandle,
    token: CancellationToken,
}

impl DownloadScheduler {
    pub fn new(
        config: OrchestratorConfig,
        table: ClassificationTable,
        engine: Arc<dyn FetchEngine>,
        progress: ProgressHandle,
        token: CancellationToken,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            table: Arc::new(table),
            engine,
            progress,
            token,
        })
    }

    /// Download every episode in the list, at most `worker_budget` at a
    /// time, and report each episode's outcome.
    ///
    /// The work unit count is fixed here; episodes cannot be added to a
    /// running schedule. Each call needs its own progress aggregator;
    /// feeding two overlapping runs into one is not supported.
    pub async fn run(&self, episodes: Vec<Episode>) -> RunReport {
        let total = episodes.len();
        self.progress.run_started(total);
        info!(
            episodes = total,
            workers = self.config.worker_budget,
            "starting download run"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.worker_budget));
        let mut tasks = JoinSet::new();

        for episode in episodes {
            let id = episode.id.clone();
            let semaphore = semaphore.clone();
            let config = self.config.clone();
            let table = self.table.clone();
            let engine = self.engine.clone();
            let progress = self.progress.clone();
            let token = self.token.clone();

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (id, EpisodeOutcome::Cancelled),
                };
                if token.is_cancelled() {
                    return (id, EpisodeOutcome::Cancelled);
                }
                let task = EpisodeTask::new(episode, config, table, engine, progress, token);
                let outcome = task.run().await;
                (id, outcome)
            });
        }

        let mut report = RunReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, outcome)) => report.outcomes.push((id, outcome)),
                Err(err) => error!(error = %err, "episode task did not complete"),
            }
        }

        info!(
            succeeded = report.succeeded(),
            no_source = report.no_source(),
            exhausted = report.exhausted(),
            fatal = report.fatal(),
            "download run finished"
        );
        report
    }
}
