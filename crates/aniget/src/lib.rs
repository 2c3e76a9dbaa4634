//! # aniget-engine
//!
//! Orchestrates episode downloads: given a catalog of episodes with
//! candidate player URLs per language, it fans tasks out over a bounded
//! worker pool, falls back across sources, retries transient failures with
//! exponential backoff, and aggregates live progress.
//!
//! The actual byte transfer is delegated to a [`FetchEngine`]; a yt-dlp
//! backed implementation ships in [`engine::ytdlp`].

pub mod catalog;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod selector;
pub mod task;

pub use catalog::{Episode, EpisodeId, LEGACY_LANGUAGE, load_catalog};
pub use classify::{ClassificationRule, ClassificationTable, Reaction};
pub use config::{OrchestratorConfig, RetryConfig};
pub use engine::{
    FetchEngine, FetchOptions, FetchUpdate, ProgressCallback, TransferStatus, YtdlpEngine,
};
pub use error::{FetchError, OrchestratorError};
pub use progress::{
    EpisodeRow, GlobalSnapshot, NullSink, ProgressAggregator, ProgressEvent, ProgressHandle,
    ProgressSink, progress_channel,
};
pub use retry::{AttemptOutcome, Backoff, RetryController};
pub use scheduler::{DownloadScheduler, RunReport};
pub use task::{EpisodeOutcome, EpisodeTask, host_label};

/// Convenience result alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
