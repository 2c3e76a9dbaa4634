//! Fetch engine contract.
//!
//! The orchestrator never touches bytes itself: delivery of one source URL
//! is delegated to a [`FetchEngine`], an injected capability. Engines
//! report progress through a callback and surface their own error text in
//! [`FetchError`] so the classification table can inspect it.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;

pub mod ytdlp;

pub use ytdlp::YtdlpEngine;

/// Options for delivering one source.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Output path template. May contain engine-side placeholders (for
    /// example an extension placeholder) that are passed through verbatim.
    pub output_path: PathBuf,
    /// Fragment-level parallelism inside this single download.
    pub fragment_concurrency: usize,
    /// Opaque format selection expression.
    pub format: Option<String>,
    /// Opaque format sort expression.
    pub format_sort: Option<String>,
}

/// Phase of a transfer reported alongside byte counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Downloading,
    Finished,
}

/// One progress report from an engine.
///
/// `total_bytes` may be unknown for a while; once an engine learns it, it
/// keeps reporting the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchUpdate {
    pub status: TransferStatus,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
}

/// Callback invoked repeatedly while a transfer is in flight.
pub type ProgressCallback = Arc<dyn Fn(FetchUpdate) + Send + Sync>;

/// A media fetch engine.
///
/// `fetch` returns the engine's exit code: zero is success, non-zero is a
/// completed-but-failed run that raised no recognisable failure. Errors the
/// engine does raise come back as [`FetchError`] with the engine's message
/// preserved for classification.
#[async_trait]
pub trait FetchEngine: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    async fn fetch(
        &self,
        source: &str,
        options: &FetchOptions,
        progress: ProgressCallback,
        token: &CancellationToken,
    ) -> Result<i32, FetchError>;

    /// Whether the engine can run at all (e.g. its binary exists).
    fn is_available(&self) -> bool {
        true
    }

    /// Engine version string, if it can be determined.
    fn version(&self) -> Option<String> {
        None
    }
}
