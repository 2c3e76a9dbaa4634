//! Progress aggregation.
//!
//! Tasks never share mutable progress state: they send events over a
//! channel and a single aggregator owns every per-episode row plus the
//! global completed counter, pushing refreshed views into a
//! [`ProgressSink`]. Readers only ever see eventually-consistent
//! snapshots, which is all a display needs.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::catalog::EpisodeId;

/// Events flowing from episode tasks to the aggregator.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A run over `total` episodes has started.
    RunStarted { total: usize },
    /// A new source attempt began; (re)registers the episode's row.
    AttemptStarted {
        id: EpisodeId,
        host: String,
        language: String,
    },
    /// Byte counters reported by the fetch engine.
    Transfer {
        id: EpisodeId,
        downloaded: u64,
        total: Option<u64>,
    },
    /// The episode task reached a terminal state. `handled` episodes
    /// advance the global counter; aborted ones do not.
    EpisodeFinished { id: EpisodeId, handled: bool },
}

/// Cloneable sending side handed to tasks.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressHandle {
    pub fn run_started(&self, total: usize) {
        self.send(ProgressEvent::RunStarted { total });
    }

    pub fn attempt_started(&self, id: EpisodeId, host: String, language: String) {
        self.send(ProgressEvent::AttemptStarted { id, host, language });
    }

    pub fn transfer(&self, id: EpisodeId, downloaded: u64, total: Option<u64>) {
        self.send(ProgressEvent::Transfer {
            id,
            downloaded,
            total,
        });
    }

    pub fn finished(&self, id: EpisodeId, handled: bool) {
        self.send(ProgressEvent::EpisodeFinished { id, handled });
    }

    fn send(&self, event: ProgressEvent) {
        // The aggregator going away just means nobody is watching anymore.
        let _ = self.tx.send(event);
    }
}

/// Create the channel pair connecting tasks to an aggregator.
pub fn progress_channel() -> (ProgressHandle, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressHandle { tx }, rx)
}

/// Rolling transfer-rate estimate.
///
/// Exponentially smoothed over byte deltas. Samples with no new bytes are
/// skipped so learning the total size (or a quiet engine) never erases the
/// accumulated rate.
#[derive(Debug)]
struct SpeedTracker {
    last_at: Instant,
    last_bytes: u64,
    rate: f64,
}

const SPEED_SMOOTHING: f64 = 0.7;

impl SpeedTracker {
    fn new(now: Instant) -> Self {
        Self {
            last_at: now,
            last_bytes: 0,
            rate: 0.0,
        }
    }

    fn record(&mut self, now: Instant, bytes: u64) {
        let delta = bytes.saturating_sub(self.last_bytes);
        if delta == 0 {
            return;
        }
        let dt = now.saturating_duration_since(self.last_at).as_secs_f64();
        if dt > 0.0 {
            let sample = delta as f64 / dt;
            self.rate = if self.rate == 0.0 {
                sample
            } else {
                SPEED_SMOOTHING * self.rate + (1.0 - SPEED_SMOOTHING) * sample
            };
        }
        self.last_at = now;
        self.last_bytes = bytes;
    }
}

/// Live state of one episode's transfer.
#[derive(Debug)]
pub struct EpisodeRow {
    pub id: EpisodeId,
    pub label: String,
    pub host: String,
    pub language: String,
    pub downloaded: u64,
    pub total: Option<u64>,
    pub visible: bool,
    speed: SpeedTracker,
}

impl EpisodeRow {
    fn new(id: EpisodeId, host: String, language: String, now: Instant) -> Self {
        let label = id.to_string();
        Self {
            id,
            label,
            host,
            language,
            downloaded: 0,
            total: None,
            visible: true,
            speed: SpeedTracker::new(now),
        }
    }

    /// Completion percentage, defined only once the total size is known.
    pub fn percent(&self) -> Option<f64> {
        self.total
            .filter(|total| *total > 0)
            .map(|total| self.downloaded as f64 * 100.0 / total as f64)
    }

    /// Smoothed transfer rate in bytes per second.
    pub fn speed_bps(&self) -> f64 {
        self.speed.rate
    }
}

/// Snapshot of the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalSnapshot {
    /// Episodes handled so far (successfully or exhausted).
    pub completed: usize,
    /// Episodes enqueued for this run.
    pub total: usize,
    pub elapsed: Duration,
}

/// Rendering surface for progress. Terminal bars, log lines or a push
/// channel are all fine; the aggregator does not care.
pub trait ProgressSink: Send {
    fn run_started(&mut self, total: usize);
    fn row_updated(&mut self, row: &EpisodeRow);
    fn row_hidden(&mut self, id: &EpisodeId);
    fn global_updated(&mut self, snapshot: &GlobalSnapshot);
}

/// Sink that discards everything; for headless runs and tests.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn run_started(&mut self, _total: usize) {}
    fn row_updated(&mut self, _row: &EpisodeRow) {}
    fn row_hidden(&mut self, _id: &EpisodeId) {}
    fn global_updated(&mut self, _snapshot: &GlobalSnapshot) {}
}

/// Sole owner of progress state. Consumes events until every
/// [`ProgressHandle`] is gone, then returns the final snapshot.
///
/// One aggregator serves one run; reusing it across overlapping runs is
/// not supported.
pub struct ProgressAggregator {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    sink: Box<dyn ProgressSink>,
    rows: HashMap<EpisodeId, EpisodeRow>,
    completed: usize,
    total: usize,
    started_at: Instant,
}

impl ProgressAggregator {
    pub fn new(rx: mpsc::UnboundedReceiver<ProgressEvent>, sink: Box<dyn ProgressSink>) -> Self {
        Self {
            rx,
            sink,
            rows: HashMap::new(),
            completed: 0,
            total: 0,
            started_at: Instant::now(),
        }
    }

    pub async fn run(mut self) -> GlobalSnapshot {
        while let Some(event) = self.rx.recv().await {
            self.apply(event);
        }
        self.snapshot()
    }

    fn snapshot(&self) -> GlobalSnapshot {
        GlobalSnapshot {
            completed: self.completed,
            total: self.total,
            elapsed: self.started_at.elapsed(),
        }
    }

    fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { total } => {
                self.total = total;
                self.started_at = Instant::now();
                self.sink.run_started(total);
                let snapshot = self.snapshot();
                self.sink.global_updated(&snapshot);
            }
            ProgressEvent::AttemptStarted { id, host, language } => {
                let row = EpisodeRow::new(id.clone(), host, language, Instant::now());
                self.sink.row_updated(&row);
                self.rows.insert(id, row);
            }
            ProgressEvent::Transfer {
                id,
                downloaded,
                total,
            } => {
                if let Some(row) = self.rows.get_mut(&id) {
                    // Total is set once; completed bytes never go backwards.
                    if row.total.is_none() {
                        row.total = total;
                    }
                    if downloaded > row.downloaded {
                        row.downloaded = downloaded;
                    }
                    row.speed.record(Instant::now(), row.downloaded);
                    self.sink.row_updated(row);
                }
            }
            ProgressEvent::EpisodeFinished { id, handled } => {
                if let Some(row) = self.rows.get_mut(&id) {
                    row.visible = false;
                    self.sink.row_hidden(&id);
                }
                if handled {
                    self.completed += 1;
                    let snapshot = self.snapshot();
                    self.sink.global_updated(&snapshot);
                }
            }
        }
    }
}
