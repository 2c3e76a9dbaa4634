//! Terminal progress rendering with indicatif.
//!
//! One bar per in-flight episode plus a pinned global bar. Rows start as
//! spinners while the transfer size is unknown and switch to a bounded bar
//! once the engine reports a total.

use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use aniget_engine::{EpisodeId, EpisodeRow, GlobalSnapshot, ProgressSink};

fn global_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:>9} [{bar:30.green}] {pos}/{len} episodes ({elapsed} elapsed, eta {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

fn row_bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{msg:<40!} [{bar:25.cyan}] {percent:>3}% {bytes}/{total_bytes} {bytes_per_sec} eta {eta}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

fn row_spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg:<40!} {spinner} {bytes} {bytes_per_sec}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub struct TerminalSink {
    multi: MultiProgress,
    global: Option<ProgressBar>,
    rows: HashMap<EpisodeId, ProgressBar>,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            global: None,
            rows: HashMap::new(),
        }
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for TerminalSink {
    fn run_started(&mut self, total: usize) {
        let bar = self.multi.add(ProgressBar::new(total as u64));
        bar.set_style(global_style());
        bar.set_prefix("overall");
        self.global = Some(bar);
    }

    fn row_updated(&mut self, row: &EpisodeRow) {
        let bar = self.rows.entry(row.id.clone()).or_insert_with(|| {
            let bar = match &self.global {
                Some(global) => self.multi.insert_before(global, ProgressBar::new_spinner()),
                None => self.multi.add(ProgressBar::new_spinner()),
            };
            bar.set_style(row_spinner_style());
            bar
        });

        match row.total {
            Some(total) => {
                if bar.length() != Some(total) {
                    bar.set_length(total);
                    bar.set_style(row_bar_style());
                }
            }
            None => {
                if bar.length().is_some() {
                    // Fallback to a new source of unknown size.
                    bar.unset_length();
                    bar.set_style(row_spinner_style());
                }
            }
        }
        bar.set_position(row.downloaded);
        bar.set_message(format!("{} [{} {}]", row.label, row.language, row.host));
    }

    fn row_hidden(&mut self, id: &EpisodeId) {
        if let Some(bar) = self.rows.remove(id) {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
    }

    fn global_updated(&mut self, snapshot: &GlobalSnapshot) {
        if let Some(bar) = &self.global {
            bar.set_position(snapshot.completed as u64);
        }
    }
}
