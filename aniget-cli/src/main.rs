//! aniget: batch-download catalog episodes through an external fetch engine.

mod render;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use aniget_engine::{
    ClassificationTable, DownloadScheduler, EpisodeOutcome, FetchEngine, GlobalSnapshot,
    LEGACY_LANGUAGE, OrchestratorConfig, OrchestratorError, ProgressAggregator, RetryConfig,
    RunReport, YtdlpEngine, load_catalog, progress_channel,
};
use render::TerminalSink;

const DEFAULT_LOG_FILTER: &str = "aniget=info,aniget_engine=info";

#[derive(Debug, Parser)]
#[command(name = "aniget", version, about = "Anime episode download orchestrator")]
struct Args {
    /// Path to the catalog JSON file.
    catalog: PathBuf,

    /// Directory downloads are written into.
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// How many episodes to download in parallel.
    #[arg(short = 'j', long, default_value_t = 3)]
    workers: usize,

    /// Fragment-level parallelism passed through to the fetch engine.
    #[arg(long, default_value_t = 4)]
    fragment_concurrency: usize,

    /// Preferred languages, tried in order.
    #[arg(
        short = 'l',
        long = "language",
        value_delimiter = ',',
        default_values_t = [String::from("vostfr"), String::from("vf")]
    )]
    languages: Vec<String>,

    /// Only download series whose title contains this string.
    #[arg(long)]
    series: Option<String>,

    /// Path to a JSON failure classification table; built-in rules are
    /// used when omitted.
    #[arg(long)]
    classification: Option<PathBuf>,

    /// Format selection expression forwarded verbatim to the engine.
    #[arg(short = 'f', long)]
    format: Option<String>,

    /// Format sort expression forwarded verbatim to the engine.
    #[arg(short = 'S', long)]
    sort: Option<String>,

    /// Delay before the first retry of a failing source, in seconds.
    #[arg(long, default_value_t = 1)]
    retry_delay: u64,

    /// Ceiling on the doubling retry delay, in seconds.
    #[arg(long, default_value_t = 30)]
    max_retry_delay: u64,

    /// Path to the fetch engine binary.
    #[arg(long, default_value = "yt-dlp")]
    ytdlp_bin: PathBuf,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "aniget=debug,aniget_engine=debug"
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: &Args) -> OrchestratorConfig {
    let mut languages = args.languages.clone();
    // Legacy catalog entries carry a single URL under the fallback tag;
    // keep them reachable as the last resort.
    if !languages
        .iter()
        .any(|l| l.eq_ignore_ascii_case(LEGACY_LANGUAGE))
    {
        languages.push(LEGACY_LANGUAGE.to_string());
    }

    let mut config = OrchestratorConfig::default()
        .with_worker_budget(args.workers)
        .with_fragment_concurrency(args.fragment_concurrency)
        .with_languages(languages)
        .with_output_dir(args.output_dir.clone())
        .with_retry(RetryConfig {
            initial_delay_ms: args.retry_delay * 1000,
            max_retry_delay_ms: args.max_retry_delay * 1000,
            use_jitter: false,
        });
    config.format = args.format.clone();
    config.format_sort = args.sort.clone();
    config
}

fn format_summary(report: &RunReport, snapshot: &GlobalSnapshot) -> String {
    let mut out = format!(
        "handled {}/{} episodes in {:?}: {} downloaded, {} without players, {} exhausted",
        snapshot.completed,
        snapshot.total,
        snapshot.elapsed,
        report.succeeded(),
        report.no_source(),
        report.exhausted(),
    );
    for (id, outcome) in &report.outcomes {
        match outcome {
            EpisodeOutcome::SourcesExhausted => {
                out.push_str(&format!("\n  all sources failed: {id}"));
            }
            EpisodeOutcome::NoSourceAvailable => {
                out.push_str(&format!("\n  no player available: {id}"));
            }
            EpisodeOutcome::Fatal { message } => {
                out.push_str(&format!("\n  aborted: {id}: {message}"));
            }
            _ => {}
        }
    }
    out
}

async fn run(args: Args) -> Result<RunReport, OrchestratorError> {
    let config = build_config(&args);

    let table = match &args.classification {
        Some(path) => ClassificationTable::from_json_file(path)?,
        None => ClassificationTable::default(),
    };

    let mut episodes = load_catalog(&args.catalog)?;
    if let Some(series) = &args.series {
        let needle = series.to_lowercase();
        episodes.retain(|ep| ep.id.series.to_lowercase().contains(&needle));
    }
    if episodes.is_empty() {
        warn!("catalog has no matching episodes, nothing to do");
        return Ok(RunReport::default());
    }

    let engine = YtdlpEngine::new(&args.ytdlp_bin);
    if !engine.is_available() {
        return Err(OrchestratorError::configuration(format!(
            "fetch engine `{}` is not available (is yt-dlp installed?)",
            args.ytdlp_bin.display()
        )));
    }
    if let Some(version) = engine.version() {
        info!(engine = "yt-dlp", version, "using fetch engine");
    }

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                token.cancel();
            }
        }
    });

    let (progress, rx) = progress_channel();
    let aggregator =
        tokio::spawn(ProgressAggregator::new(rx, Box::new(TerminalSink::new())).run());

    let scheduler = DownloadScheduler::new(config, table, Arc::new(engine), progress, token)?;
    let report = scheduler.run(episodes).await;
    drop(scheduler);

    let snapshot = aggregator.await.unwrap_or(GlobalSnapshot {
        completed: report.handled(),
        total: report.total(),
        elapsed: std::time::Duration::ZERO,
    });

    println!("{}", format_summary(&report, &snapshot));
    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(report) if report.fatal() == 0 && report.cancelled() == 0 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = %err, "run failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn legacy_language_is_appended_once() {
        let args = Args::parse_from(["aniget", "catalog.json", "-l", "vf,default"]);
        let config = build_config(&args);
        assert_eq!(config.language_preferences, ["vf", "default"]);

        let args = Args::parse_from(["aniget", "catalog.json", "-l", "vostfr"]);
        let config = build_config(&args);
        assert_eq!(config.language_preferences, ["vostfr", "default"]);
    }

    #[test]
    fn summary_lists_problem_episodes() {
        use aniget_engine::EpisodeId;

        let report = RunReport {
            outcomes: vec![
                (
                    EpisodeId::new("A", 1, 1),
                    EpisodeOutcome::Succeeded {
                        language: "vostfr".to_string(),
                    },
                ),
                (EpisodeId::new("A", 1, 2), EpisodeOutcome::SourcesExhausted),
                (
                    EpisodeId::new("A", 1, 3),
                    EpisodeOutcome::Fatal {
                        message: "disk full".to_string(),
                    },
                ),
            ],
        };
        let snapshot = GlobalSnapshot {
            completed: 2,
            total: 3,
            elapsed: std::time::Duration::from_secs(61),
        };

        let summary = format_summary(&report, &snapshot);
        assert!(summary.contains("handled 2/3"));
        assert!(summary.contains("all sources failed: A S01E02"));
        assert!(summary.contains("aborted: A S01E03: disk full"));
    }
}
