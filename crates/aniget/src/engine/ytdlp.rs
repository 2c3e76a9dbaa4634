//! yt-dlp backed fetch engine.
//!
//! Spawns the `yt-dlp` binary per source and parses machine-readable
//! progress lines from its stdout. Error text is taken from the last
//! `ERROR:` line on stderr, which is the part of yt-dlp's output the
//! classification table is written against.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{FetchEngine, FetchOptions, FetchUpdate, ProgressCallback, TransferStatus};
use crate::error::FetchError;

/// Prefix injected via `--progress-template` so progress lines can be told
/// apart from the rest of yt-dlp's stdout.
const PROGRESS_PREFIX: &str = "ani:";

pub struct YtdlpEngine {
    binary: PathBuf,
}

impl YtdlpEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn build_args(source: &str, options: &FetchOptions) -> Vec<String> {
        let mut args = vec![
            "--newline".to_string(),
            "--no-playlist".to_string(),
            "--progress".to_string(),
            "--progress-template".to_string(),
            format!(
                "download:{PROGRESS_PREFIX}%(progress.downloaded_bytes)s:\
                 %(progress.total_bytes)s:%(progress.total_bytes_estimate)s"
            ),
            "-N".to_string(),
            options.fragment_concurrency.to_string(),
            "-o".to_string(),
            options.output_path.to_string_lossy().into_owned(),
        ];
        if let Some(format) = &options.format {
            args.push("-f".to_string());
            args.push(format.clone());
        }
        if let Some(sort) = &options.format_sort {
            args.push("-S".to_string());
            args.push(sort.clone());
        }
        args.push(source.to_string());
        args
    }
}

/// Parse one progress line emitted through `--progress-template`.
///
/// yt-dlp prints `NA` for fields it does not know; the total falls back to
/// the estimate and then to unknown.
fn parse_progress_line(line: &str) -> Option<FetchUpdate> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = rest.splitn(3, ':');
    let downloaded = parse_bytes(fields.next()?)?;
    let total = fields.next().and_then(parse_bytes);
    let estimate = fields.next().and_then(parse_bytes);
    Some(FetchUpdate {
        status: TransferStatus::Downloading,
        downloaded_bytes: downloaded,
        total_bytes: total.or(estimate),
    })
}

fn parse_bytes(field: &str) -> Option<u64> {
    let field = field.trim();
    if let Ok(value) = field.parse::<u64>() {
        return Some(value);
    }
    // Estimates come out of yt-dlp as floats.
    field.parse::<f64>().ok().map(|v| v as u64)
}

#[async_trait]
impl FetchEngine for YtdlpEngine {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch(
        &self,
        source: &str,
        options: &FetchOptions,
        progress: ProgressCallback,
        token: &CancellationToken,
    ) -> Result<i32, FetchError> {
        let args = Self::build_args(source, options);
        debug!(source, ?args, "spawning yt-dlp");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut last_error: Option<String> = None;
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(message) = line.strip_prefix("ERROR:") {
                        last_error = Some(message.trim().to_string());
                    }
                }
            }
            last_error
        });

        let mut last_update: Option<FetchUpdate> = None;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        let _ = child.start_kill();
                        break;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if let Some(update) = parse_progress_line(&line) {
                                last_update = Some(update);
                                progress(update);
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            warn!(source, error = %err, "failed reading yt-dlp stdout");
                            break;
                        }
                    }
                }
            }
        }

        let status = child.wait().await?;
        let last_error = stderr_task.await.unwrap_or(None);

        if status.success() {
            if let Some(update) = last_update {
                progress(FetchUpdate {
                    status: TransferStatus::Finished,
                    ..update
                });
            }
            return Ok(0);
        }

        match last_error {
            Some(message) => Err(FetchError::engine(message)),
            None => Ok(status.code().unwrap_or(-1)),
        }
    }

    fn is_available(&self) -> bool {
        std::process::Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn version(&self) -> Option<String> {
        let output = std::process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8(output.stdout)
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|version| !version.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> FetchOptions {
        FetchOptions {
            output_path: PathBuf::from("out/Frieren/S01E01.%(ext)s"),
            fragment_concurrency: 8,
            format: Some("bv*+ba/b".to_string()),
            format_sort: Some("res:1080".to_string()),
        }
    }

    #[test]
    fn args_carry_options_through() {
        let args = YtdlpEngine::build_args("https://example.com/v", &options());
        let joined = args.join(" ");
        assert!(joined.contains("-N 8"));
        assert!(joined.contains("-o out/Frieren/S01E01.%(ext)s"));
        assert!(joined.contains("-f bv*+ba/b"));
        assert!(joined.contains("-S res:1080"));
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/v"));
    }

    #[test]
    fn format_flags_are_omitted_when_unset() {
        let opts = FetchOptions {
            format: None,
            format_sort: None,
            ..options()
        };
        let args = YtdlpEngine::build_args("https://example.com/v", &opts);
        assert!(!args.contains(&"-f".to_string()));
        assert!(!args.contains(&"-S".to_string()));
    }

    #[test]
    fn parses_progress_with_known_total() {
        let update = parse_progress_line("ani:1024:4096:NA").unwrap();
        assert_eq!(update.downloaded_bytes, 1024);
        assert_eq!(update.total_bytes, Some(4096));
    }

    #[test]
    fn parses_progress_with_estimate_only() {
        let update = parse_progress_line("ani:500:NA:1000.0").unwrap();
        assert_eq!(update.downloaded_bytes, 500);
        assert_eq!(update.total_bytes, Some(1000));
    }

    #[test]
    fn parses_progress_with_unknown_total() {
        let update = parse_progress_line("ani:500:NA:NA").unwrap();
        assert_eq!(update.downloaded_bytes, 500);
        assert_eq!(update.total_bytes, None);
    }

    #[test]
    fn ignores_unrelated_output_lines() {
        assert!(parse_progress_line("[download] Destination: x.mp4").is_none());
        assert!(parse_progress_line("ani:garbage:NA:NA").is_none());
    }
}
