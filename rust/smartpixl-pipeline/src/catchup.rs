// smartpixl-pipeline: Failover catch-up reader

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::channel::{HandoffChannel, SendOutcome};
use crate::error::PipelineResult;
use smartpixl_record::TrackingRecord;

/// Catch-up reader tuning
#[derive(Debug, Clone)]
pub struct CatchupConfig {
    pub directory: PathBuf,
    pub scan_interval: std::time::Duration,
}

impl Default for CatchupConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./failover"),
            scan_interval: std::time::Duration::from_secs(10),
        }
    }
}

/// Failover files dated before `today`, oldest first. The current-date
/// file is still owned by the failover writer and is never touched.
pub fn eligible_files(dir: &Path, today: NaiveDate) -> Vec<(NaiveDate, PathBuf)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<(NaiveDate, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                return None;
            }
            let stem = path.file_stem()?.to_str()?;
            let date = NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()?;
            (date < today).then_some((date, path))
        })
        .collect();

    files.sort_by_key(|(date, _)| *date);
    files
}

/// Replays completed failover files into the enrichment channel.
///
/// A file is deleted only after every record in it has been handed off;
/// corrupt lines are counted and skipped because they are unrecoverable.
pub struct CatchupReader {
    config: CatchupConfig,
    output: Arc<HandoffChannel<TrackingRecord>>,
    replayed: Arc<AtomicU64>,
    corrupt_lines: Arc<AtomicU64>,
}

impl CatchupReader {
    pub fn new(config: CatchupConfig, output: Arc<HandoffChannel<TrackingRecord>>) -> Self {
        Self {
            config,
            output,
            replayed: Arc::new(AtomicU64::new(0)),
            corrupt_lines: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn replayed_counter(&self) -> Arc<AtomicU64> {
        self.replayed.clone()
    }

    pub fn corrupt_counter(&self) -> Arc<AtomicU64> {
        self.corrupt_lines.clone()
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.scan_once(&mut shutdown).await {
                warn!(error = %e, "failover catch-up scan failed");
            }
            if *shutdown.borrow() {
                break;
            }
        }
    }

    /// One directory pass; exposed for deterministic tests
    pub async fn scan_once(&self, shutdown: &mut watch::Receiver<bool>) -> PipelineResult<()> {
        let today = Utc::now().date_naive();
        for (date, path) in eligible_files(&self.config.directory, today) {
            let completed = self.replay_file(&path, shutdown).await?;
            if !completed {
                // Shut down mid-file: the file stays for the next run
                return Ok(());
            }
            tokio::fs::remove_file(&path).await?;
            info!(date = %date, path = %path.display(), "failover file drained and removed");
        }
        Ok(())
    }

    async fn replay_file(
        &self,
        path: &Path,
        shutdown: &mut watch::Receiver<bool>,
    ) -> PipelineResult<bool> {
        let file = tokio::fs::File::open(path).await?;
        let reader = tokio::io::BufReader::new(file);
        let mut lines = reader.lines();

        loop {
            let line = tokio::select! {
                _ = shutdown.changed() => return Ok(false),
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                return Ok(true);
            };
            if line.trim().is_empty() {
                continue;
            }

            let record: TrackingRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(e) => {
                    // Unrecoverable; skipping keeps the rest of the file alive
                    self.corrupt_lines.fetch_add(1, Ordering::Relaxed);
                    warn!(path = %path.display(), error = %e, "corrupt failover line skipped");
                    continue;
                }
            };

            let outcome = tokio::select! {
                _ = shutdown.changed() => return Ok(false),
                outcome = self.output.send(record) => outcome,
            };
            match outcome {
                SendOutcome::Sent => {
                    self.replayed.fetch_add(1, Ordering::Relaxed);
                }
                SendOutcome::TimedOut(_) | SendOutcome::Closed(_) => return Ok(false),
            }
        }
    }
}
