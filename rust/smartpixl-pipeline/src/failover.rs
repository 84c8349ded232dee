// smartpixl-pipeline: Dated JSONL failover files

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info};

use crate::error::PipelineResult;
use smartpixl_record::TrackingRecord;

/// Failover file tuning
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Directory owned by exactly one writer; the Edge and Forge each use
    /// their own subdirectory of the configured failover root
    pub directory: PathBuf,
    /// Flush at least every this many appended records
    pub flush_max_records: usize,
    /// Flush at least this often while records are pending
    pub flush_max_interval: std::time::Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./failover"),
            flush_max_records: 5000,
            flush_max_interval: std::time::Duration::from_millis(250),
        }
    }
}

/// Aggregate view of a failover directory for the health probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailoverStats {
    pub files: usize,
    pub total_bytes: u64,
}

/// Count `*.jsonl` files and bytes in a failover directory, including the
/// per-process subdirectories one level down
pub fn directory_stats(dir: &Path) -> FailoverStats {
    let mut stats = FailoverStats::default();
    collect_stats(dir, &mut stats, true);
    stats
}

fn collect_stats(dir: &Path, stats: &mut FailoverStats, descend: bool) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if descend {
                collect_stats(&path, stats, false);
            }
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            stats.files += 1;
            stats.total_bytes += meta.len();
        }
    }
}

struct OpenDay {
    date: NaiveDate,
    writer: BufWriter<File>,
    path: PathBuf,
}

/// Append-only writer over one dated `YYYY-MM-DD.jsonl` file at a time.
///
/// Single owner per file handle; concurrent access is disallowed. Writes
/// are flushed per batch, never per record: a crash loses at most the last
/// unflushed batch. Rotation at UTC midnight fsyncs the closing file, as
/// does graceful shutdown.
pub struct FailoverWriter {
    config: FailoverConfig,
    current: Option<OpenDay>,
    unflushed: usize,
    last_flush: Instant,
    appended: u64,
}

impl FailoverWriter {
    pub fn new(config: FailoverConfig) -> PipelineResult<Self> {
        std::fs::create_dir_all(&config.directory)?;
        Ok(Self {
            config,
            current: None,
            unflushed: 0,
            last_flush: Instant::now(),
            appended: 0,
        })
    }

    /// Append one record under today's UTC date
    pub fn append(&mut self, record: &TrackingRecord) -> PipelineResult<()> {
        self.append_dated(Utc::now().date_naive(), record)
    }

    /// Append under an explicit date; rotation happens when the date moves
    /// past the open file's
    pub fn append_dated(&mut self, date: NaiveDate, record: &TrackingRecord) -> PipelineResult<()> {
        self.rotate_if_needed(date)?;

        let day = self
            .current
            .as_mut()
            .ok_or_else(|| std::io::Error::other("failover file not open"))?;
        serde_json::to_writer(&mut day.writer, record)?;
        day.writer.write_all(b"\n")?;

        self.unflushed += 1;
        self.appended += 1;
        Ok(())
    }

    /// Append a whole batch and flush it as one unit
    pub fn append_batch(&mut self, records: &[TrackingRecord]) -> PipelineResult<usize> {
        for record in records {
            self.append(record)?;
        }
        self.flush()?;
        Ok(records.len())
    }

    /// Flush when either per-batch bound is exceeded; owners of per-record
    /// append paths call this from their tick
    pub fn maybe_flush(&mut self) -> PipelineResult<bool> {
        if self.unflushed == 0 {
            return Ok(false);
        }
        if self.unflushed >= self.config.flush_max_records
            || self.last_flush.elapsed() >= self.config.flush_max_interval
        {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn flush(&mut self) -> PipelineResult<()> {
        if let Some(day) = self.current.as_mut() {
            day.writer.flush()?;
        }
        self.unflushed = 0;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Flush and fsync the open file
    pub fn sync(&mut self) -> PipelineResult<()> {
        self.flush()?;
        if let Some(day) = self.current.as_mut() {
            day.writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Graceful shutdown: fsync and release the handle
    pub fn close(&mut self) -> PipelineResult<()> {
        self.sync()?;
        if let Some(day) = self.current.take() {
            info!(path = %day.path.display(), "failover file closed");
        }
        Ok(())
    }

    /// Records appended over the writer's lifetime
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Path of the currently open file, if any
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|day| day.path.as_path())
    }

    fn rotate_if_needed(&mut self, date: NaiveDate) -> PipelineResult<()> {
        let needs_rotation = match &self.current {
            Some(day) => day.date != date,
            None => true,
        };
        if !needs_rotation {
            return Ok(());
        }

        if self.current.is_some() {
            self.sync()?;
            if let Some(day) = self.current.take() {
                debug!(path = %day.path.display(), "failover file rotated");
            }
        }

        let path = self
            .config
            .directory
            .join(format!("{}.jsonl", date.format("%Y-%m-%d")));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.current = Some(OpenDay {
            date,
            writer: BufWriter::new(file),
            path,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn record(pixel: i64) -> TrackingRecord {
        TrackingRecord {
            company_id: 42,
            pixel_id: pixel,
            received_at: Utc::now(),
            ip_address: "203.0.113.9".to_string(),
            forwarded_chain: Vec::new(),
            proxy_depth: 0,
            request_path: format!("/42/{pixel}"),
            query_string: String::new(),
            user_agent: String::new(),
            referer: String::new(),
            headers_json: "{}".to_string(),
            fingerprint_hash: 0,
            datacenter: None,
            behaviour: Default::default(),
            geo: None,
        }
    }

    fn writer_in(dir: &Path) -> FailoverWriter {
        FailoverWriter::new(FailoverConfig {
            directory: dir.to_path_buf(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_in(dir.path());

        writer
            .append_batch(&[record(1), record(2), record(3)])
            .unwrap();

        let path = writer.current_path().unwrap().to_path_buf();
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        for (i, line) in lines.iter().enumerate() {
            let parsed: TrackingRecord = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.pixel_id, (i + 1) as i64);
        }
    }

    #[test]
    fn test_filename_is_utc_date() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_in(dir.path());
        writer.append(&record(1)).unwrap();
        writer.flush().unwrap();

        let today = Utc::now().date_naive();
        let expected = format!(
            "{:04}-{:02}-{:02}.jsonl",
            today.year(),
            today.month(),
            today.day()
        );
        let name = writer
            .current_path()
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        assert_eq!(name, expected);
    }

    #[test]
    fn test_rotation_on_date_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_in(dir.path());

        let yesterday = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        writer.append_dated(yesterday, &record(1)).unwrap();
        writer.append_dated(today, &record(2)).unwrap();
        writer.close().unwrap();

        let old = dir.path().join("2026-07-31.jsonl");
        let new = dir.path().join("2026-08-01.jsonl");
        assert_eq!(std::fs::read_to_string(old).unwrap().lines().count(), 1);
        assert_eq!(std::fs::read_to_string(new).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_append_without_flush_stays_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_in(dir.path());

        writer.append(&record(1)).unwrap();
        let path = writer.current_path().unwrap().to_path_buf();
        // Unflushed batch is not on disk yet; the loss bound is one batch
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        writer.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_maybe_flush_honours_record_bound() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = FailoverWriter::new(FailoverConfig {
            directory: dir.path().to_path_buf(),
            flush_max_records: 2,
            flush_max_interval: std::time::Duration::from_secs(3600),
        })
        .unwrap();

        writer.append(&record(1)).unwrap();
        assert!(!writer.maybe_flush().unwrap());
        writer.append(&record(2)).unwrap();
        assert!(writer.maybe_flush().unwrap());
    }

    #[test]
    fn test_directory_stats_counts_jsonl_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2026-07-30.jsonl"), "{}\n{}\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let stats = directory_stats(dir.path());
        assert_eq!(stats.files, 1);
        assert_eq!(stats.total_bytes, 6);
    }

    #[test]
    fn test_directory_stats_sees_process_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("edge")).unwrap();
        std::fs::create_dir_all(dir.path().join("forge")).unwrap();
        std::fs::write(dir.path().join("edge/2026-07-30.jsonl"), "{}\n").unwrap();
        std::fs::write(dir.path().join("forge/2026-07-30.jsonl"), "{}\n{}\n").unwrap();

        let stats = directory_stats(dir.path());
        assert_eq!(stats.files, 2);
        assert_eq!(stats.total_bytes, 9);
    }
}
