// smartpixl-edge: Failover spill worker

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use smartpixl_pipeline::{FailoverWriter, HandoffChannel, PipelineResult};
use smartpixl_record::TrackingRecord;

/// Single owner of the edge failover file. Records arrive one at a time
/// from the spill channel; flushing follows the per-batch bounds (record
/// count or interval), so a crash loses at most one unflushed batch.
pub struct SpillWorker {
    input: Arc<HandoffChannel<TrackingRecord>>,
    failover: FailoverWriter,
}

impl SpillWorker {
    pub fn new(input: Arc<HandoffChannel<TrackingRecord>>, failover: FailoverWriter) -> Self {
        Self { input, failover }
    }

    /// Drain until the spill channel is closed and empty. Returns an error
    /// only on an unrecoverable filesystem fault (fatal runtime, exit 2).
    pub async fn run(mut self) -> PipelineResult<()> {
        loop {
            match tokio::time::timeout(Duration::from_millis(250), self.input.recv()).await {
                Ok(Some(record)) => {
                    self.failover.append(&record)?;
                    self.failover.maybe_flush()?;
                }
                Ok(None) => break,
                // Idle tick: bound the time any record sits unflushed
                Err(_) => {
                    self.failover.maybe_flush()?;
                }
            }
        }

        self.failover.close()?;
        info!("spill worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use smartpixl_pipeline::{FailoverConfig, OverflowPolicy};

    fn record(pixel: i64) -> TrackingRecord {
        TrackingRecord {
            company_id: 1,
            pixel_id: pixel,
            received_at: Utc::now(),
            ip_address: "203.0.113.9".to_string(),
            forwarded_chain: Vec::new(),
            proxy_depth: 0,
            request_path: format!("/1/{pixel}"),
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

    #[tokio::test]
    async fn test_spilled_records_land_in_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let channel = Arc::new(HandoffChannel::new(64, OverflowPolicy::BlockWithTimeout));
        let failover = FailoverWriter::new(FailoverConfig {
            directory: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();

        for pixel in 1..=5 {
            channel.try_send(record(pixel));
        }
        channel.close();

        SpillWorker::new(channel, failover).run().await.unwrap();

        let today = Utc::now().date_naive();
        let path = dir
            .path()
            .join(format!("{}.jsonl", today.format("%Y-%m-%d")));
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 5);
    }

    #[tokio::test]
    async fn test_idle_tick_flushes_pending_record() {
        let dir = tempfile::tempdir().unwrap();
        let channel = Arc::new(HandoffChannel::new(64, OverflowPolicy::BlockWithTimeout));
        let failover = FailoverWriter::new(FailoverConfig {
            directory: dir.path().to_path_buf(),
            flush_max_records: 5000,
            flush_max_interval: Duration::from_millis(50),
        })
        .unwrap();

        let worker = tokio::spawn(SpillWorker::new(channel.clone(), failover).run());
        channel.try_send(record(1));

        // Well before channel close, the interval bound pushes it to disk
        tokio::time::sleep(Duration::from_millis(600)).await;
        let today = Utc::now().date_naive();
        let path = dir
            .path()
            .join(format!("{}.jsonl", today.format("%Y-%m-%d")));
        assert_eq!(std::fs::read_to_string(path).unwrap().lines().count(), 1);

        channel.close();
        worker.await.unwrap().unwrap();
    }
}
