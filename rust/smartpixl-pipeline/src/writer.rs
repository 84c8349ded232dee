// smartpixl-pipeline: Circuit-broken bulk writer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::breaker::{FlushGate, WriterCircuit};
use crate::channel::HandoffChannel;
use crate::error::{is_transient, PipelineError, PipelineResult};
use crate::failover::FailoverWriter;
use crate::sink::RawSink;
use smartpixl_record::TrackingRecord;

/// Bulk writer tuning
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Size threshold per batch
    pub max_batch_size: usize,
    /// Time threshold per batch
    pub batch_window: std::time::Duration,
    /// In-batch retries before the batch counts as failed
    pub retry_attempts: u32,
    /// Jittered backoff bounds between in-batch retries
    pub retry_backoff_min: std::time::Duration,
    pub retry_backoff_max: std::time::Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 5000,
            batch_window: std::time::Duration::from_millis(250),
            retry_attempts: 2,
            retry_backoff_min: std::time::Duration::from_millis(50),
            retry_backoff_max: std::time::Duration::from_millis(200),
        }
    }
}

/// Shared writer counters for the health probe. The loss metric stays zero
/// under correct configuration: it counts records that could be neither
/// persisted nor spilled.
#[derive(Clone, Default)]
pub struct WriterCounters {
    pub flushed: Arc<AtomicU64>,
    pub failed_batches: Arc<AtomicU64>,
    pub spilled: Arc<AtomicU64>,
    pub lost: Arc<AtomicU64>,
    pub last_insert_latency_ms: Arc<AtomicU64>,
}

/// Drains the writer channel into size-or-time bounded batches and flushes
/// each through the sink behind the circuit breaker. While the circuit is
/// open the channel drains straight into the failover file; failover is a
/// property of the persistence stage, not the Edge.
pub struct BulkWriter {
    input: Arc<HandoffChannel<TrackingRecord>>,
    sink: Arc<dyn RawSink>,
    circuit: WriterCircuit,
    failover: FailoverWriter,
    config: WriterConfig,
    counters: WriterCounters,
}

impl BulkWriter {
    pub fn new(
        input: Arc<HandoffChannel<TrackingRecord>>,
        sink: Arc<dyn RawSink>,
        circuit: WriterCircuit,
        failover: FailoverWriter,
        config: WriterConfig,
    ) -> Self {
        Self {
            input,
            sink,
            circuit,
            failover,
            config,
            counters: WriterCounters::default(),
        }
    }

    pub fn counters(&self) -> WriterCounters {
        self.counters.clone()
    }

    /// Writer loop. Returns an error only on an unrecoverable failover
    /// filesystem fault (fatal runtime, exit code 2).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> PipelineResult<()> {
        loop {
            let batch = self.collect_batch(&mut shutdown).await;
            if !batch.is_empty() {
                self.dispatch(batch).await?;
            }

            if *shutdown.borrow() || self.input.is_closed() {
                break;
            }
        }

        // Graceful shutdown: the current batch was already flushed above;
        // everything still queued goes to failover so nothing is lost.
        loop {
            let rest = self.input.drain(self.config.max_batch_size);
            if rest.is_empty() {
                break;
            }
            self.spill(&rest)?;
        }
        self.failover.close()?;
        info!("bulk writer stopped");
        Ok(())
    }

    /// Gather up to the size threshold, waiting at most the batch window
    async fn collect_batch(&self, shutdown: &mut watch::Receiver<bool>) -> Vec<TrackingRecord> {
        let deadline = tokio::time::Instant::now() + self.config.batch_window;
        let mut batch = Vec::with_capacity(self.config.max_batch_size.min(1024));

        while batch.len() < self.config.max_batch_size {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep_until(deadline) => break,
                item = self.input.recv() => match item {
                    Some(record) => batch.push(record),
                    None => break,
                },
            }
        }
        batch
    }

    async fn dispatch(&mut self, batch: Vec<TrackingRecord>) -> PipelineResult<()> {
        match self.circuit.gate() {
            FlushGate::ShortCircuit => self.spill(&batch),
            FlushGate::Proceed | FlushGate::Probe => {
                match self.flush_with_retries(&batch).await {
                    Ok(latency) => {
                        self.counters
                            .last_insert_latency_ms
                            .store(latency.as_millis() as u64, Ordering::Relaxed);
                        self.counters
                            .flushed
                            .fetch_add(batch.len() as u64, Ordering::Relaxed);
                        self.circuit.on_batch_success();
                        Ok(())
                    }
                    Err(e) => {
                        self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                        match &e {
                            PipelineError::PermanentDatabase(reason) => {
                                error!(%reason, "permanent database fault; writer halted until operator reset");
                                self.circuit.trip_permanent(reason);
                            }
                            _ => {
                                warn!(error = %e, "batch flush failed");
                                self.circuit.on_batch_failure(&e.to_string());
                            }
                        }
                        self.spill(&batch)
                    }
                }
            }
        }
    }

    /// One batch, retried in place with jittered backoff while the error
    /// stays transient
    async fn flush_with_retries(
        &self,
        batch: &[TrackingRecord],
    ) -> PipelineResult<std::time::Duration> {
        let mut attempt = 0u32;
        loop {
            let started = Instant::now();
            match self.sink.insert_batch(batch).await {
                Ok(()) => return Ok(started.elapsed()),
                Err(e) => {
                    if !is_transient(&e) || attempt >= self.config.retry_attempts {
                        return Err(e);
                    }
                    attempt += 1;
                    let backoff = jittered_backoff(
                        self.config.retry_backoff_min,
                        self.config.retry_backoff_max,
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    fn spill(&mut self, batch: &[TrackingRecord]) -> PipelineResult<()> {
        match self.failover.append_batch(batch) {
            Ok(count) => {
                self.counters
                    .spilled
                    .fetch_add(count as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.counters
                    .lost
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                error!(error = %e, records = batch.len(), "failover spill failed; records lost");
                Err(e)
            }
        }
    }
}

fn jittered_backoff(
    min: std::time::Duration,
    max: std::time::Duration,
) -> std::time::Duration {
    let lo = min.as_millis() as u64;
    let hi = (max.as_millis() as u64).max(lo);
    std::time::Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}
