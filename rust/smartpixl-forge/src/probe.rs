// smartpixl-forge: Self-healing health probe

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use smartpixl_classify::GeoCache;
use smartpixl_pipeline::{
    directory_stats, CircuitSnapshot, CircuitState, HandoffChannel, WriterCounters,
};
use smartpixl_record::TrackingRecord;

/// Probe cadence and issue de-duplication
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub interval: std::time::Duration,
    /// Repeated (issue, severity) pairs are reported once per this window
    pub dedup_window: std::time::Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(60),
            dedup_window: std::time::Duration::from_secs(7200),
        }
    }
}

/// Structured snapshot emitted for operator consumption
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub circuit: CircuitState,
    pub last_trip_reason: Option<String>,
    pub queue_depth: usize,
    pub enrichment_depth: usize,
    pub failover_files: usize,
    pub failover_bytes: u64,
    pub last_insert_latency_ms: u64,
    pub pipe_connections: usize,
    pub uptime_seconds: u64,
    pub is_reachable: bool,
    pub records_flushed: u64,
    pub records_spilled: u64,
    pub records_lost: u64,
    pub records_invalid: u64,
    pub writer_feed_evictions: u64,
    pub geo_cache_entries: usize,
    pub geo_backfill_depth: usize,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Severity {
    Warning,
    Critical,
}

/// Everything the probe observes, wired once at startup
pub struct ProbeDeps {
    pub circuit: Arc<ArcSwap<CircuitSnapshot>>,
    pub enrichment: Arc<HandoffChannel<TrackingRecord>>,
    pub writer_feed: Arc<HandoffChannel<TrackingRecord>>,
    pub writer_counters: WriterCounters,
    pub invalid_records: Arc<AtomicU64>,
    pub failover_dir: PathBuf,
    pub pipe_connections: Arc<AtomicUsize>,
    pub geo: Arc<GeoCache>,
    pub geo_backfill_capacity: usize,
    pub started: Instant,
}

/// Periodically snapshots component health, de-duplicates repeated issues,
/// auto-executes safe remediation, and escalates destructive actions by
/// notification only.
pub struct SelfHealingProbe {
    config: ProbeConfig,
    deps: ProbeDeps,
    published: Arc<ArcSwap<HealthSnapshot>>,
    recent_issues: HashMap<(&'static str, Severity), Instant>,
    geo_wedged_probes: u32,
}

impl SelfHealingProbe {
    pub fn new(config: ProbeConfig, deps: ProbeDeps) -> Self {
        let initial = take_snapshot(&deps);
        Self {
            config,
            deps,
            published: Arc::new(ArcSwap::from_pointee(initial)),
            recent_issues: HashMap::new(),
            geo_wedged_probes: 0,
        }
    }

    /// Latest snapshot for the internal health endpoint
    pub fn snapshot_handle(&self) -> Arc<ArcSwap<HealthSnapshot>> {
        self.published.clone()
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            self.tick();
        }
        info!("health probe stopped");
    }

    /// One probe pass; exposed for deterministic tests
    pub fn tick(&mut self) {
        let snapshot = take_snapshot(&self.deps);
        info!(
            circuit = ?snapshot.circuit,
            queue_depth = snapshot.queue_depth,
            failover_files = snapshot.failover_files,
            latency_ms = snapshot.last_insert_latency_ms,
            connections = snapshot.pipe_connections,
            "health probe"
        );
        self.evaluate(&snapshot);
        self.published.store(Arc::new(snapshot));
    }

    fn evaluate(&mut self, snapshot: &HealthSnapshot) {
        let circuit = self.deps.circuit.load_full();

        if circuit.state == CircuitState::Open {
            if circuit.permanent {
                // Destructive fix (schema change, operator reset) is never
                // automatic; escalate by notification
                self.report(
                    "schema-mismatch",
                    Severity::Critical,
                    "permanent database fault; operator reset required",
                );
            } else {
                self.report(
                    "writer-circuit-open",
                    Severity::Critical,
                    "bulk writer short-circuiting to failover",
                );
            }
        }

        if snapshot.failover_files > 0 && circuit.state == CircuitState::Closed {
            self.report(
                "failover-backlog",
                Severity::Warning,
                "failover files pending while the writer is healthy",
            );
        }

        if snapshot.queue_depth * 10 >= self.deps.writer_feed.capacity() * 9 {
            self.report(
                "writer-feed-saturated",
                Severity::Warning,
                "writer feed near capacity; evictions imminent",
            );
        }

        if snapshot.records_lost > 0 {
            self.report(
                "records-lost",
                Severity::Critical,
                "loss metric is non-zero; check the failover path",
            );
        }

        // Safe remediation: a backfill queue pinned at capacity for two
        // consecutive probes means the geo stage is wedged; clearing the
        // cache resets it without touching persisted data
        if snapshot.geo_backfill_depth >= self.deps.geo_backfill_capacity {
            self.geo_wedged_probes += 1;
            if self.geo_wedged_probes >= 2 {
                self.deps.geo.clear();
                self.geo_wedged_probes = 0;
                self.report(
                    "geo-backfill-wedged",
                    Severity::Warning,
                    "geo cache cleared to unwedge the backfill stage",
                );
            }
        } else {
            self.geo_wedged_probes = 0;
        }
    }

    fn report(&mut self, kind: &'static str, severity: Severity, message: &str) {
        let key = (kind, severity);
        if let Some(last) = self.recent_issues.get(&key) {
            if last.elapsed() < self.config.dedup_window {
                return;
            }
        }
        self.recent_issues.insert(key, Instant::now());

        match severity {
            Severity::Critical => error!(issue = kind, message),
            Severity::Warning => warn!(issue = kind, message),
        }
    }
}

fn take_snapshot(deps: &ProbeDeps) -> HealthSnapshot {
    let circuit = deps.circuit.load_full();
    let failover = directory_stats(&deps.failover_dir);

    HealthSnapshot {
        circuit: circuit.state,
        last_trip_reason: circuit.last_trip_reason.clone(),
        queue_depth: deps.writer_feed.len(),
        enrichment_depth: deps.enrichment.len(),
        failover_files: failover.files,
        failover_bytes: failover.total_bytes,
        last_insert_latency_ms: deps
            .writer_counters
            .last_insert_latency_ms
            .load(Ordering::Relaxed),
        pipe_connections: deps.pipe_connections.load(Ordering::Acquire),
        uptime_seconds: deps.started.elapsed().as_secs(),
        is_reachable: circuit.state != CircuitState::Open,
        records_flushed: deps.writer_counters.flushed.load(Ordering::Relaxed),
        records_spilled: deps.writer_counters.spilled.load(Ordering::Relaxed),
        records_lost: deps.writer_counters.lost.load(Ordering::Relaxed),
        records_invalid: deps.invalid_records.load(Ordering::Relaxed),
        writer_feed_evictions: deps.writer_feed.dropped_count(),
        geo_cache_entries: deps.geo.len(),
        geo_backfill_depth: deps.geo.backfill_len(),
        taken_at: Utc::now(),
    }
}
