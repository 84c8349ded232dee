// rust/smartpixl-forge/src/main.rs
// SmartPiXL Forge main entry point

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use smartpixl_classify::{
    BehaviourTracker, GeoBackfillWorker, GeoCache, GeoCacheConfig, StabilityConfig, WindowConfig,
};
use smartpixl_config::{load_config, SmartPixlConfig};
use smartpixl_forge::{
    internal_router, EnrichmentWorker, ForgeApiState, PipeListener, ProbeConfig, ProbeDeps,
    SelfHealingProbe,
};
use smartpixl_pipeline::{
    BulkWriter, CatchupConfig, CatchupReader, FailoverConfig, FailoverWriter, HandoffChannel,
    OverflowPolicy, PostgresRawSink, SqlGeoResolver, WriterCircuit, WriterConfig,
};
use smartpixl_record::TrackingRecord;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::var("SMARTPIXL_CONFIG").ok().map(PathBuf::from);
    let config = match load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(1);
        }
    };

    run(config).await
}

async fn run(config: SmartPixlConfig) -> ExitCode {
    // Authoritative classification state for enrichment
    let behaviour = Arc::new(BehaviourTracker::new(
        WindowConfig {
            window: Duration::from_secs(config.classify.window_secs),
            capacity: config.classify.window_capacity,
            rapid_fire_count: config.classify.rapid_fire_count,
            rapid_fire_within: Duration::from_millis(config.classify.rapid_fire_within_ms),
            velocity_distinct: config.classify.velocity_distinct,
        },
        StabilityConfig {
            capacity_per_ip: config.classify.stability_capacity,
            shards: config.classify.stability_shards,
            horizon: Duration::from_secs(config.classify.stability_horizon_secs),
        },
    ));
    let geo = Arc::new(GeoCache::new(GeoCacheConfig {
        cache_capacity: config.geo.cache_capacity,
        backfill_capacity: config.geo.backfill_capacity,
        refresh_after: Duration::from_secs(config.geo.refresh_after_days as u64 * 86_400),
    }));

    // Handoff channels: pipe ingestion blocks (backpressure to the Edge),
    // the writer feed drops oldest (fresh traffic wins under overload)
    let enrichment: Arc<HandoffChannel<TrackingRecord>> = Arc::new(HandoffChannel::new(
        config.forge.enrichment_capacity,
        OverflowPolicy::BlockWithTimeout,
    ));
    let writer_feed: Arc<HandoffChannel<TrackingRecord>> = Arc::new(HandoffChannel::new(
        config.forge.writer_capacity,
        OverflowPolicy::DropOldest,
    ));

    // Persistence stage: lazy pool, circuit breaker, failover writer
    let sink = match PostgresRawSink::connect_lazy(&config.database.url, &config.database.raw_table, 4)
    {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            error!(error = %e, "cannot construct raw sink");
            return ExitCode::from(1);
        }
    };
    let pool = sink.pool().clone();

    let circuit = WriterCircuit::new(
        config.writer.failure_threshold,
        Duration::from_secs(config.writer.cooldown_secs),
    );
    let circuit_reset = circuit.reset_handle();
    let circuit_snapshot = circuit.snapshot_handle();

    // Per-process failover subdirectories keep every file single-owner:
    // the writer spills into forge/, the Edge spills into edge/, and the
    // catch-up readers drain both
    let failover_root = PathBuf::from(&config.failover.directory);
    let failover = match FailoverWriter::new(FailoverConfig {
        directory: failover_root.join("forge"),
        flush_max_records: config.writer.max_batch_size,
        flush_max_interval: Duration::from_millis(config.writer.batch_window_ms),
    }) {
        Ok(failover) => failover,
        Err(e) => {
            error!(error = %e, "cannot open failover directory");
            return ExitCode::from(1);
        }
    };

    let writer = BulkWriter::new(
        writer_feed.clone(),
        sink,
        circuit,
        failover,
        WriterConfig {
            max_batch_size: config.writer.max_batch_size,
            batch_window: Duration::from_millis(config.writer.batch_window_ms),
            retry_attempts: config.writer.retry_attempts,
            retry_backoff_min: Duration::from_millis(config.writer.retry_backoff_min_ms),
            retry_backoff_max: Duration::from_millis(config.writer.retry_backoff_max_ms),
        },
    );
    let writer_counters = writer.counters();
    let (writer_shutdown_tx, writer_shutdown_rx) = watch::channel(false);
    let mut writer_task = tokio::spawn(writer.run(writer_shutdown_rx));

    // Catch-up replay of completed failover days, one reader per
    // single-owner subdirectory
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let catchup_tasks: Vec<_> = ["edge", "forge"]
        .into_iter()
        .map(|side| {
            let catchup = CatchupReader::new(
                CatchupConfig {
                    directory: failover_root.join(side),
                    scan_interval: Duration::from_secs(config.failover.scan_interval_secs),
                },
                enrichment.clone(),
            );
            tokio::spawn(catchup.run(worker_shutdown_rx.clone()))
        })
        .collect();

    // Pipe listener; bind failure is an init failure
    let listener = match PipeListener::bind(Path::new(&config.pipe.socket_path), enrichment.clone())
    {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "cannot bind pipe listener");
            return ExitCode::from(1);
        }
    };
    let pipe_connections = listener.connection_counter();
    let listener_task = tokio::spawn(listener.run(worker_shutdown_rx.clone()));

    // Enrichment worker between the pipe and the writer
    let enricher = EnrichmentWorker::new(
        enrichment.clone(),
        writer_feed.clone(),
        geo.clone(),
        behaviour,
    );
    let invalid_records = enricher.invalid_counter();
    let enrich_task = tokio::spawn(enricher.run());

    // Geo backfill against the warehouse geo table
    let geo_task = match SqlGeoResolver::new(pool, &config.database.geo_table) {
        Ok(resolver) => Some(tokio::spawn(
            GeoBackfillWorker::new(geo.clone(), Arc::new(resolver)).run(worker_shutdown_rx.clone()),
        )),
        Err(e) => {
            error!(error = %e, "invalid geo table name");
            return ExitCode::from(1);
        }
    };

    // Self-healing probe
    let probe = SelfHealingProbe::new(
        ProbeConfig {
            interval: Duration::from_secs(config.forge.probe_interval_secs),
            dedup_window: Duration::from_secs(config.forge.issue_dedup_window_secs),
        },
        ProbeDeps {
            circuit: circuit_snapshot,
            enrichment: enrichment.clone(),
            writer_feed: writer_feed.clone(),
            writer_counters,
            invalid_records,
            failover_dir: failover_root,
            pipe_connections,
            geo: geo.clone(),
            geo_backfill_capacity: config.geo.backfill_capacity,
            started: Instant::now(),
        },
    );
    let health = probe.snapshot_handle();
    let probe_task = tokio::spawn(probe.run(worker_shutdown_rx));

    // Internal operator endpoints on loopback
    let internal_listener = match TcpListener::bind(&config.forge.internal_bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind = %config.forge.internal_bind_address, error = %e, "cannot bind internal endpoints");
            return ExitCode::from(1);
        }
    };
    let api_state = ForgeApiState {
        health,
        circuit_reset,
        geo,
    };
    let internal_server = axum::serve(
        internal_listener,
        internal_router(api_state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    info!(
        pipe = %config.pipe.socket_path,
        internal = %config.forge.internal_bind_address,
        batch = config.writer.max_batch_size,
        window_ms = config.writer.batch_window_ms,
        "forge started"
    );

    if let Err(e) = internal_server.await {
        error!(error = %e, "internal endpoint server error");
    }

    // Graceful drain: stop intake first, then let each stage empty into
    // the next, writer last. Hard deadline 10 s, then remainder spills.
    info!("forge shutting down; draining pipeline");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let _ = worker_shutdown_tx.send(true);
    let _ = tokio::time::timeout_at(deadline, listener_task).await;
    for task in catchup_tasks {
        let _ = tokio::time::timeout_at(deadline, task).await;
    }

    enrichment.close();
    if tokio::time::timeout_at(deadline, enrich_task).await.is_err() {
        warn!("enrichment drain exceeded the shutdown deadline");
    }

    writer_feed.close();
    let _ = writer_shutdown_tx.send(true);
    let exit = match tokio::time::timeout_at(deadline + Duration::from_secs(5), &mut writer_task)
        .await
    {
        Ok(Ok(Ok(()))) => ExitCode::SUCCESS,
        Ok(Ok(Err(e))) => {
            error!(error = %e, "bulk writer failed; records may be lost");
            ExitCode::from(2)
        }
        Ok(Err(e)) => {
            error!(error = %e, "bulk writer panicked");
            ExitCode::from(2)
        }
        Err(_) => {
            error!("writer drain stalled past the shutdown deadline");
            ExitCode::from(2)
        }
    };

    if let Some(task) = geo_task {
        task.abort();
    }
    probe_task.abort();

    info!("forge stopped");
    exit
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
