// rust/smartpixl-edge/src/main.rs
// SmartPiXL Edge main entry point

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use smartpixl_classify::{
    BehaviourTracker, CidrTrie, DatacenterIndex, GeoBackfillWorker, GeoCache, GeoCacheConfig,
    StabilityConfig, WindowConfig,
};
use smartpixl_config::{load_config, SmartPixlConfig};
use smartpixl_edge::{
    internal_router, pixel_router, Capture, EdgeCounters, EdgeState, InternalState, PipeClient,
    PipeClientConfig, SpillWorker, TrustedProxies,
};
use smartpixl_pipeline::{
    FailoverConfig, FailoverWriter, HandoffChannel, OverflowPolicy, SqlGeoResolver,
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
    // Classification stack, assembled once into a static DAG
    let datacenters = Arc::new(DatacenterIndex::empty());
    if let Some(path) = &config.classify.datacenter_ranges_path {
        match smartpixl_classify::load_ranges_file(std::path::Path::new(path)) {
            Ok(ranges) => {
                let (trie, skipped) = CidrTrie::build(ranges);
                if skipped > 0 {
                    warn!(skipped, "invalid datacenter ranges skipped");
                }
                info!(ranges = trie.range_count(), "datacenter ranges loaded");
                datacenters.publish(trie);
            }
            Err(e) => {
                error!(error = %e, "cannot load datacenter ranges");
                return ExitCode::from(1);
            }
        }
    }

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

    let (trusted, bad_cidrs) = TrustedProxies::from_cidrs(&config.edge.trusted_proxy_cidrs);
    if bad_cidrs > 0 {
        // Validation already rejected these; unreachable outside tests
        warn!(bad_cidrs, "trusted proxy ranges skipped");
    }
    let capture = Arc::new(Capture::new(
        datacenters,
        behaviour,
        geo.clone(),
        trusted,
    ));

    // Handoff channels: staging toward the pipe, spill toward the disk
    let staging: Arc<HandoffChannel<TrackingRecord>> = Arc::new(HandoffChannel::new(
        config.edge.staging_capacity,
        OverflowPolicy::BlockWithTimeout,
    ));
    let spill: Arc<HandoffChannel<TrackingRecord>> = Arc::new(HandoffChannel::new(
        config.edge.staging_capacity,
        OverflowPolicy::BlockWithTimeout,
    ));

    // The Edge owns its own subdirectory of the failover root; the Forge
    // writer and catch-up reader never share a file handle with it
    let failover_dir = PathBuf::from(&config.failover.directory).join("edge");
    let failover = match FailoverWriter::new(FailoverConfig {
        directory: failover_dir.clone(),
        flush_max_records: config.writer.max_batch_size,
        flush_max_interval: Duration::from_millis(config.writer.batch_window_ms),
    }) {
        Ok(failover) => failover,
        Err(e) => {
            error!(error = %e, "cannot open failover directory");
            return ExitCode::from(1);
        }
    };
    let mut spill_task = tokio::spawn(SpillWorker::new(spill.clone(), failover).run());

    // Geo backfill against the warehouse geo table; the lazy pool keeps
    // startup clean while the database is down
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let geo_task = match PgPoolOptions::new()
        .max_connections(2)
        .connect_lazy(&config.database.url)
    {
        Ok(pool) => match SqlGeoResolver::new(pool, &config.database.geo_table) {
            Ok(resolver) => Some(tokio::spawn(
                GeoBackfillWorker::new(geo.clone(), Arc::new(resolver)).run(worker_shutdown_rx),
            )),
            Err(e) => {
                error!(error = %e, "invalid geo table name");
                return ExitCode::from(1);
            }
        },
        Err(e) => {
            warn!(error = %e, "geo backfill disabled: database url unusable");
            None
        }
    };

    let pipe_client = PipeClient::new(
        PipeClientConfig {
            socket_path: PathBuf::from(&config.pipe.socket_path),
            reconnect_initial: Duration::from_millis(config.pipe.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(config.pipe.reconnect_max_ms),
        },
        staging.clone(),
        spill.clone(),
    );
    let pipe_connected = pipe_client.connected_flag();
    let mut pipe_task = tokio::spawn(pipe_client.run());

    let counters = Arc::new(EdgeCounters::default());
    let state = EdgeState {
        capture,
        staging: staging.clone(),
        spill: spill.clone(),
        staging_deadline: Duration::from_millis(config.edge.staging_deadline_ms),
        counters: counters.clone(),
    };
    let internal_state = InternalState {
        geo,
        staging: staging.clone(),
        pipe_connected,
        failover_dir,
        counters,
        started: Instant::now(),
    };

    // Cannot bind: unrecoverable init failure
    let public_listener = match TcpListener::bind(&config.edge.bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind = %config.edge.bind_address, error = %e, "cannot bind pixel endpoint");
            return ExitCode::from(1);
        }
    };
    let internal_listener = match TcpListener::bind(&config.edge.internal_bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind = %config.edge.internal_bind_address, error = %e, "cannot bind internal endpoints");
            return ExitCode::from(1);
        }
    };

    info!(
        bind = %config.edge.bind_address,
        internal = %config.edge.internal_bind_address,
        staging = config.edge.staging_capacity,
        deadline_ms = config.edge.staging_deadline_ms,
        "edge started"
    );

    let public_server = axum::serve(
        public_listener,
        pixel_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());
    let internal_server = axum::serve(
        internal_listener,
        internal_router(internal_state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    let (public_result, internal_result) =
        tokio::join!(async { public_server.await }, async { internal_server.await });
    for result in [public_result, internal_result] {
        if let Err(e) = result {
            error!(error = %e, "http server error");
        }
    }

    // Graceful drain under the hard deadline: stop producing, let the pipe
    // client flush staging (spilling whatever it cannot write), then let
    // the spill worker fsync the failover file.
    info!("edge shutting down; draining in-flight records");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let _ = worker_shutdown_tx.send(true);
    staging.close();

    if tokio::time::timeout_at(deadline, &mut pipe_task)
        .await
        .is_err()
    {
        warn!("pipe drain exceeded the shutdown deadline; spilling remainder");
        pipe_task.abort();
        while let Some(record) = staging.try_recv() {
            if let smartpixl_pipeline::SendOutcome::Closed(_) = spill.send(record).await {
                break;
            }
        }
    }

    spill.close();
    let exit = match tokio::time::timeout_at(deadline + Duration::from_secs(5), &mut spill_task)
        .await
    {
        Ok(Ok(Ok(()))) => ExitCode::SUCCESS,
        Ok(Ok(Err(e))) => {
            error!(error = %e, "failover writer failed; records may be lost");
            ExitCode::from(2)
        }
        Ok(Err(e)) => {
            error!(error = %e, "spill worker panicked");
            ExitCode::from(2)
        }
        Err(_) => {
            error!("failover drain stalled past the shutdown deadline");
            ExitCode::from(2)
        }
    };

    if let Some(task) = geo_task {
        task.abort();
    }

    info!("edge stopped");
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
