// smartpixl-edge: Loopback-only operator endpoints

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tracing::info;

use crate::http::EdgeCounters;
use smartpixl_classify::GeoCache;
use smartpixl_pipeline::{directory_stats, HandoffChannel};
use smartpixl_record::TrackingRecord;

/// State behind the internal endpoints
#[derive(Clone)]
pub struct InternalState {
    pub geo: Arc<GeoCache>,
    pub staging: Arc<HandoffChannel<TrackingRecord>>,
    pub pipe_connected: Arc<AtomicBool>,
    pub failover_dir: PathBuf,
    pub counters: Arc<EdgeCounters>,
    pub started: Instant,
}

/// Health view of the edge process
#[derive(Debug, Serialize)]
struct EdgeHealth {
    staging_depth: usize,
    pipe_connected: bool,
    failover_files: usize,
    failover_bytes: u64,
    captured: u64,
    rejected: u64,
    spilled: u64,
    lost: u64,
    uptime_seconds: u64,
}

/// Internal router. Bound to loopback; a non-loopback peer that reaches it
/// anyway sees 404, indistinguishable from an absent route.
pub fn internal_router(state: InternalState) -> Router {
    Router::new()
        .route("/internal/health", get(health))
        .route("/internal/geo-cache/clear", post(clear_geo_cache))
        .with_state(state)
}

/// 404 for anything that is not the local operator
pub fn loopback_guard(peer: SocketAddr) -> Result<(), StatusCode> {
    if peer.ip().is_loopback() {
        Ok(())
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn health(
    State(state): State<InternalState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    if let Err(status) = loopback_guard(peer) {
        return status.into_response();
    }

    let failover = directory_stats(&state.failover_dir);
    Json(EdgeHealth {
        staging_depth: state.staging.len(),
        pipe_connected: state.pipe_connected.load(Ordering::Acquire),
        failover_files: failover.files,
        failover_bytes: failover.total_bytes,
        captured: state.counters.captured.load(Ordering::Relaxed),
        rejected: state.counters.rejected.load(Ordering::Relaxed),
        spilled: state.counters.spilled.load(Ordering::Relaxed),
        lost: state.counters.lost.load(Ordering::Relaxed),
        uptime_seconds: state.started.elapsed().as_secs(),
    })
    .into_response()
}

async fn clear_geo_cache(
    State(state): State<InternalState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    if let Err(status) = loopback_guard(peer) {
        return status.into_response();
    }

    let evicted = state.geo.len();
    state.geo.clear();
    info!(evicted, "geo cache cleared by operator");
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_guard() {
        assert!(loopback_guard("127.0.0.1:9999".parse().unwrap()).is_ok());
        assert!(loopback_guard("[::1]:9999".parse().unwrap()).is_ok());
        assert_eq!(
            loopback_guard("203.0.113.9:9999".parse().unwrap()),
            Err(StatusCode::NOT_FOUND)
        );
    }
}
