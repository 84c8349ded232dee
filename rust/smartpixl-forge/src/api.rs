// smartpixl-forge: Loopback-only operator endpoints

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tracing::info;

use crate::probe::HealthSnapshot;
use smartpixl_classify::GeoCache;
use smartpixl_pipeline::CircuitReset;

/// State behind the internal endpoints
#[derive(Clone)]
pub struct ForgeApiState {
    pub health: Arc<ArcSwap<HealthSnapshot>>,
    pub circuit_reset: CircuitReset,
    pub geo: Arc<GeoCache>,
}

/// Internal router. Bound to loopback; a non-loopback peer that reaches it
/// anyway sees 404, indistinguishable from an absent route.
pub fn internal_router(state: ForgeApiState) -> Router {
    Router::new()
        .route("/internal/health", get(health))
        .route("/internal/circuit-reset", post(circuit_reset))
        .route("/internal/geo-cache/clear", post(clear_geo_cache))
        .with_state(state)
}

fn loopback_guard(peer: SocketAddr) -> Result<(), StatusCode> {
    if peer.ip().is_loopback() {
        Ok(())
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn health(
    State(state): State<ForgeApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    if let Err(status) = loopback_guard(peer) {
        return status.into_response();
    }
    Json((*state.health.load_full()).clone()).into_response()
}

async fn circuit_reset(
    State(state): State<ForgeApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    if let Err(status) = loopback_guard(peer) {
        return status.into_response();
    }
    state.circuit_reset.request();
    info!("circuit reset requested by operator");
    StatusCode::NO_CONTENT.into_response()
}

async fn clear_geo_cache(
    State(state): State<ForgeApiState>,
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
        assert!(loopback_guard("127.0.0.1:1".parse().unwrap()).is_ok());
        assert!(loopback_guard("[::1]:1".parse().unwrap()).is_ok());
        assert_eq!(
            loopback_guard("198.51.100.4:1".parse().unwrap()),
            Err(StatusCode::NOT_FOUND)
        );
    }
}
