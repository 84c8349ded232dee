// smartpixl-edge: Public pixel endpoint

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use chrono::Utc;
use tracing::warn;

use crate::capture::{Capture, RequestEnvelope};
use smartpixl_pipeline::{HandoffChannel, SendOutcome};
use smartpixl_record::{TrackingRecord, TRANSPARENT_GIF};

/// Hot-path counters surfaced by the internal health endpoint
#[derive(Debug, Default)]
pub struct EdgeCounters {
    pub captured: AtomicU64,
    pub rejected: AtomicU64,
    pub spilled: AtomicU64,
    pub lost: AtomicU64,
}

/// Shared state behind the pixel handler
#[derive(Clone)]
pub struct EdgeState {
    pub capture: Arc<Capture>,
    pub staging: Arc<HandoffChannel<TrackingRecord>>,
    pub spill: Arc<HandoffChannel<TrackingRecord>>,
    pub staging_deadline: Duration,
    pub counters: Arc<EdgeCounters>,
}

/// Public router: every GET is a pixel request. Path validation happens in
/// capture, after the response; a malformed path still gets its GIF.
pub fn pixel_router(state: EdgeState) -> Router {
    Router::new().fallback(pixel).with_state(state)
}

async fn pixel(
    State(state): State<EdgeState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let envelope = RequestEnvelope {
        path: uri.path().to_string(),
        query: uri.query().unwrap_or("").to_string(),
        headers: headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
        peer: peer.ip(),
    };

    // The pixel goes out now; capture and handoff run after the response
    tokio::spawn(capture_and_handoff(state, envelope));

    gif_response()
}

/// Capture one envelope and hand the sealed record to the staging channel
/// within the deadline; on timeout or closure the record spills to the
/// failover path. Rejections and capture errors drop silently; the caller
/// already has its pixel.
pub async fn capture_and_handoff(state: EdgeState, envelope: RequestEnvelope) {
    let Some(record) = state.capture.seal(&envelope, Utc::now()) else {
        state.counters.rejected.fetch_add(1, Ordering::Relaxed);
        return;
    };
    state.counters.captured.fetch_add(1, Ordering::Relaxed);

    match state
        .staging
        .send_timeout(record, state.staging_deadline)
        .await
    {
        SendOutcome::Sent => {}
        SendOutcome::TimedOut(record) | SendOutcome::Closed(record) => {
            state.counters.spilled.fetch_add(1, Ordering::Relaxed);
            if let SendOutcome::Closed(_) = state.spill.send(record).await {
                state.counters.lost.fetch_add(1, Ordering::Relaxed);
                warn!("record dropped: staging and spill both closed");
            }
        }
    }
}

/// The fixed 43-byte transparent GIF with no-store caching
pub fn gif_response() -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        TRANSPARENT_GIF.as_slice(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::TrustedProxies;
    use smartpixl_classify::{
        BehaviourTracker, DatacenterIndex, GeoCache, GeoCacheConfig, StabilityConfig, WindowConfig,
    };
    use smartpixl_pipeline::OverflowPolicy;

    fn state(staging_capacity: usize) -> EdgeState {
        let (trusted, _) = TrustedProxies::from_cidrs::<&str>(&[]);
        EdgeState {
            capture: Arc::new(Capture::new(
                Arc::new(DatacenterIndex::empty()),
                Arc::new(BehaviourTracker::new(
                    WindowConfig::default(),
                    StabilityConfig::default(),
                )),
                Arc::new(GeoCache::new(GeoCacheConfig::default())),
                trusted,
            )),
            staging: Arc::new(HandoffChannel::new(
                staging_capacity,
                OverflowPolicy::BlockWithTimeout,
            )),
            spill: Arc::new(HandoffChannel::new(64, OverflowPolicy::BlockWithTimeout)),
            staging_deadline: Duration::from_millis(5),
            counters: Arc::new(EdgeCounters::default()),
        }
    }

    fn envelope(path: &str) -> RequestEnvelope {
        RequestEnvelope {
            path: path.to_string(),
            query: String::new(),
            headers: vec![("x-forwarded-for".to_string(), "203.0.113.9".to_string())],
            peer: "192.0.2.1".parse().unwrap(),
        }
    }

    #[test]
    fn test_gif_response_shape() {
        let response = gif_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/gif"
        );
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
    }

    #[tokio::test]
    async fn test_valid_request_reaches_staging() {
        let state = state(64);
        capture_and_handoff(state.clone(), envelope("/42/7/x")).await;

        assert_eq!(state.counters.captured.load(Ordering::Relaxed), 1);
        let record = state.staging.try_recv().unwrap();
        assert_eq!(record.company_id, 42);
        assert_eq!(record.ip_address, "203.0.113.9");
    }

    #[tokio::test]
    async fn test_malformed_path_counted_rejected() {
        let state = state(64);
        capture_and_handoff(state.clone(), envelope("/robots.txt")).await;

        assert_eq!(state.counters.rejected.load(Ordering::Relaxed), 1);
        assert!(state.staging.is_empty());
    }

    #[tokio::test]
    async fn test_full_staging_spills_within_deadline() {
        let state = state(1);
        capture_and_handoff(state.clone(), envelope("/1/1")).await;
        // Staging is now full; the next record must take the spill path
        capture_and_handoff(state.clone(), envelope("/2/2")).await;

        assert_eq!(state.counters.spilled.load(Ordering::Relaxed), 1);
        let spilled = state.spill.try_recv().unwrap();
        assert_eq!(spilled.company_id, 2);
    }
}
