// smartpixl-edge: Pipe client toward the Forge

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use smartpixl_pipeline::{HandoffChannel, SendOutcome};
use smartpixl_record::{write_frame, TrackingRecord};

/// Pipe client tuning
#[derive(Debug, Clone)]
pub struct PipeClientConfig {
    pub socket_path: PathBuf,
    /// Exponential reconnect backoff floor
    pub reconnect_initial: Duration,
    /// Backoff cap
    pub reconnect_max: Duration,
}

impl Default for PipeClientConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/smartpixl/forge.sock"),
            reconnect_initial: Duration::from_millis(100),
            reconnect_max: Duration::from_secs(5),
        }
    }
}

/// Drains the staging channel into the local pipe, reconnecting with
/// exponential backoff on any I/O error.
///
/// Spill decisions are per-record: a write that fails spills that one
/// record; everything still queued in staging waits for the reconnect.
pub struct PipeClient {
    config: PipeClientConfig,
    staging: Arc<HandoffChannel<TrackingRecord>>,
    spill: Arc<HandoffChannel<TrackingRecord>>,
    connected: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
}

impl PipeClient {
    pub fn new(
        config: PipeClientConfig,
        staging: Arc<HandoffChannel<TrackingRecord>>,
        spill: Arc<HandoffChannel<TrackingRecord>>,
    ) -> Self {
        Self {
            config,
            staging,
            spill,
            connected: Arc::new(AtomicBool::new(false)),
            frames_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Connectivity flag for the health endpoint
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    pub fn frames_counter(&self) -> Arc<AtomicU64> {
        self.frames_sent.clone()
    }

    pub async fn run(self) {
        let mut backoff = self.config.reconnect_initial;

        'reconnect: loop {
            if self.staging.is_closed() && self.staging.is_empty() {
                break;
            }

            let mut stream = match UnixStream::connect(&self.config.socket_path).await {
                Ok(stream) => {
                    info!(path = %self.config.socket_path.display(), "pipe connected");
                    self.connected.store(true, Ordering::Release);
                    backoff = self.config.reconnect_initial;
                    stream
                }
                Err(e) => {
                    self.connected.store(false, Ordering::Release);
                    debug!(error = %e, "pipe unavailable");

                    if self.staging.is_closed() {
                        // Shutting down with no pipe: everything left
                        // spills so nothing is silently dropped
                        while let Some(record) = self.staging.try_recv() {
                            if let SendOutcome::Closed(_) = self.spill.send(record).await {
                                warn!("spill channel closed during pipe drain");
                                break;
                            }
                        }
                        break;
                    }

                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.reconnect_max);
                    continue;
                }
            };

            loop {
                let Some(record) = self.staging.recv().await else {
                    // Closed and drained
                    break 'reconnect;
                };
                if let Err(e) = write_frame(&mut stream, &record).await {
                    warn!(error = %e, "pipe write failed; record spills, client reconnects");
                    self.connected.store(false, Ordering::Release);
                    if let SendOutcome::Closed(_) = self.spill.send(record).await {
                        warn!("spill channel closed while handling pipe failure");
                    }
                    continue 'reconnect;
                }
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.connected.store(false, Ordering::Release);
        info!("pipe client stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use smartpixl_pipeline::OverflowPolicy;
    use smartpixl_record::read_frame;
    use tokio::net::UnixListener;

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

    fn channels() -> (
        Arc<HandoffChannel<TrackingRecord>>,
        Arc<HandoffChannel<TrackingRecord>>,
    ) {
        (
            Arc::new(HandoffChannel::new(1024, OverflowPolicy::BlockWithTimeout)),
            Arc::new(HandoffChannel::new(1024, OverflowPolicy::BlockWithTimeout)),
        )
    }

    #[tokio::test]
    async fn test_records_flow_through_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("forge.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let (staging, spill) = channels();
        let client = PipeClient::new(
            PipeClientConfig {
                socket_path: socket,
                ..Default::default()
            },
            staging.clone(),
            spill,
        );
        let client_task = tokio::spawn(client.run());

        let (mut server_side, _) = listener.accept().await.unwrap();
        for pixel in 1..=3 {
            staging.send(record(pixel)).await;
        }
        for pixel in 1..=3 {
            let got = read_frame(&mut server_side).await.unwrap().unwrap();
            assert_eq!(got.pixel_id, pixel);
        }

        staging.close();
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_listener_spills_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("missing.sock");

        let (staging, spill) = channels();
        staging.send(record(7)).await;
        staging.close();

        let client = PipeClient::new(
            PipeClientConfig {
                socket_path: socket,
                reconnect_initial: Duration::from_millis(10),
                reconnect_max: Duration::from_millis(20),
            },
            staging,
            spill.clone(),
        );
        client.run().await;

        // The queued record ended up on the spill path, not dropped
        let spilled = spill.try_recv().unwrap();
        assert_eq!(spilled.pixel_id, 7);
    }

    #[tokio::test]
    async fn test_reconnect_after_listener_restart() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("forge.sock");

        let (staging, spill) = channels();
        let client = PipeClient::new(
            PipeClientConfig {
                socket_path: socket.clone(),
                reconnect_initial: Duration::from_millis(10),
                reconnect_max: Duration::from_millis(50),
            },
            staging.clone(),
            spill.clone(),
        );
        let connected = client.connected_flag();
        let client_task = tokio::spawn(client.run());

        // First listener accepts one record, then drops the connection
        let listener = UnixListener::bind(&socket).unwrap();
        staging.send(record(1)).await;
        let (mut first, _) = listener.accept().await.unwrap();
        assert_eq!(
            read_frame(&mut first).await.unwrap().unwrap().pixel_id,
            1
        );
        drop(first);
        drop(listener);
        std::fs::remove_file(&socket).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Client notices on the next write, spills that record, retries
        staging.send(record(2)).await;
        for _ in 0..200 {
            if !connected.load(Ordering::Acquire) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Restart the listener; the client reconnects and later records flow
        let listener = UnixListener::bind(&socket).unwrap();
        staging.send(record(3)).await;
        let (mut second, _) = listener.accept().await.unwrap();
        assert_eq!(
            read_frame(&mut second).await.unwrap().unwrap().pixel_id,
            3
        );

        // Record 2 took the per-record spill path
        assert_eq!(spill.try_recv().map(|r| r.pixel_id), Some(2));

        staging.close();
        client_task.await.unwrap();
    }
}
