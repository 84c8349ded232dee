// smartpixl-forge: Pipe listener

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ForgeError, ForgeResult};
use smartpixl_pipeline::{HandoffChannel, SendOutcome};
use smartpixl_record::{read_frame, TrackingRecord};

/// Accepts Edge connections on the local pipe and feeds deserialized
/// frames into the enrichment channel with indefinite blocking, so the
/// Edge experiences backpressure as pipe write stalls.
pub struct PipeListener {
    listener: UnixListener,
    socket_path: PathBuf,
    enrichment: Arc<HandoffChannel<TrackingRecord>>,
    connections: Arc<AtomicUsize>,
    frames: Arc<AtomicU64>,
    protocol_errors: Arc<AtomicU64>,
}

impl PipeListener {
    /// Bind the listening socket. Failure here is an unrecoverable init
    /// error (exit code 1). A stale socket file from a previous run is
    /// replaced.
    pub fn bind(
        socket_path: &Path,
        enrichment: Arc<HandoffChannel<TrackingRecord>>,
    ) -> ForgeResult<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }

        let listener = UnixListener::bind(socket_path)
            .map_err(|e| ForgeError::Bind(format!("{}: {}", socket_path.display(), e)))?;
        info!(path = %socket_path.display(), "pipe listener bound");

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            enrichment,
            connections: Arc::new(AtomicUsize::new(0)),
            frames: Arc::new(AtomicU64::new(0)),
            protocol_errors: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Live connection count for the health probe
    pub fn connection_counter(&self) -> Arc<AtomicUsize> {
        self.connections.clone()
    }

    pub fn frame_counter(&self) -> Arc<AtomicU64> {
        self.frames.clone()
    }

    pub fn protocol_error_counter(&self) -> Arc<AtomicU64> {
        self.protocol_errors.clone()
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.changed() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(read_connection(
                        stream,
                        self.enrichment.clone(),
                        self.connections.clone(),
                        self.frames.clone(),
                        self.protocol_errors.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "pipe accept failed"),
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        info!("pipe listener stopped");
    }
}

/// One reader per accepted connection. A malformed JSON payload drops the
/// record and continues; a length or IO fault desynchronizes the stream
/// and drops the connection.
async fn read_connection(
    mut stream: UnixStream,
    enrichment: Arc<HandoffChannel<TrackingRecord>>,
    connections: Arc<AtomicUsize>,
    frames: Arc<AtomicU64>,
    protocol_errors: Arc<AtomicU64>,
    mut shutdown: watch::Receiver<bool>,
) {
    connections.fetch_add(1, Ordering::Release);
    debug!("pipe connection opened");

    loop {
        let result = tokio::select! {
            _ = shutdown.changed() => break,
            result = read_frame(&mut stream) => result,
        };
        match result {
            Ok(Some(record)) => {
                frames.fetch_add(1, Ordering::Relaxed);
                let outcome = tokio::select! {
                    _ = shutdown.changed() => break,
                    outcome = enrichment.send(record) => outcome,
                };
                if !matches!(outcome, SendOutcome::Sent) {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                protocol_errors.fetch_add(1, Ordering::Relaxed);
                if e.desyncs_stream() {
                    warn!(error = %e, "pipe stream desynchronized; dropping connection");
                    break;
                }
                // Payload-level fault: the record is unrecoverable but the
                // stream is still aligned on the next frame
                warn!(error = %e, "malformed pipe record dropped");
            }
        }
    }

    connections.fetch_sub(1, Ordering::Release);
    debug!("pipe connection closed");
}
