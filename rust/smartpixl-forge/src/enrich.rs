// smartpixl-forge: Enrichment worker

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use smartpixl_classify::{BehaviourTracker, GeoCache};
use smartpixl_pipeline::{HandoffChannel, TrySendOutcome};
use smartpixl_record::TrackingRecord;

/// Applies the in-process enrichments between the pipe and the writer:
/// server-side geo fill when the Edge cache had missed, and behaviour
/// re-evaluation against the authoritative Forge windows.
///
/// Invalid records (missing company or pixel id) are counted and logged,
/// never surfaced as errors. The worker runs until the enrichment channel
/// is closed and drained, which is the shutdown drain.
pub struct EnrichmentWorker {
    input: Arc<HandoffChannel<TrackingRecord>>,
    output: Arc<HandoffChannel<TrackingRecord>>,
    geo: Arc<GeoCache>,
    behaviour: Arc<BehaviourTracker>,
    invalid: Arc<AtomicU64>,
    enriched: Arc<AtomicU64>,
}

impl EnrichmentWorker {
    pub fn new(
        input: Arc<HandoffChannel<TrackingRecord>>,
        output: Arc<HandoffChannel<TrackingRecord>>,
        geo: Arc<GeoCache>,
        behaviour: Arc<BehaviourTracker>,
    ) -> Self {
        Self {
            input,
            output,
            geo,
            behaviour,
            invalid: Arc::new(AtomicU64::new(0)),
            enriched: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn invalid_counter(&self) -> Arc<AtomicU64> {
        self.invalid.clone()
    }

    pub fn enriched_counter(&self) -> Arc<AtomicU64> {
        self.enriched.clone()
    }

    pub async fn run(self) {
        while let Some(record) = self.input.recv().await {
            let Some(record) = self.process(record) else {
                continue;
            };
            match self.output.try_send(record) {
                TrySendOutcome::Sent | TrySendOutcome::DroppedOldest => {
                    // Drop-oldest on the writer feed protects fresh traffic;
                    // evictions show up in the channel's dropped counter
                }
                TrySendOutcome::WouldBlock(_) | TrySendOutcome::Closed(_) => {
                    warn!("writer feed rejected record during shutdown");
                }
            }
        }
        info!("enrichment worker stopped");
    }

    fn process(&self, mut record: TrackingRecord) -> Option<TrackingRecord> {
        if !record.is_valid() {
            self.invalid.fetch_add(1, Ordering::Relaxed);
            debug!(
                company = record.company_id,
                pixel = record.pixel_id,
                "record failed validation"
            );
            return None;
        }

        if let Ok(ip) = record.ip_address.parse::<IpAddr>() {
            if record.geo.is_none() {
                record.geo = self.geo.get(ip).map(|snapshot| (*snapshot).clone());
            }

            // Authoritative re-evaluation at the record's capture time, so
            // failover replay does not read as a live burst
            let flags = self
                .behaviour
                .observe(ip, record.received_at, record.fingerprint_hash);
            record.behaviour = record.behaviour.merge(flags);
        }

        self.enriched.fetch_add(1, Ordering::Relaxed);
        Some(record)
    }
}
