// smartpixl-record: Tracking record model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Behaviour flags derived from the subnet window and fingerprint history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviourFlags {
    /// R or more inter-arrivals shorter than the configured threshold
    #[serde(default)]
    pub rapid_fire: bool,

    /// More distinct fingerprints in the subnet window than allowed
    #[serde(default)]
    pub velocity: bool,

    /// Three or more fingerprints seen from this IP inside the horizon
    #[serde(default)]
    pub unstable_fingerprint: bool,
}

impl BehaviourFlags {
    /// Combine with a later evaluation; a flag raised once stays raised
    pub fn merge(self, other: BehaviourFlags) -> BehaviourFlags {
        BehaviourFlags {
            rapid_fire: self.rapid_fire || other.rapid_fire,
            velocity: self.velocity || other.velocity,
            unstable_fingerprint: self.unstable_fingerprint || other.unstable_fingerprint,
        }
    }
}

/// Geo fields attached when a cache lookup was warm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoSnapshot {
    pub country: String,
    pub region: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    /// When the external source answered; refreshes replace the snapshot
    pub resolved_at: DateTime<Utc>,
}

/// The atomic unit flowing through the pipeline.
///
/// Sealed by capture and never mutated after entering a handoff channel.
/// The Forge enrichment stage works on its own copy (geo fill, behaviour
/// re-evaluation) before the record enters the writer feed.
///
/// Serialized with stable snake_case keys; unknown keys are tolerated on
/// read and fields the producer did not know about fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub company_id: i64,
    pub pixel_id: i64,
    pub received_at: DateTime<Utc>,

    /// First non-proxy entry of the forwarded chain, or the direct peer
    pub ip_address: String,
    #[serde(default)]
    pub forwarded_chain: Vec<String>,
    #[serde(default)]
    pub proxy_depth: u32,

    pub request_path: String,
    #[serde(default)]
    pub query_string: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub referer: String,
    /// Compact JSON document, header names in alphabetical order
    #[serde(default)]
    pub headers_json: String,

    #[serde(default)]
    pub fingerprint_hash: u64,
    #[serde(default)]
    pub datacenter: Option<String>,
    #[serde(default)]
    pub behaviour: BehaviourFlags,
    #[serde(default)]
    pub geo: Option<GeoSnapshot>,
}

impl TrackingRecord {
    /// A record is persistable only when both identity fields are present
    pub fn is_valid(&self) -> bool {
        self.company_id > 0 && self.pixel_id > 0
    }
}
