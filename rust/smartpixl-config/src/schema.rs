// smartpixl-config: Configuration schema and defaults

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Config error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Complete SmartPiXL configuration, shared by both binaries.
/// Each process reads the sections it needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartPixlConfig {
    pub edge: EdgeSection,
    pub forge: ForgeSection,
    pub pipe: PipeSection,
    pub writer: WriterSection,
    pub database: DatabaseSection,
    pub failover: FailoverSection,
    pub classify: ClassifySection,
    pub geo: GeoSection,
}

/// Edge process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeSection {
    /// Public pixel endpoint bind address
    pub bind_address: String,
    /// Loopback bind for the internal operator endpoints
    pub internal_bind_address: String,
    /// CIDRs whose addresses are skipped when walking the forwarded chain
    pub trusted_proxy_cidrs: Vec<String>,
    /// Staging channel toward the pipe client
    pub staging_capacity: usize,
    /// Deadline for the staging send before spilling to failover
    pub staging_deadline_ms: u64,
}

impl Default for EdgeSection {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            internal_bind_address: "127.0.0.1:8091".to_string(),
            trusted_proxy_cidrs: Vec::new(),
            staging_capacity: 8192,
            staging_deadline_ms: 5,
        }
    }
}

/// Forge process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeSection {
    /// Loopback bind for the internal operator endpoints
    pub internal_bind_address: String,
    /// Pipe-ingestion handoff channel (block-with-timeout policy)
    pub enrichment_capacity: usize,
    /// SQL-writer handoff channel (drop-oldest policy)
    pub writer_capacity: usize,
    /// Health probe cadence
    pub probe_interval_secs: u64,
    /// Repeated issues with the same type and severity are reported once
    /// per this window
    pub issue_dedup_window_secs: u64,
}

impl Default for ForgeSection {
    fn default() -> Self {
        Self {
            internal_bind_address: "127.0.0.1:8092".to_string(),
            enrichment_capacity: 8192,
            writer_capacity: 16384,
            probe_interval_secs: 60,
            issue_dedup_window_secs: 7200,
        }
    }
}

/// Inter-process pipe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeSection {
    /// Unix socket path; local-only and session-scoped
    pub socket_path: String,
    /// Reconnect backoff floor
    pub reconnect_initial_ms: u64,
    /// Reconnect backoff cap
    pub reconnect_max_ms: u64,
}

impl Default for PipeSection {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/smartpixl/forge.sock".to_string(),
            reconnect_initial_ms: 100,
            reconnect_max_ms: 5000,
        }
    }
}

/// Bulk writer and circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterSection {
    pub max_batch_size: usize,
    pub batch_window_ms: u64,
    /// In-batch retries before the batch counts as failed
    pub retry_attempts: u32,
    pub retry_backoff_min_ms: u64,
    pub retry_backoff_max_ms: u64,
    /// Consecutive failed batches before the circuit opens
    pub failure_threshold: u32,
    /// Open-state cooldown before a half-open probe
    pub cooldown_secs: u64,
}

impl Default for WriterSection {
    fn default() -> Self {
        Self {
            max_batch_size: 5000,
            batch_window_ms: 250,
            retry_attempts: 2,
            retry_backoff_min_ms: 50,
            retry_backoff_max_ms: 200,
            failure_threshold: 3,
            cooldown_secs: 30,
        }
    }
}

/// Warehouse connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
    /// Raw staging table; name is configurable so a bucket-parameterised
    /// rotation can be layered on without writer changes
    pub raw_table: String,
    /// External geo table backing the cache backfill
    pub geo_table: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/smartpixl".to_string(),
            raw_table: "PiXLRaw".to_string(),
            geo_table: "GeoIP".to_string(),
        }
    }
}

/// Failover file settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverSection {
    pub directory: String,
    /// Catch-up reader scan cadence
    pub scan_interval_secs: u64,
}

impl Default for FailoverSection {
    fn default() -> Self {
        Self {
            directory: "./failover".to_string(),
            scan_interval_secs: 10,
        }
    }
}

/// IP classification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifySection {
    /// Behaviour window length in seconds
    pub window_secs: u64,
    /// Ring capacity per subnet window
    pub window_capacity: usize,
    /// Rapid-fire: this many inter-arrivals each shorter than the threshold
    pub rapid_fire_count: usize,
    pub rapid_fire_within_ms: u64,
    /// Velocity: more distinct fingerprints than this inside the window
    pub velocity_distinct: usize,
    /// Bounded per-IP fingerprint set size
    pub stability_capacity: usize,
    pub stability_shards: usize,
    /// Per-IP fingerprint history horizon in seconds
    pub stability_horizon_secs: u64,
    /// Optional "cidr,provider" file with datacenter ranges
    pub datacenter_ranges_path: Option<String>,
}

impl Default for ClassifySection {
    fn default() -> Self {
        Self {
            window_secs: 300,
            window_capacity: 64,
            rapid_fire_count: 10,
            rapid_fire_within_ms: 1000,
            velocity_distinct: 5,
            stability_capacity: 32,
            stability_shards: 32,
            stability_horizon_secs: 86400,
            datacenter_ranges_path: None,
        }
    }
}

/// Geo cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoSection {
    pub cache_capacity: usize,
    /// Backfill queue (drop-oldest policy)
    pub backfill_capacity: usize,
    /// Entries older than this are re-enqueued for refresh on read
    pub refresh_after_days: u32,
}

impl Default for GeoSection {
    fn default() -> Self {
        Self {
            cache_capacity: 50_000,
            backfill_capacity: 1024,
            refresh_after_days: 30,
        }
    }
}
