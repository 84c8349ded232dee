// smartpixl-classify: Per-IP fingerprint stability tracking

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Stability map tuning
#[derive(Debug, Clone)]
pub struct StabilityConfig {
    /// Bounded fingerprint set per IP; least-recent rotates out above this
    pub capacity_per_ip: usize,
    /// Independent shards; an IP always maps to the same shard
    pub shards: usize,
    /// Observations older than this stop counting
    pub horizon: std::time::Duration,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            capacity_per_ip: 32,
            shards: 32,
            horizon: std::time::Duration::from_secs(86_400),
        }
    }
}

#[derive(Debug)]
struct FpEntry {
    hash: u64,
    last_seen: DateTime<Utc>,
}

/// Rolling set of fingerprint hashes seen from one IP inside the horizon.
/// `unique_count >= 3` reads as the instability flag.
pub struct FingerprintStability {
    config: StabilityConfig,
    shards: Vec<Mutex<HashMap<IpAddr, Vec<FpEntry>>>>,
}

impl FingerprintStability {
    pub fn new(config: StabilityConfig) -> Self {
        let shard_count = config.shards.max(1);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self { config, shards }
    }

    fn shard_for(&self, ip: &IpAddr) -> &Mutex<HashMap<IpAddr, Vec<FpEntry>>> {
        let mut hasher = DefaultHasher::new();
        ip.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Record one observation and return the distinct fingerprint count for
    /// the IP inside the horizon
    pub fn observe(&self, ip: IpAddr, now: DateTime<Utc>, fingerprint: u64) -> usize {
        let horizon =
            Duration::from_std(self.config.horizon).unwrap_or(Duration::seconds(86_400));
        let cutoff = now - horizon;

        let mut shard = self.shard_for(&ip).lock();
        let history = shard.entry(ip).or_default();

        history.retain(|e| e.last_seen >= cutoff);

        match history.iter_mut().find(|e| e.hash == fingerprint) {
            Some(entry) => entry.last_seen = now,
            None => {
                history.push(FpEntry {
                    hash: fingerprint,
                    last_seen: now,
                });
                // Rotate out the least-recent above the bound
                while history.len() > self.config.capacity_per_ip {
                    if let Some(oldest) = history
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, e)| e.last_seen)
                        .map(|(i, _)| i)
                    {
                        history.remove(oldest);
                    }
                }
            }
        }

        history.len()
    }

    /// Distinct fingerprints currently on record for an IP
    pub fn unique_count(&self, ip: IpAddr) -> usize {
        self.shard_for(&ip)
            .lock()
            .get(&ip)
            .map(|h| h.len())
            .unwrap_or(0)
    }
}
