// smartpixl-classify: Per-subnet sliding behaviour windows

use std::collections::VecDeque;
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use smartpixl_record::BehaviourFlags;

use crate::stability::{FingerprintStability, StabilityConfig};

/// Window aggregation key: /24 for v4, /48 for v6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubnetKey {
    V4([u8; 3]),
    V6([u8; 6]),
}

/// Derive the window key for an address
pub fn subnet_of(ip: IpAddr) -> SubnetKey {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            SubnetKey::V4([o[0], o[1], o[2]])
        }
        IpAddr::V6(v6) => {
            let o = v6.octets();
            SubnetKey::V6([o[0], o[1], o[2], o[3], o[4], o[5]])
        }
    }
}

/// Behaviour window tuning
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Window length; entries older than this are lazily dropped
    pub window: std::time::Duration,
    /// Ring capacity per subnet (K); oldest evicted on overflow
    pub capacity: usize,
    /// Rapid-fire: this many consecutive inter-arrivals each shorter than
    /// `rapid_fire_within`
    pub rapid_fire_count: usize,
    pub rapid_fire_within: std::time::Duration,
    /// Velocity: more distinct fingerprints than this inside the window
    pub velocity_distinct: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window: std::time::Duration::from_secs(300),
            capacity: 64,
            rapid_fire_count: 10,
            rapid_fire_within: std::time::Duration::from_millis(1000),
            velocity_distinct: 5,
        }
    }
}

/// Metrics derived from one window after an insertion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    pub distinct_fingerprints: usize,
    pub min_interarrival_ms: Option<i64>,
    pub rapid_fire: bool,
    pub velocity: bool,
}

#[derive(Debug)]
struct WindowEntry {
    at: DateTime<Utc>,
    fingerprint: u64,
}

#[derive(Debug, Default)]
struct SubnetWindow {
    ring: VecDeque<WindowEntry>,
}

/// Per-subnet sliding windows plus the per-IP fingerprint stability map.
///
/// Subnets are independent, so each window sits behind its own mutex inside
/// a concurrent map; request threads only contend within one subnet.
pub struct BehaviourTracker {
    config: WindowConfig,
    windows: DashMap<SubnetKey, Mutex<SubnetWindow>>,
    stability: FingerprintStability,
}

impl BehaviourTracker {
    pub fn new(config: WindowConfig, stability: StabilityConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            stability: FingerprintStability::new(stability),
        }
    }

    /// Record one observation and evaluate all behaviour flags for it.
    ///
    /// `now` is the record's capture timestamp, so replayed records are
    /// evaluated against the window as it stood for their arrival time.
    pub fn observe(&self, ip: IpAddr, now: DateTime<Utc>, fingerprint: u64) -> BehaviourFlags {
        let stats = self.record(subnet_of(ip), now, fingerprint);
        let unique = self.stability.observe(ip, now, fingerprint);

        BehaviourFlags {
            rapid_fire: stats.rapid_fire,
            velocity: stats.velocity,
            unstable_fingerprint: unique >= 3,
        }
    }

    /// Insert into the subnet ring and compute window metrics
    pub fn record(&self, subnet: SubnetKey, now: DateTime<Utc>, fingerprint: u64) -> WindowStats {
        let window = Duration::from_std(self.config.window).unwrap_or(Duration::seconds(300));
        let within = Duration::from_std(self.config.rapid_fire_within)
            .unwrap_or(Duration::milliseconds(1000));

        let slot = self
            .windows
            .entry(subnet)
            .or_insert_with(|| Mutex::new(SubnetWindow::default()));
        let mut state = slot.lock();

        // Lazy cleanup: timed-out entries drop on insertion only
        let horizon = now - window;
        while state
            .ring
            .front()
            .map(|e| e.at < horizon)
            .unwrap_or(false)
        {
            state.ring.pop_front();
        }

        state.ring.push_back(WindowEntry {
            at: now,
            fingerprint,
        });
        while state.ring.len() > self.config.capacity {
            state.ring.pop_front();
        }

        let mut distinct: Vec<u64> = Vec::with_capacity(state.ring.len());
        for entry in &state.ring {
            if !distinct.contains(&entry.fingerprint) {
                distinct.push(entry.fingerprint);
            }
        }

        let mut min_gap: Option<i64> = None;
        let mut rapid_run = 0usize;
        let mut run_broken = false;
        let mut prev: Option<DateTime<Utc>> = None;
        for entry in state.ring.iter().rev() {
            if let Some(later) = prev {
                let gap = (later - entry.at).num_milliseconds();
                min_gap = Some(min_gap.map_or(gap, |m| m.min(gap)));
                if !run_broken {
                    if gap < within.num_milliseconds() {
                        rapid_run += 1;
                    } else {
                        run_broken = true;
                    }
                }
            }
            prev = Some(entry.at);
        }

        WindowStats {
            distinct_fingerprints: distinct.len(),
            min_interarrival_ms: min_gap,
            rapid_fire: rapid_run >= self.config.rapid_fire_count,
            velocity: distinct.len() > self.config.velocity_distinct,
        }
    }

    /// Current ring depth of one subnet, for tests and diagnostics
    pub fn window_len(&self, subnet: SubnetKey) -> usize {
        self.windows
            .get(&subnet)
            .map(|slot| slot.lock().ring.len())
            .unwrap_or(0)
    }

    pub fn stability(&self) -> &FingerprintStability {
        &self.stability
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_754_000_000_000 + ms).unwrap()
    }

    fn tracker(config: WindowConfig) -> BehaviourTracker {
        BehaviourTracker::new(config, StabilityConfig::default())
    }

    #[test]
    fn test_subnet_keys() {
        let a = subnet_of("198.51.100.4".parse().unwrap());
        let b = subnet_of("198.51.100.200".parse().unwrap());
        let c = subnet_of("198.51.101.4".parse().unwrap());
        assert_eq!(a, b);
        assert_ne!(a, c);

        let v6a = subnet_of("2001:db8:1:2::1".parse().unwrap());
        let v6b = subnet_of("2001:db8:1:ffff::1".parse().unwrap());
        assert_eq!(v6a, v6b); // same /48
    }

    #[test]
    fn test_ring_never_exceeds_capacity() {
        let t = tracker(WindowConfig {
            capacity: 8,
            ..Default::default()
        });
        let subnet = subnet_of("198.51.100.4".parse().unwrap());
        for i in 0..100 {
            t.record(subnet, at(i * 10), i as u64);
            assert!(t.window_len(subnet) <= 8);
        }
        assert_eq!(t.window_len(subnet), 8);
    }

    #[test]
    fn test_timed_out_entries_drop_lazily() {
        let t = tracker(WindowConfig {
            window: std::time::Duration::from_secs(300),
            ..Default::default()
        });
        let subnet = subnet_of("198.51.100.4".parse().unwrap());
        t.record(subnet, at(0), 1);
        t.record(subnet, at(1_000), 2);
        assert_eq!(t.window_len(subnet), 2);

        // Next insertion is past the window; the stale pair is evicted
        t.record(subnet, at(301_000), 3);
        assert_eq!(t.window_len(subnet), 1);
    }

    #[test]
    fn test_rapid_fire_sets_after_r_interarrivals() {
        let config = WindowConfig {
            rapid_fire_count: 10,
            rapid_fire_within: std::time::Duration::from_millis(1000),
            ..Default::default()
        };
        let t = tracker(config);
        let subnet = subnet_of("198.51.100.4".parse().unwrap());

        // 100 hits inside 500 ms: the flag raises at request R+1
        let mut first_flagged = None;
        for i in 0..100 {
            let stats = t.record(subnet, at(i * 5), i as u64);
            if stats.rapid_fire && first_flagged.is_none() {
                first_flagged = Some(i + 1);
            }
        }
        assert_eq!(first_flagged, Some(11));
    }

    #[test]
    fn test_slow_traffic_never_rapid_fire() {
        let t = tracker(WindowConfig::default());
        let subnet = subnet_of("203.0.113.7".parse().unwrap());
        for i in 0..50 {
            let stats = t.record(subnet, at(i * 2_000), 7);
            assert!(!stats.rapid_fire);
        }
    }

    #[test]
    fn test_velocity_counts_distinct_fingerprints() {
        let t = tracker(WindowConfig {
            velocity_distinct: 5,
            ..Default::default()
        });
        let subnet = subnet_of("198.51.100.4".parse().unwrap());

        for fp in 0..5u64 {
            let stats = t.record(subnet, at(fp as i64 * 10), fp);
            assert!(!stats.velocity);
        }
        let stats = t.record(subnet, at(60), 5);
        assert_eq!(stats.distinct_fingerprints, 6);
        assert!(stats.velocity);
    }

    #[test]
    fn test_min_interarrival_tracks_tightest_gap() {
        let t = tracker(WindowConfig::default());
        let subnet = subnet_of("198.51.100.4".parse().unwrap());
        t.record(subnet, at(0), 1);
        t.record(subnet, at(500), 1);
        let stats = t.record(subnet, at(503), 1);
        assert_eq!(stats.min_interarrival_ms, Some(3));
    }

    #[test]
    fn test_bot_burst_flags() {
        // Scenario: 100 requests in 500 ms, each a different fingerprint
        let t = tracker(WindowConfig::default());
        let ip: IpAddr = "198.51.100.4".parse().unwrap();

        let mut stability_from = None;
        for i in 0..100u64 {
            let flags = t.observe(ip, at(i as i64 * 5), i);
            if flags.unstable_fingerprint && stability_from.is_none() {
                stability_from = Some(i + 1);
            }
        }
        // Instability from the third distinct fingerprint
        assert_eq!(stability_from, Some(3));

        let final_flags = t.observe(ip, at(505), 100);
        assert!(final_flags.rapid_fire);
        assert!(final_flags.velocity);
    }
}
