// smartpixl-classify: IP classification for the capture hot path

//! Synchronous, allocation-conscious lookups the capture path calls on
//! every request: datacenter classification against a CIDR trie, per-subnet
//! behaviour windows, per-IP fingerprint stability, and the non-blocking
//! geo cache with asynchronous backfill.

pub mod error;
pub mod geo;
pub mod stability;
pub mod trie;
pub mod window;

pub use error::{ClassifyError, ClassifyResult};
pub use geo::{GeoBackfillWorker, GeoCache, GeoCacheConfig, GeoResolver};
pub use stability::{FingerprintStability, StabilityConfig};
pub use trie::{load_ranges_file, CidrTrie, DatacenterIndex};
pub use window::{subnet_of, BehaviourTracker, SubnetKey, WindowConfig, WindowStats};
