// smartpixl-forge: Forge process library

//! The persistence half of SmartPiXL: accepts framed records from the Edge
//! over the local pipe, enriches them against the authoritative windows and
//! geo cache, bulk-inserts into the raw table behind a circuit breaker,
//! replays failover files, and self-heals on a fixed probe cadence.

pub mod api;
pub mod enrich;
pub mod error;
pub mod listener;
pub mod probe;

pub use api::{internal_router, ForgeApiState};
pub use enrich::EnrichmentWorker;
pub use error::{ForgeError, ForgeResult};
pub use listener::PipeListener;
pub use probe::{HealthSnapshot, ProbeConfig, ProbeDeps, SelfHealingProbe};
