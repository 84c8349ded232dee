// smartpixl-edge: Edge process library

//! The public-facing half of SmartPiXL: serves the pixel endpoint, seals
//! one tracking record per request on the hot path, and hands records to
//! the Forge over the local pipe with a per-record failover spill.

pub mod capture;
pub mod error;
pub mod http;
pub mod internal;
pub mod pipe_client;
pub mod spill;

pub use capture::{parse_identity, select_client_ip, Capture, RequestEnvelope, TrustedProxies};
pub use error::{EdgeError, EdgeResult};
pub use http::{pixel_router, EdgeCounters, EdgeState};
pub use internal::{internal_router, InternalState};
pub use pipe_client::{PipeClient, PipeClientConfig};
pub use spill::SpillWorker;
