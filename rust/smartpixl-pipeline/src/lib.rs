// smartpixl-pipeline: Capture-to-warehouse durability pipeline

//! The persistence spine shared by the Edge and Forge processes: bounded
//! handoff channels with declared overflow policies, the circuit-broken
//! bulk writer, the JSONL failover writer with its catch-up reader, and
//! the raw-table sink.

pub mod breaker;
pub mod catchup;
pub mod channel;
pub mod error;
pub mod failover;
pub mod geo_sql;
pub mod sink;
pub mod writer;

pub use breaker::{CircuitReset, CircuitSnapshot, CircuitState, FlushGate, WriterCircuit};
pub use catchup::{eligible_files, CatchupConfig, CatchupReader};
pub use channel::{HandoffChannel, OverflowPolicy, SendOutcome, TrySendOutcome};
pub use error::{is_transient, PipelineError, PipelineResult};
pub use failover::{directory_stats, FailoverConfig, FailoverStats, FailoverWriter};
pub use geo_sql::SqlGeoResolver;
pub use sink::{PostgresRawSink, RawSink};
pub use writer::{BulkWriter, WriterConfig, WriterCounters};
