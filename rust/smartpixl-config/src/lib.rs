// smartpixl-config: Configuration schema and loading

//! Startup configuration for the Edge and Forge processes.
//!
//! Loading hierarchy: environment > file > defaults. Every capacity and
//! threshold is fixed for the process lifetime; invalid configuration is a
//! fail-fast startup error.

pub mod config;
pub mod env;
pub mod schema;

pub use config::{load_config, load_from_file, validate_config};
pub use env::apply_env_overrides;
pub use schema::{
    ClassifySection, ConfigError, ConfigResult, DatabaseSection, EdgeSection, FailoverSection,
    ForgeSection, GeoSection, PipeSection, SmartPixlConfig, WriterSection,
};
