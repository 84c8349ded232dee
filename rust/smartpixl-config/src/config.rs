// smartpixl-config: Configuration loading and validation

use std::net::IpAddr;
use std::path::Path;

use crate::env::apply_env_overrides;
use crate::schema::{ConfigError, ConfigResult, SmartPixlConfig};

/// Load configuration from an optional TOML file and environment variables
///
/// Loading hierarchy: env > file > defaults
pub fn load_config(path: Option<&Path>) -> ConfigResult<SmartPixlConfig> {
    let mut config = match path {
        Some(file) => load_from_file(file)?,
        None => SmartPixlConfig::default(),
    };

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;

    Ok(config)
}

/// Load configuration from a TOML file path
pub fn load_from_file(path: &Path) -> ConfigResult<SmartPixlConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::IoError(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Validate configuration before any component is constructed.
/// A failure here is a fail-fast startup error (exit code 1).
pub fn validate_config(config: &SmartPixlConfig) -> ConfigResult<()> {
    let nonzero = [
        ("edge.staging_capacity", config.edge.staging_capacity),
        ("forge.enrichment_capacity", config.forge.enrichment_capacity),
        ("forge.writer_capacity", config.forge.writer_capacity),
        ("writer.max_batch_size", config.writer.max_batch_size),
        ("classify.window_capacity", config.classify.window_capacity),
        ("classify.stability_capacity", config.classify.stability_capacity),
        ("classify.stability_shards", config.classify.stability_shards),
        ("geo.cache_capacity", config.geo.cache_capacity),
        ("geo.backfill_capacity", config.geo.backfill_capacity),
    ];
    for (name, value) in nonzero {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{} must be greater than zero",
                name
            )));
        }
    }

    if config.edge.staging_deadline_ms == 0 {
        return Err(ConfigError::ValidationError(
            "edge.staging_deadline_ms must be greater than zero".to_string(),
        ));
    }
    if config.writer.batch_window_ms == 0 {
        return Err(ConfigError::ValidationError(
            "writer.batch_window_ms must be greater than zero".to_string(),
        ));
    }
    if config.writer.retry_backoff_min_ms > config.writer.retry_backoff_max_ms {
        return Err(ConfigError::ValidationError(
            "writer.retry_backoff_min_ms exceeds retry_backoff_max_ms".to_string(),
        ));
    }
    if config.pipe.reconnect_initial_ms == 0
        || config.pipe.reconnect_initial_ms > config.pipe.reconnect_max_ms
    {
        return Err(ConfigError::ValidationError(
            "pipe reconnect backoff bounds are inconsistent".to_string(),
        ));
    }
    if config.classify.rapid_fire_count < 2 {
        return Err(ConfigError::ValidationError(
            "classify.rapid_fire_count must be at least 2".to_string(),
        ));
    }
    if config.database.raw_table.is_empty()
        || !config
            .database
            .raw_table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ConfigError::ValidationError(format!(
            "database.raw_table {:?} is not a plain identifier",
            config.database.raw_table
        )));
    }

    for cidr in &config.edge.trusted_proxy_cidrs {
        parse_cidr(cidr).map_err(|e| {
            ConfigError::ValidationError(format!("edge.trusted_proxy_cidrs {:?}: {}", cidr, e))
        })?;
    }

    Ok(())
}

/// Parse an "address/prefix" string, checking the prefix bound for the family
pub fn parse_cidr(cidr: &str) -> Result<(IpAddr, u8), String> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| "missing '/' separator".to_string())?;

    let addr: IpAddr = addr
        .trim()
        .parse()
        .map_err(|e| format!("invalid address: {}", e))?;
    let prefix: u8 = prefix
        .trim()
        .parse()
        .map_err(|e| format!("invalid prefix length: {}", e))?;

    let max = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    if prefix > max {
        return Err(format!("prefix /{} exceeds /{}", prefix, max));
    }

    Ok((addr, prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = SmartPixlConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.writer.max_batch_size, 5000);
        assert_eq!(config.writer.batch_window_ms, 250);
        assert_eq!(config.classify.window_secs, 300);
        assert_eq!(config.geo.cache_capacity, 50_000);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = SmartPixlConfig::default();
        config.forge.writer_capacity = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_bad_trusted_cidr_rejected() {
        let mut config = SmartPixlConfig::default();
        config.edge.trusted_proxy_cidrs = vec!["10.0.0.0/33".to_string()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_table_name_must_be_identifier() {
        let mut config = SmartPixlConfig::default();
        config.database.raw_table = "raw; drop table".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[writer]\nmax_batch_size = 100\n\n[failover]\ndirectory = \"/var/spool/pixl\""
        )
        .unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.writer.max_batch_size, 100);
        assert_eq!(config.writer.batch_window_ms, 250); // untouched default
        assert_eq!(config.failover.directory, "/var/spool/pixl");
    }

    #[test]
    fn test_parse_cidr_families() {
        assert!(parse_cidr("10.0.0.0/8").is_ok());
        assert!(parse_cidr("2001:db8::/32").is_ok());
        assert!(parse_cidr("10.0.0.0").is_err());
        assert!(parse_cidr("nonsense/8").is_err());
    }
}
