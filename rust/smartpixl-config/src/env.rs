// smartpixl-config: Environment variable overrides

use crate::schema::{ConfigError, ConfigResult, SmartPixlConfig};

/// Apply `SMARTPIXL_*` environment overrides on top of file/default values
///
/// Examples:
///   SMARTPIXL_DATABASE_URL=postgres://warehouse/pixl
///   SMARTPIXL_EDGE_BIND=0.0.0.0:80
///   SMARTPIXL_BATCH_SIZE=2000
pub fn apply_env_overrides(config: &mut SmartPixlConfig) -> ConfigResult<()> {
    for (key, value) in std::env::vars() {
        let Some(suffix) = key.strip_prefix("SMARTPIXL_") else {
            continue;
        };

        match suffix {
            "EDGE_BIND" => config.edge.bind_address = value,
            "EDGE_INTERNAL_BIND" => config.edge.internal_bind_address = value,
            "FORGE_INTERNAL_BIND" => config.forge.internal_bind_address = value,
            "TRUSTED_PROXIES" => {
                config.edge.trusted_proxy_cidrs =
                    value.split(',').map(|s| s.trim().to_string()).collect();
            }
            "PIPE_SOCKET" => config.pipe.socket_path = value,
            "DATABASE_URL" => config.database.url = value,
            "RAW_TABLE" => config.database.raw_table = value,
            "GEO_TABLE" => config.database.geo_table = value,
            "FAILOVER_DIR" => config.failover.directory = value,
            "DATACENTER_RANGES" => config.classify.datacenter_ranges_path = Some(value),
            "BATCH_SIZE" => {
                config.writer.max_batch_size = parse_number(suffix, &value)?;
            }
            "BATCH_WINDOW_MS" => {
                config.writer.batch_window_ms = parse_number(suffix, &value)?;
            }
            "STAGING_CAPACITY" => {
                config.edge.staging_capacity = parse_number(suffix, &value)?;
            }
            "WRITER_CAPACITY" => {
                config.forge.writer_capacity = parse_number(suffix, &value)?;
            }
            "ENRICHMENT_CAPACITY" => {
                config.forge.enrichment_capacity = parse_number(suffix, &value)?;
            }
            // CONFIG names the file itself and is handled by the binaries
            _ => {}
        }
    }

    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value.parse().map_err(|_| {
        ConfigError::ValidationError(format!("SMARTPIXL_{} is not a number: {:?}", key, value))
    })
}
