// smartpixl-pipeline: Geo table lookup behind the cache backfill

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use crate::error::{PipelineError, PipelineResult};
use smartpixl_classify::{ClassifyError, ClassifyResult, GeoResolver};
use smartpixl_record::GeoSnapshot;

/// Cold-tier lookup against the external geo table. Used by the backfill
/// workers of both processes; the hot path never touches it.
pub struct SqlGeoResolver {
    pool: PgPool,
    query: String,
}

impl SqlGeoResolver {
    pub fn new(pool: PgPool, table: &str) -> PipelineResult<Self> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(PipelineError::InvalidIdentifier(table.to_string()));
        }
        Ok(Self {
            pool,
            query: format!(
                r#"SELECT "Country", "Region", "City", "Latitude", "Longitude", "Timezone" FROM "{}" WHERE "IPAddress" = $1"#,
                table
            ),
        })
    }
}

#[async_trait]
impl GeoResolver for SqlGeoResolver {
    async fn resolve(&self, ip: IpAddr) -> ClassifyResult<Option<GeoSnapshot>> {
        let row = sqlx::query(&self.query)
            .bind(ip.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ClassifyError::GeoLookup(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let snapshot = GeoSnapshot {
            country: row
                .try_get("Country")
                .map_err(|e| ClassifyError::GeoLookup(e.to_string()))?,
            region: row
                .try_get("Region")
                .map_err(|e| ClassifyError::GeoLookup(e.to_string()))?,
            city: row
                .try_get("City")
                .map_err(|e| ClassifyError::GeoLookup(e.to_string()))?,
            latitude: row
                .try_get("Latitude")
                .map_err(|e| ClassifyError::GeoLookup(e.to_string()))?,
            longitude: row
                .try_get("Longitude")
                .map_err(|e| ClassifyError::GeoLookup(e.to_string()))?,
            timezone: row
                .try_get("Timezone")
                .map_err(|e| ClassifyError::GeoLookup(e.to_string()))?,
            resolved_at: Utc::now(),
        };
        Ok(Some(snapshot))
    }
}
