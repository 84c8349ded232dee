// smartpixl-pipeline: Raw-table bulk insert sink

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::{PipelineError, PipelineResult};
use smartpixl_record::TrackingRecord;

/// The nine raw-table columns, in insert order
const RAW_COLUMNS: &str = r#"("CompanyID", "PiXLID", "IPAddress", "RequestPath", "QueryString", "HeadersJson", "UserAgent", "Referer", "ReceivedAt")"#;

/// Destination of the bulk writer. Production targets the warehouse raw
/// table; tests substitute scripted sinks.
///
/// Duplicate-tolerant by contract: retries and failover replay may insert
/// the same record more than once and the downstream parser deduplicates
/// by content hash.
#[async_trait]
pub trait RawSink: Send + Sync {
    /// Insert the whole batch as one unit; partial failure is full-batch
    /// failure
    async fn insert_batch(&self, batch: &[TrackingRecord]) -> PipelineResult<()>;
}

/// Multi-row INSERT into the configured raw staging table
pub struct PostgresRawSink {
    pool: PgPool,
    insert_prefix: String,
}

impl PostgresRawSink {
    pub fn from_pool(pool: PgPool, table: &str) -> PipelineResult<Self> {
        validate_identifier(table)?;
        Ok(Self {
            pool,
            insert_prefix: format!(r#"INSERT INTO "{}" {} "#, table, RAW_COLUMNS),
        })
    }

    /// Lazy pool: nothing touches the network until the first flush, so the
    /// process starts cleanly while the warehouse is down
    pub fn connect_lazy(url: &str, table: &str, max_connections: u32) -> PipelineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)
            .map_err(|e| PipelineError::Database(e.to_string()))?;
        Self::from_pool(pool, table)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RawSink for PostgresRawSink {
    async fn insert_batch(&self, batch: &[TrackingRecord]) -> PipelineResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut query = QueryBuilder::<Postgres>::new(&self.insert_prefix);
        query.push_values(batch, |mut row, record| {
            row.push_bind(record.company_id)
                .push_bind(record.pixel_id)
                .push_bind(&record.ip_address)
                .push_bind(&record.request_path)
                .push_bind(&record.query_string)
                .push_bind(&record.headers_json)
                .push_bind(&record.user_agent)
                .push_bind(&record.referer)
                .push_bind(record.received_at);
        });

        query
            .build()
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_database_error)
    }
}

/// Split sqlx failures into the transient/permanent taxonomy. SQLSTATE
/// class 42 (syntax or access rule violation) covers missing tables and
/// columns, a schema mismatch nothing but an operator can fix.
fn map_database_error(err: sqlx::Error) -> PipelineError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            if code.starts_with("42") {
                PipelineError::PermanentDatabase(format!("{} ({})", db.message(), code))
            } else {
                PipelineError::Database(db.message().to_string())
            }
        }
        _ => PipelineError::Database(err.to_string()),
    }
}

fn validate_identifier(name: &str) -> PipelineResult<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(PipelineError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}
