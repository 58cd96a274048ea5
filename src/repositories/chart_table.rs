use crate::api::models::TelemetrySample;
use crate::db;
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection};
use tracing::debug;

/// Storage of per-chart time series.
///
/// One table per chart is the current layout; callers only see chart ids.
#[async_trait]
pub trait ChartStore: Send + Sync {
    /// Creates the chart's table if it does not exist yet.
    async fn provision(&self, chart_id: i32) -> Result<(), AppError>;

    async fn table_exists(&self, chart_id: i32) -> Result<bool, AppError>;

    /// Timestamp of the newest stored sample, `None` for an empty table.
    async fn latest_timestamp(&self, chart_id: i32) -> Result<Option<DateTime<Utc>>, AppError>;

    /// Writes `samples` in one transaction, ignoring timestamps already stored.
    /// Returns the number of rows actually inserted.
    async fn insert(&self, chart_id: i32, samples: &[TelemetrySample]) -> Result<u64, AppError>;
}

/// Chart tables in the storage database, named by chart id.
pub struct PgChartStore {
    url: String,
}

impl PgChartStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

fn quoted(chart_id: i32) -> String {
    format!("\"{chart_id}\"")
}

async fn exists(conn: &mut PgConnection, chart_id: i32) -> Result<bool, AppError> {
    let found: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_name = $1
        )
        "#,
    )
    .bind(chart_id.to_string())
    .fetch_one(conn)
    .await?;
    Ok(found)
}

#[async_trait]
impl ChartStore for PgChartStore {
    async fn provision(&self, chart_id: i32) -> Result<(), AppError> {
        let mut conn = db::open(&self.url).await?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                datetime    TIMESTAMPTZ      NOT NULL PRIMARY KEY,
                mcpm1x0     DOUBLE PRECISION,
                mcpm2x5     DOUBLE PRECISION,
                mcpm4x0     DOUBLE PRECISION,
                mcpm10      DOUBLE PRECISION,
                temperature DOUBLE PRECISION,
                rh          DOUBLE PRECISION
            )
            "#,
            table = quoted(chart_id)
        ))
        .execute(&mut conn)
        .await?;
        Ok(())
    }

    async fn table_exists(&self, chart_id: i32) -> Result<bool, AppError> {
        let mut conn = db::open(&self.url).await?;
        exists(&mut conn, chart_id).await
    }

    async fn latest_timestamp(&self, chart_id: i32) -> Result<Option<DateTime<Utc>>, AppError> {
        let mut conn = db::open(&self.url).await?;
        let latest: Option<DateTime<Utc>> = sqlx::query_scalar(&format!(
            "SELECT datetime FROM {} ORDER BY datetime DESC LIMIT 1",
            quoted(chart_id)
        ))
        .fetch_optional(&mut conn)
        .await?;
        Ok(latest)
    }

    async fn insert(&self, chart_id: i32, samples: &[TelemetrySample]) -> Result<u64, AppError> {
        let mut conn = db::open(&self.url).await?;
        if samples.is_empty() {
            return Ok(0);
        }
        if !exists(&mut conn, chart_id).await? {
            return Err(AppError::TableMissing(chart_id));
        }

        let sql = format!(
            r#"
            INSERT INTO {} (datetime, mcpm1x0, mcpm2x5, mcpm4x0, mcpm10, temperature, rh)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (datetime) DO NOTHING
            "#,
            quoted(chart_id)
        );

        // Dropping the transaction on error rolls back the whole batch.
        let mut tx = conn.begin().await?;
        let mut inserted = 0u64;
        for sample in samples {
            inserted += sqlx::query(&sql)
                .bind(sample.timestamp)
                .bind(sample.mcpm1x0)
                .bind(sample.mcpm2x5)
                .bind(sample.mcpm4x0)
                .bind(sample.mcpm10)
                .bind(sample.temperature)
                .bind(sample.rh)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        debug!(chart_id, attempted = samples.len(), inserted, "batch committed");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_is_quoted() {
        assert_eq!(quoted(17), "\"17\"");
    }
}
