use crate::db;
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Persisted association between a device's (serial, name) and its chart.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ChartMapping {
    #[sqlx(rename = "chartid")]
    pub chart_id: i32,
    #[sqlx(rename = "serialnumber")]
    pub serial: String,
    pub name: String,
    pub created: DateTime<Utc>,
    pub active: bool,
    #[sqlx(rename = "lat")]
    pub latitude: Option<f64>,
    #[sqlx(rename = "long")]
    pub longitude: Option<f64>,
    #[sqlx(rename = "lastdataset")]
    pub watermark: DateTime<Utc>,
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewChartMapping {
    pub serial: String,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub watermark: DateTime<Utc>,
}

#[async_trait]
pub trait MappingStore: Send + Sync {
    /// The active mapping for a (serial, name) pair, if any.
    async fn find_active(&self, serial: &str, name: &str)
        -> Result<Option<ChartMapping>, AppError>;

    /// Inserts an active mapping and allocates its chart id.
    async fn create(&self, mapping: NewChartMapping) -> Result<ChartMapping, AppError>;

    async fn update_watermark(
        &self,
        chart_id: i32,
        watermark: DateTime<Utc>,
    ) -> Result<(), AppError>;
}

/// Mapping table in the config database.
pub struct PgMappingStore {
    url: String,
    table: String,
}

impl PgMappingStore {
    /// `table` must already be validated as a plain SQL identifier.
    pub fn new(url: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            table: table.into(),
        }
    }

    /// Creates the mapping table and its one-active-mapping index if missing.
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        let mut conn = db::open(&self.url).await?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                chartid      SERIAL PRIMARY KEY,
                serialnumber TEXT             NOT NULL,
                name         TEXT             NOT NULL,
                created      TIMESTAMPTZ      NOT NULL DEFAULT NOW(),
                active       BOOLEAN          NOT NULL DEFAULT TRUE,
                lat          DOUBLE PRECISION,
                long         DOUBLE PRECISION,
                lastdataset  TIMESTAMPTZ      NOT NULL,
                updated      TIMESTAMPTZ
            )
            "#,
            table = self.table
        ))
        .execute(&mut conn)
        .await?;
        sqlx::query(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {table}_active_serial_name \
             ON {table} (serialnumber, name) WHERE active",
            table = self.table
        ))
        .execute(&mut conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MappingStore for PgMappingStore {
    async fn find_active(
        &self,
        serial: &str,
        name: &str,
    ) -> Result<Option<ChartMapping>, AppError> {
        let mut conn = db::open(&self.url).await?;
        let mapping = sqlx::query_as::<_, ChartMapping>(&format!(
            r#"
            SELECT chartid, serialnumber, name, created, active, lat, long, lastdataset, updated
            FROM {}
            WHERE serialnumber = $1 AND name = $2 AND active
            "#,
            self.table
        ))
        .bind(serial)
        .bind(name)
        .fetch_optional(&mut conn)
        .await?;
        Ok(mapping)
    }

    async fn create(&self, mapping: NewChartMapping) -> Result<ChartMapping, AppError> {
        let mut conn = db::open(&self.url).await?;
        let created = sqlx::query_as::<_, ChartMapping>(&format!(
            r#"
            INSERT INTO {} (serialnumber, name, created, active, lat, long, lastdataset)
            VALUES ($1, $2, NOW(), TRUE, $3, $4, $5)
            RETURNING chartid, serialnumber, name, created, active, lat, long, lastdataset, updated
            "#,
            self.table
        ))
        .bind(&mapping.serial)
        .bind(&mapping.name)
        .bind(mapping.latitude)
        .bind(mapping.longitude)
        .bind(mapping.watermark)
        .fetch_one(&mut conn)
        .await?;
        Ok(created)
    }

    async fn update_watermark(
        &self,
        chart_id: i32,
        watermark: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut conn = db::open(&self.url).await?;
        sqlx::query(&format!(
            "UPDATE {} SET lastdataset = $1, updated = NOW() WHERE chartid = $2",
            self.table
        ))
        .bind(watermark)
        .bind(chart_id)
        .execute(&mut conn)
        .await?;
        Ok(())
    }
}
