use crate::api::models::Device;
use crate::api::TelemetryApi;
use crate::error::AppError;
use crate::repositories::{ChartStore, MappingStore};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IngestOutcome {
    pub fetched: usize,
    pub inserted: u64,
    pub watermark: DateTime<Utc>,
}

/// Pulls telemetry newer than a device's watermark into its chart.
pub struct TelemetryIngestor {
    api: Arc<dyn TelemetryApi>,
    charts: Arc<dyn ChartStore>,
    mappings: Arc<dyn MappingStore>,
}

impl TelemetryIngestor {
    pub fn new(
        api: Arc<dyn TelemetryApi>,
        charts: Arc<dyn ChartStore>,
        mappings: Arc<dyn MappingStore>,
    ) -> Self {
        Self {
            api,
            charts,
            mappings,
        }
    }

    /// One fetch and at most one store call for `device`.
    ///
    /// The watermark on `device` only moves forward, and only after the
    /// batch has been committed.
    pub async fn ingest(&self, device: &mut Device) -> Result<IngestOutcome, AppError> {
        let binding = device.chart.ok_or_else(|| {
            AppError::Other(anyhow!("device {} has no chart binding", device.device_id))
        })?;

        let samples = self
            .api
            .fetch_telemetry(&device.device_id, binding.watermark)
            .await?;

        if samples.is_empty() {
            debug!(device_id = %device.device_id, chart_id = binding.chart_id, "no new telemetry");
            return Ok(IngestOutcome {
                fetched: 0,
                inserted: 0,
                watermark: binding.watermark,
            });
        }

        let inserted = self.charts.insert(binding.chart_id, &samples).await?;

        let latest = samples
            .iter()
            .map(|s| s.timestamp)
            .max()
            .unwrap_or(binding.watermark);
        let watermark = latest.max(binding.watermark);
        if watermark > binding.watermark {
            self.mappings
                .update_watermark(binding.chart_id, watermark)
                .await?;
            if let Some(chart) = device.chart.as_mut() {
                chart.watermark = watermark;
            }
        }

        info!(
            device_id = %device.device_id,
            chart_id = binding.chart_id,
            fetched = samples.len(),
            rows_inserted = inserted,
            watermark = %watermark,
            "telemetry stored"
        );

        Ok(IngestOutcome {
            fetched: samples.len(),
            inserted,
            watermark,
        })
    }
}
