use crate::api::models::{ChartBinding, Device};
use crate::error::AppError;
use crate::repositories::{ChartMapping, ChartStore, MappingStore, NewChartMapping};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Resolves devices to charts, provisioning mappings and tables on first sight.
pub struct ChartRegistry {
    mappings: Arc<dyn MappingStore>,
    charts: Arc<dyn ChartStore>,
    lookback: Duration,
}

impl ChartRegistry {
    pub fn new(
        mappings: Arc<dyn MappingStore>,
        charts: Arc<dyn ChartStore>,
        lookback_days: i64,
    ) -> Self {
        Self {
            mappings,
            charts,
            lookback: Duration::days(lookback_days),
        }
    }

    fn default_watermark(&self) -> DateTime<Utc> {
        Utc::now() - self.lookback
    }

    /// Resolves every device in place. A device that fails to resolve is
    /// logged and left unbound; the rest of the batch carries on.
    pub async fn resolve_all(&self, devices: &mut [Device]) -> usize {
        let mut resolved = 0;
        for device in devices.iter_mut() {
            match self.resolve(device).await {
                Ok(_) => resolved += 1,
                Err(e) => {
                    warn!(
                        device_id = %device.device_id,
                        serial = %device.serial,
                        error = %e,
                        "chart resolution failed; skipping device this cycle"
                    );
                }
            }
        }
        resolved
    }

    /// Finds or provisions the chart of `device` and attaches the binding.
    pub async fn resolve(&self, device: &mut Device) -> Result<ChartMapping, AppError> {
        device.chart = None;
        let mapping = match self
            .mappings
            .find_active(&device.serial, &device.friendly_name)
            .await?
        {
            Some(existing) => self.refresh(existing).await?,
            None => self.provision(device).await?,
        };

        device.chart = Some(ChartBinding {
            chart_id: mapping.chart_id,
            watermark: mapping.watermark,
        });
        Ok(mapping)
    }

    /// Re-reads the watermark from the chart table and writes it back.
    ///
    /// A chart whose table is still empty gets `now - lookback` again on every
    /// call, so its watermark slides forward with the clock until the first
    /// sample lands.
    async fn refresh(&self, mut mapping: ChartMapping) -> Result<ChartMapping, AppError> {
        let chart_id = mapping.chart_id;

        if !self.charts.table_exists(chart_id).await? {
            warn!(chart_id, "chart table missing for existing mapping; provisioning it");
            self.charts.provision(chart_id).await?;
        }

        let watermark = match self.charts.latest_timestamp(chart_id).await {
            Ok(Some(latest)) => latest,
            Ok(None) => self.default_watermark(),
            Err(e) => {
                warn!(chart_id, error = %e, "could not read chart watermark; using look-back default");
                self.default_watermark()
            }
        };

        self.mappings.update_watermark(chart_id, watermark).await?;
        mapping.watermark = watermark;
        Ok(mapping)
    }

    async fn provision(&self, device: &Device) -> Result<ChartMapping, AppError> {
        let mapping = self
            .mappings
            .create(NewChartMapping {
                serial: device.serial.clone(),
                name: device.friendly_name.clone(),
                latitude: device.latitude,
                longitude: device.longitude,
                watermark: self.default_watermark(),
            })
            .await?;
        self.charts.provision(mapping.chart_id).await?;
        info!(
            chart_id = mapping.chart_id,
            serial = %device.serial,
            name = %device.friendly_name,
            "provisioned new chart"
        );
        Ok(mapping)
    }
}
