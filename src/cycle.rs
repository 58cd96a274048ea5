use crate::api::TelemetryApi;
use crate::ingest::TelemetryIngestor;
use crate::registry::ChartRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Tallies for one discovery-and-ingest pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub devices: usize,
    pub resolved: usize,
    pub ingested: usize,
    pub failed: usize,
    pub rows_inserted: u64,
}

/// Something the scheduler can fire once per tick.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self) -> CycleReport;
}

pub struct IngestionCycle {
    api: Arc<dyn TelemetryApi>,
    registry: ChartRegistry,
    ingestor: TelemetryIngestor,
}

impl IngestionCycle {
    pub fn new(
        api: Arc<dyn TelemetryApi>,
        registry: ChartRegistry,
        ingestor: TelemetryIngestor,
    ) -> Self {
        Self {
            api,
            registry,
            ingestor,
        }
    }

    /// List devices, resolve their charts, then ingest them one by one.
    ///
    /// Errors never escape: a listing failure ends the cycle early and a
    /// per-device failure only skips that device.
    pub async fn run(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let mut devices = match self.api.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                error!(error = %e, "device listing failed; skipping this cycle");
                return report;
            }
        };
        report.devices = devices.len();
        report.resolved = self.registry.resolve_all(&mut devices).await;

        for device in &devices {
            info!(
                device_id = %device.device_id,
                serial = %device.serial,
                name = %device.friendly_name,
                chart_id = device.chart.map(|c| c.chart_id),
                watermark = ?device.chart.map(|c| c.watermark),
                "device"
            );
        }

        for device in devices.iter_mut().filter(|d| d.chart.is_some()) {
            match self.ingestor.ingest(device).await {
                Ok(outcome) => {
                    report.ingested += 1;
                    report.rows_inserted += outcome.inserted;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        device_id = %device.device_id,
                        error = %e,
                        "ingestion failed; retrying next cycle"
                    );
                }
            }
        }

        info!(
            devices = report.devices,
            resolved = report.resolved,
            ingested = report.ingested,
            failed = report.failed,
            rows_inserted = report.rows_inserted,
            "cycle complete"
        );
        report
    }
}

#[async_trait]
impl CycleRunner for IngestionCycle {
    async fn run_cycle(&self) -> CycleReport {
        self.run().await
    }
}
