//! In-memory stand-ins for the API and both stores, plus a local HTTP stub
//! server, shared by unit tests.

use crate::api::models::{Device, TelemetrySample};
use crate::api::TelemetryApi;
use crate::error::AppError;
use crate::repositories::{ChartMapping, ChartStore, MappingStore, NewChartMapping};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
}

pub fn sample(at: DateTime<Utc>) -> TelemetrySample {
    TelemetrySample {
        timestamp: at,
        mcpm1x0: Some(1.0),
        mcpm2x5: Some(2.5),
        mcpm4x0: Some(4.0),
        mcpm10: Some(10.0),
        temperature: Some(21.5),
        rh: None,
    }
}

pub fn device(device_id: &str, serial: &str, name: &str) -> Device {
    Device {
        device_id: device_id.to_string(),
        serial: serial.to_string(),
        model: Some("8143".to_string()),
        friendly_name: name.to_string(),
        latitude: Some(47.37),
        longitude: Some(8.54),
        is_public: false,
        is_indoor: false,
        is_owned: true,
        updated_at: None,
        chart: None,
    }
}

#[derive(Default)]
pub struct MemoryMappingStore {
    rows: Mutex<Vec<ChartMapping>>,
    failing_serials: Mutex<HashSet<String>>,
}

impl MemoryMappingStore {
    pub fn rows(&self) -> Vec<ChartMapping> {
        self.rows.lock().unwrap().clone()
    }

    pub fn fail_for_serial(&self, serial: &str) {
        self.failing_serials
            .lock()
            .unwrap()
            .insert(serial.to_string());
    }

    pub fn watermark_of(&self, chart_id: i32) -> Option<DateTime<Utc>> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.chart_id == chart_id)
            .map(|m| m.watermark)
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn find_active(
        &self,
        serial: &str,
        name: &str,
    ) -> Result<Option<ChartMapping>, AppError> {
        if self.failing_serials.lock().unwrap().contains(serial) {
            return Err(AppError::DatastoreUnreachable("connection refused".into()));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.active && m.serial == serial && m.name == name)
            .cloned())
    }

    async fn create(&self, mapping: NewChartMapping) -> Result<ChartMapping, AppError> {
        let mut rows = self.rows.lock().unwrap();
        let created = ChartMapping {
            chart_id: rows.len() as i32 + 1,
            serial: mapping.serial,
            name: mapping.name,
            created: Utc::now(),
            active: true,
            latitude: mapping.latitude,
            longitude: mapping.longitude,
            watermark: mapping.watermark,
            updated: None,
        };
        rows.push(created.clone());
        Ok(created)
    }

    async fn update_watermark(
        &self,
        chart_id: i32,
        watermark: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|m| m.chart_id == chart_id) {
            row.watermark = watermark;
            row.updated = Some(Utc::now());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryChartStore {
    tables: Mutex<BTreeMap<i32, BTreeMap<DateTime<Utc>, TelemetrySample>>>,
    latest_reads: AtomicUsize,
    insert_calls: AtomicUsize,
    fail_reads: Mutex<bool>,
}

impl MemoryChartStore {
    pub fn tables(&self) -> Vec<i32> {
        self.tables.lock().unwrap().keys().copied().collect()
    }

    pub fn rows(&self, chart_id: i32) -> Vec<TelemetrySample> {
        self.tables
            .lock()
            .unwrap()
            .get(&chart_id)
            .map(|t| t.values().copied().collect())
            .unwrap_or_default()
    }

    pub fn seed(&self, chart_id: i32, stamps: &[DateTime<Utc>]) {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(chart_id).or_default();
        for at in stamps {
            table.insert(*at, sample(*at));
        }
    }

    pub fn drop_table(&self, chart_id: i32) {
        self.tables.lock().unwrap().remove(&chart_id);
    }

    pub fn fail_reads(&self, fail: bool) {
        *self.fail_reads.lock().unwrap() = fail;
    }

    pub fn latest_reads(&self) -> usize {
        self.latest_reads.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChartStore for MemoryChartStore {
    async fn provision(&self, chart_id: i32) -> Result<(), AppError> {
        self.tables.lock().unwrap().entry(chart_id).or_default();
        Ok(())
    }

    async fn table_exists(&self, chart_id: i32) -> Result<bool, AppError> {
        Ok(self.tables.lock().unwrap().contains_key(&chart_id))
    }

    async fn latest_timestamp(&self, chart_id: i32) -> Result<Option<DateTime<Utc>>, AppError> {
        self.latest_reads.fetch_add(1, Ordering::SeqCst);
        if *self.fail_reads.lock().unwrap() {
            return Err(AppError::DatastoreUnreachable("read failed".into()));
        }
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(&chart_id)
            .and_then(|t| t.keys().next_back().copied()))
    }

    async fn insert(&self, chart_id: i32, samples: &[TelemetrySample]) -> Result<u64, AppError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if samples.is_empty() {
            return Ok(0);
        }
        let mut tables = self.tables.lock().unwrap();
        let table = tables
            .get_mut(&chart_id)
            .ok_or(AppError::TableMissing(chart_id))?;
        let mut inserted = 0;
        for s in samples {
            if !table.contains_key(&s.timestamp) {
                table.insert(s.timestamp, *s);
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

/// Serves a fixed device list and per-device telemetry at or after `since`.
#[derive(Default)]
pub struct FakeApi {
    devices: Mutex<Vec<Device>>,
    telemetry: Mutex<HashMap<String, Vec<TelemetrySample>>>,
    failing: Mutex<HashSet<String>>,
    list_fails: Mutex<bool>,
    requests: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl FakeApi {
    pub fn with_devices(devices: Vec<Device>) -> Self {
        let api = Self::default();
        *api.devices.lock().unwrap() = devices;
        api
    }

    pub fn set_telemetry(&self, device_id: &str, samples: Vec<TelemetrySample>) {
        self.telemetry
            .lock()
            .unwrap()
            .insert(device_id.to_string(), samples);
    }

    pub fn fail_device(&self, device_id: &str) {
        self.failing.lock().unwrap().insert(device_id.to_string());
    }

    pub fn fail_listing(&self, fail: bool) {
        *self.list_fails.lock().unwrap() = fail;
    }

    pub fn requests(&self) -> Vec<(String, DateTime<Utc>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetryApi for FakeApi {
    async fn list_devices(&self) -> Result<Vec<Device>, AppError> {
        if *self.list_fails.lock().unwrap() {
            return Err(AppError::AuthenticationFailed {
                status: Some(401),
                message: "invalid_client".into(),
            });
        }
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn fetch_telemetry(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySample>, AppError> {
        self.requests
            .lock()
            .unwrap()
            .push((device_id.to_string(), since));
        if self.failing.lock().unwrap().contains(device_id) {
            return Err(AppError::ApiCallFailed {
                endpoint: "telemetry/flat-format".into(),
                status: Some(500),
                message: "upstream error".into(),
            });
        }
        Ok(self
            .telemetry
            .lock()
            .unwrap()
            .get(device_id)
            .map(|all| {
                all.iter()
                    .filter(|s| s.timestamp >= since)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}
