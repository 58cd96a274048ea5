use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Channels requested from the telemetry endpoint, in table column order.
pub const TELEMETRY_CHANNELS: [&str; 6] = [
    "mcpm1x0",
    "mcpm2x5",
    "mcpm4x0",
    "mcpm10",
    "temperature",
    "rh",
];

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRecord {
    pub device_id: Option<String>,
    pub serial: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub metadata: Option<DeviceMetadataRecord>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceMetadataRecord {
    #[serde(rename = "friendlyName")]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub is_indoor: Option<bool>,
    #[serde(default)]
    pub is_owned: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mcpm1x0: Option<f64>,
    #[serde(default)]
    pub mcpm2x5: Option<f64>,
    #[serde(default)]
    pub mcpm4x0: Option<f64>,
    #[serde(default)]
    pub mcpm10: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub rh: Option<f64>,
}

/// Chart identity attached to a device once the registry has resolved it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartBinding {
    pub chart_id: i32,
    pub watermark: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub device_id: String,
    pub serial: String,
    pub model: Option<String>,
    pub friendly_name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_public: bool,
    pub is_indoor: bool,
    pub is_owned: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub chart: Option<ChartBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    pub timestamp: DateTime<Utc>,
    pub mcpm1x0: Option<f64>,
    pub mcpm2x5: Option<f64>,
    pub mcpm4x0: Option<f64>,
    pub mcpm10: Option<f64>,
    pub temperature: Option<f64>,
    pub rh: Option<f64>,
}

impl TryFrom<DeviceRecord> for Device {
    type Error = AppError;

    fn try_from(record: DeviceRecord) -> Result<Self, Self::Error> {
        let device_id = required("device", "device_id", record.device_id)?;
        let serial = required("device", "serial", record.serial)?;
        let metadata = record.metadata.ok_or_else(|| {
            AppError::parse("device", format!("device {device_id} has no metadata"))
        })?;
        let friendly_name = required("device", "metadata.friendlyName", metadata.friendly_name)?;

        Ok(Device {
            device_id,
            serial,
            model: record.model,
            friendly_name,
            latitude: metadata.latitude,
            longitude: metadata.longitude,
            is_public: metadata.is_public.unwrap_or(false),
            is_indoor: metadata.is_indoor.unwrap_or(false),
            is_owned: metadata.is_owned.unwrap_or(false),
            updated_at: record.updated_at,
            chart: None,
        })
    }
}

impl TryFrom<TelemetryRecord> for TelemetrySample {
    type Error = AppError;

    fn try_from(record: TelemetryRecord) -> Result<Self, Self::Error> {
        let timestamp = record
            .timestamp
            .ok_or_else(|| AppError::parse("telemetry", "missing field 'timestamp'"))?;
        Ok(TelemetrySample {
            timestamp,
            mcpm1x0: record.mcpm1x0,
            mcpm2x5: record.mcpm2x5,
            mcpm4x0: record.mcpm4x0,
            mcpm10: record.mcpm10,
            temperature: record.temperature,
            rh: record.rh,
        })
    }
}

fn required(
    kind: &'static str,
    field: &str,
    value: Option<String>,
) -> Result<String, AppError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::parse(kind, format!("missing field '{field}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_device_from_full_record() {
        let record: DeviceRecord = serde_json::from_value(json!({
            "account_id": "acc-1",
            "device_id": "dev-1",
            "model": "8143",
            "serial": "81432137001",
            "metadata": {
                "friendlyName": "Roof North",
                "is_public": false,
                "is_indoor": false,
                "is_owned": true,
                "latitude": 47.37,
                "longitude": 8.54
            },
            "status": "active",
            "updated_at": "2024-05-01T10:15:30.123456Z"
        }))
        .unwrap();

        let device = Device::try_from(record).unwrap();
        assert_eq!(device.device_id, "dev-1");
        assert_eq!(device.serial, "81432137001");
        assert_eq!(device.friendly_name, "Roof North");
        assert_eq!(device.latitude, Some(47.37));
        assert!(device.is_owned);
        assert!(device.chart.is_none());
    }

    #[test]
    fn test_device_missing_friendly_name_rejected() {
        let record: DeviceRecord = serde_json::from_value(json!({
            "device_id": "dev-1",
            "serial": "S1",
            "metadata": { "latitude": 1.0 }
        }))
        .unwrap();

        let err = Device::try_from(record).unwrap_err();
        assert!(matches!(err, AppError::Parse { kind: "device", .. }));
        assert!(err.to_string().contains("friendlyName"));
    }

    #[test]
    fn test_device_blank_serial_rejected() {
        let record: DeviceRecord = serde_json::from_value(json!({
            "device_id": "dev-1",
            "serial": "  ",
            "metadata": { "friendlyName": "N1" }
        }))
        .unwrap();
        assert!(Device::try_from(record).is_err());
    }

    #[test]
    fn test_sample_requires_timestamp() {
        let record: TelemetryRecord =
            serde_json::from_value(json!({ "mcpm10": 12.5, "rh": 40.0 })).unwrap();
        assert!(TelemetrySample::try_from(record).is_err());
    }

    #[test]
    fn test_sample_allows_missing_channels() {
        let record: TelemetryRecord = serde_json::from_value(json!({
            "cloud_device_id": "dev-1",
            "timestamp": "2024-05-01T10:00:00Z",
            "mcpm2x5": 3.25
        }))
        .unwrap();
        let sample = TelemetrySample::try_from(record).unwrap();
        assert_eq!(sample.mcpm2x5, Some(3.25));
        assert_eq!(sample.temperature, None);
    }
}
