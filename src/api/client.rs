use crate::api::models::{
    Device, DeviceRecord, TelemetryRecord, TelemetrySample, TELEMETRY_CHANNELS,
};
use crate::auth::token::{failure_message, TokenManager};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const DEVICES_ENDPOINT: &str = "devices";
pub const TELEMETRY_ENDPOINT: &str = "telemetry/flat-format";

/// Upstream operations the ingestion cycle depends on.
#[async_trait]
pub trait TelemetryApi: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<Device>, AppError>;

    async fn fetch_telemetry(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySample>, AppError>;
}

pub struct ApiClient {
    http: Client,
    base_url: String,
    tokens: Mutex<TokenManager>,
}

impl ApiClient {
    pub fn new(http: Client, base_url: impl Into<String>, tokens: TokenManager) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            tokens: Mutex::new(tokens),
        }
    }

    /// Authenticate up front unless a valid token is already held.
    pub async fn warm_up(&self) -> Result<(), AppError> {
        self.tokens.lock().await.ensure_valid().await.map(|_| ())
    }

    /// Authenticated GET against `endpoint`; no retries.
    pub async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(String, String)],
    ) -> Result<T, AppError> {
        let token = self.tokens.lock().await.ensure_valid().await?;
        let url = join_url(&self.base_url, endpoint);
        debug!(endpoint, params = query.len(), "calling telemetry API");

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::ApiCallFailed {
                endpoint: endpoint.to_string(),
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ApiCallFailed {
                endpoint: endpoint.to_string(),
                status: Some(status.as_u16()),
                message: failure_message(status, &body),
            });
        }

        let body = response.bytes().await.map_err(|e| AppError::ApiCallFailed {
            endpoint: endpoint.to_string(),
            status: Some(status.as_u16()),
            message: e.to_string(),
        })?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl TelemetryApi for ApiClient {
    async fn list_devices(&self) -> Result<Vec<Device>, AppError> {
        let records: Vec<Value> = self.call(DEVICES_ENDPOINT, &[]).await?;
        Ok(keep_valid::<DeviceRecord, _>(records, "device"))
    }

    async fn fetch_telemetry(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySample>, AppError> {
        let query = telemetry_query(device_id, since);
        let records: Vec<Value> = self.call(TELEMETRY_ENDPOINT, &query).await?;
        Ok(keep_valid::<TelemetryRecord, _>(records, "telemetry"))
    }
}

/// Decodes and validates each element on its own, logging and dropping the
/// ones that fail. A bad record never costs the rest of the response.
fn keep_valid<R, T>(records: Vec<Value>, kind: &'static str) -> Vec<T>
where
    R: DeserializeOwned,
    T: TryFrom<R, Error = AppError>,
{
    records
        .into_iter()
        .filter_map(|raw| {
            let decoded = serde_json::from_value::<R>(raw)
                .map_err(|e| AppError::parse(kind, e.to_string()))
                .and_then(T::try_from);
            match decoded {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(kind, error = %e, "dropping malformed upstream record");
                    None
                }
            }
        })
        .collect()
}

pub fn telemetry_query(device_id: &str, since: DateTime<Utc>) -> Vec<(String, String)> {
    let mut query = vec![
        ("device_id".to_string(), device_id.to_string()),
        ("start_date".to_string(), format_start_date(since)),
    ];
    query.extend(
        TELEMETRY_CHANNELS
            .iter()
            .map(|channel| ("telem[]".to_string(), channel.to_string())),
    );
    query
}

/// UTC with microseconds and a trailing `Z`, e.g. `2024-05-01T10:00:00.000000Z`.
pub fn format_start_date(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
