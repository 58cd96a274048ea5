pub mod client;
pub mod models;

pub use client::{join_url, ApiClient, TelemetryApi};
pub use models::{ChartBinding, Device, TelemetrySample};
