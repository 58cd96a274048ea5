use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tsi_dust_sink::api::{ApiClient, TelemetryApi};
use tsi_dust_sink::auth::{HttpTokenEndpoint, TokenManager, YamlTokenStore};
use tsi_dust_sink::config::Config;
use tsi_dust_sink::cycle::IngestionCycle;
use tsi_dust_sink::db;
use tsi_dust_sink::ingest::TelemetryIngestor;
use tsi_dust_sink::registry::ChartRegistry;
use tsi_dust_sink::repositories::{ChartStore, MappingStore, PgChartStore, PgMappingStore};
use tsi_dust_sink::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cfg_path = std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.yaml".into());
    let cfg = Config::load(&cfg_path)?;
    info!(
        base_url = %cfg.api.base_url,
        interval_secs = cfg.schedule.interval_secs,
        lookback_days = cfg.schedule.lookback_days,
        "loaded config"
    );

    db::ping(&cfg.database.config_url).await?;
    db::ping(&cfg.database.storage_url).await?;
    info!("connected to config and storage databases");

    let mapping_store =
        PgMappingStore::new(cfg.database.config_url.clone(), cfg.database.mapping_table.clone());
    mapping_store.ensure_schema().await?;
    let mappings: Arc<dyn MappingStore> = Arc::new(mapping_store);
    let charts: Arc<dyn ChartStore> = Arc::new(PgChartStore::new(cfg.database.storage_url.clone()));

    let http = reqwest::Client::new();
    let mut tokens = TokenManager::new(
        Box::new(HttpTokenEndpoint::new(http.clone(), &cfg.api)),
        Box::new(YamlTokenStore::new(&cfg_path)),
        chrono::Duration::seconds(cfg.api.refresh_margin_secs as i64),
    );
    tokens.restore();

    let client = ApiClient::new(http, cfg.api.base_url.clone(), tokens);
    if let Err(e) = client.warm_up().await {
        warn!(error = %e, "initial authentication failed; retrying on first cycle");
    }
    let api: Arc<dyn TelemetryApi> = Arc::new(client);

    let registry = ChartRegistry::new(mappings.clone(), charts.clone(), cfg.schedule.lookback_days);
    let ingestor = TelemetryIngestor::new(api.clone(), charts, mappings);
    let cycle = IngestionCycle::new(api, registry, ingestor);

    let scheduler = Scheduler::new(Duration::from_secs(cfg.schedule.interval_secs));
    scheduler
        .run(&cycle, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await;

    Ok(())
}
