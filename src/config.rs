use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DbConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default = "default_token_path")]
    pub token_path: String,
    /// Tokens expiring within this many seconds are treated as expired.
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,
}

fn default_token_path() -> String {
    "/oauth/client_credential/accesstoken".into()
}

fn default_refresh_margin_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Holds the chart mapping table.
    pub config_url: String,
    /// Holds one table per chart.
    pub storage_url: String,
    #[serde(default = "default_mapping_table")]
    pub mapping_table: String,
}

fn default_mapping_table() -> String {
    "tsi_dust".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Backfill window for a chart with no stored samples.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
}

fn default_interval_secs() -> u64 {
    300
}

fn default_lookback_days() -> i64 {
    29
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            lookback_days: default_lookback_days(),
        }
    }
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    /// Afterwards the database URLs and client credentials may be overridden by
    /// CONFIG_DATABASE_URL, STORAGE_DATABASE_URL, TSI_CLIENT_ID and TSI_CLIENT_SECRET.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let raw = fs::read_to_string(path)?;
        let expanded = expand_env_placeholders(&raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;

        if let Ok(url) = std::env::var("CONFIG_DATABASE_URL") {
            cfg.database.config_url = url;
        }
        if let Ok(url) = std::env::var("STORAGE_DATABASE_URL") {
            cfg.database.storage_url = url;
        }
        if let Ok(id) = std::env::var("TSI_CLIENT_ID") {
            cfg.api.client_id = id;
        }
        if let Ok(secret) = std::env::var("TSI_CLIENT_SECRET") {
            cfg.api.client_secret = secret;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        anyhow::ensure!(
            !self.api.base_url.trim().is_empty(),
            "api.base_url must not be empty"
        );
        anyhow::ensure!(
            self.schedule.interval_secs > 0,
            "schedule.interval_secs must be greater than zero"
        );
        anyhow::ensure!(
            self.schedule.lookback_days > 0,
            "schedule.lookback_days must be greater than zero"
        );
        anyhow::ensure!(
            is_safe_identifier(&self.database.mapping_table),
            "database.mapping_table '{}' is not a valid table name",
            self.database.mapping_table
        );
        Ok(())
    }
}

/// Lowercase ASCII letters, digits and underscores, not starting with a digit.
fn is_safe_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$".
fn expand_env_placeholders(input: &str) -> Result<String, anyhow::Error> {
    use anyhow::Context;

    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let close = match it.peek().copied() {
            Some('$') => {
                it.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        it.next();
        let var = read_until(&mut it, close)
            .with_context(|| format!("unterminated env placeholder: missing '{close}'"))?;
        let val = std::env::var(&var)
            .with_context(|| format!("missing environment variable: {}", var))?;
        out.push_str(&val);
    }

    Ok(out)
}

/// Read characters until we hit `end`, returning the collected string.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}
