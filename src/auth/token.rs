use crate::api::join_url;
use crate::auth::store::TokenStore;
use crate::config::ApiConfig;
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

/// Upper bound on a token lifetime, keeps expiry arithmetic in range.
const MAX_TOKEN_LIFETIME_SECS: u64 = 365 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenState {
    pub access_token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TokenState {
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        !self.access_token.is_empty() && now + margin < self.expires_at
    }
}

/// Body of a successful client-credentials exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(deserialize_with = "lenient_seconds")]
    pub expires_in: u64,
}

// Some gateways send expires_in as a string ("3599").
fn lenient_seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn request_token(&self) -> Result<TokenGrant, AppError>;
}

pub struct HttpTokenEndpoint {
    http: Client,
    url: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl HttpTokenEndpoint {
    pub fn new(http: Client, cfg: &ApiConfig) -> Self {
        Self {
            http,
            url: join_url(&cfg.base_url, &cfg.token_path),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            scope: cfg.scope.clone(),
        }
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn request_token(&self) -> Result<TokenGrant, AppError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];
        let response = self
            .http
            .post(&self.url)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::AuthenticationFailed {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::AuthenticationFailed {
                status: Some(status.as_u16()),
                message: failure_message(status, &body),
            });
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| AppError::AuthenticationFailed {
                status: Some(status.as_u16()),
                message: format!("invalid token response: {e}"),
            })
    }
}

/// Prefer the upstream body, fall back to the status reason.
pub(crate) fn failure_message(status: reqwest::StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.chars().take(512).collect()
    }
}

/// Holds the single process-wide bearer token and re-authenticates lazily.
pub struct TokenManager {
    endpoint: Box<dyn TokenEndpoint>,
    store: Box<dyn TokenStore>,
    refresh_margin: Duration,
    state: Option<TokenState>,
}

impl TokenManager {
    pub fn new(
        endpoint: Box<dyn TokenEndpoint>,
        store: Box<dyn TokenStore>,
        refresh_margin: Duration,
    ) -> Self {
        Self {
            endpoint,
            store,
            refresh_margin,
            state: None,
        }
    }

    /// Adopt a previously persisted token if it is still valid.
    pub fn restore(&mut self) -> bool {
        match self.store.load() {
            Ok(Some(token)) if token.is_valid_at(Utc::now(), self.refresh_margin) => {
                info!(expires_at = %token.expires_at, "reusing persisted access token");
                self.state = Some(token);
                true
            }
            Ok(Some(token)) => {
                debug!(expires_at = %token.expires_at, "persisted access token expired");
                false
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "could not read persisted access token");
                false
            }
        }
    }

    pub fn current(&self) -> Option<&TokenState> {
        self.state.as_ref()
    }

    /// Returns a token usable right now, authenticating first if needed.
    pub async fn ensure_valid(&mut self) -> Result<String, AppError> {
        if let Some(state) = &self.state {
            if state.is_valid_at(Utc::now(), self.refresh_margin) {
                return Ok(state.access_token.clone());
            }
        }
        info!("access token is missing or expired; re-authenticating");
        let state = self.authenticate().await?;
        Ok(state.access_token.clone())
    }

    /// Client-credentials exchange. On failure the previous state is kept.
    pub async fn authenticate(&mut self) -> Result<&TokenState, AppError> {
        let grant = self.endpoint.request_token().await?;
        let issued_at = Utc::now();
        let lifetime = grant.expires_in.min(MAX_TOKEN_LIFETIME_SECS) as i64;
        let state = TokenState {
            access_token: grant.access_token,
            issued_at,
            expires_at: issued_at + Duration::seconds(lifetime),
        };
        info!(
            token = %redact(&state.access_token),
            expires_at = %state.expires_at,
            "authenticated against telemetry API"
        );

        if let Err(e) = self.store.save(&state) {
            warn!(error = %e, "failed to persist access token");
        }
        Ok(&*self.state.insert(state))
    }
}

fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{prefix}***")
}
