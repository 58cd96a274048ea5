use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication failed ({}): {message}", display_status(.status))]
    AuthenticationFailed {
        status: Option<u16>,
        message: String,
    },
    #[error("API call to '{endpoint}' failed ({}): {message}", display_status(.status))]
    ApiCallFailed {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },
    #[error("Datastore unreachable: {0}")]
    DatastoreUnreachable(String),
    #[error("Chart table {0} does not exist")]
    TableMissing(i32),
    #[error("Malformed {kind} record: {reason}")]
    Parse { kind: &'static str, reason: String },
    #[error("Config error: {0}")]
    Config(String),
    #[error("DB error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn display_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "no response".into(),
    }
}

impl AppError {
    pub fn parse(kind: &'static str, reason: impl Into<String>) -> Self {
        AppError::Parse {
            kind,
            reason: reason.into(),
        }
    }

    /// Maps a failed connection attempt to `DatastoreUnreachable`.
    pub fn unreachable(err: sqlx::Error) -> Self {
        AppError::DatastoreUnreachable(err.to_string())
    }
}
