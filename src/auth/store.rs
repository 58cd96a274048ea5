use crate::auth::token::TokenState;
use crate::error::AppError;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::PathBuf;

const TOKEN_KEY: &str = "auth_token";

/// Durable home of the access token between process restarts.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<TokenState>, AppError>;
    fn save(&self, token: &TokenState) -> Result<(), AppError>;
}

/// Keeps the token in the `auth_token` section of the YAML config file.
///
/// The file is edited as raw YAML, so env placeholders elsewhere in the file
/// are written back unexpanded. Every save re-renders the whole document:
/// comments and formatting are not preserved, though values and key order
/// within each mapping are.
pub struct YamlTokenStore {
    path: PathBuf,
}

impl YamlTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_document(&self) -> Result<Mapping, AppError> {
        let raw = fs::read_to_string(&self.path)?;
        match serde_yaml::from_str::<Value>(&raw)? {
            Value::Mapping(map) => Ok(map),
            Value::Null => Ok(Mapping::new()),
            _ => Err(AppError::Config(format!(
                "{} is not a YAML mapping",
                self.path.display()
            ))),
        }
    }
}

impl TokenStore for YamlTokenStore {
    fn load(&self) -> Result<Option<TokenState>, AppError> {
        let doc = self.read_document()?;
        match doc.get(TOKEN_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(section) => Ok(Some(serde_yaml::from_value(section.clone())?)),
        }
    }

    fn save(&self, token: &TokenState) -> Result<(), AppError> {
        let mut doc = self.read_document()?;
        doc.insert(Value::from(TOKEN_KEY), serde_yaml::to_value(token)?);
        let rendered = serde_yaml::to_string(&doc)?;

        // Write then rename so a crash never leaves a truncated config.
        let tmp = self.path.with_extension("yaml.tmp");
        fs::write(&tmp, rendered)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemoryTokenStore {
    token: std::sync::Arc<std::sync::Mutex<Option<TokenState>>>,
}

#[cfg(test)]
impl MemoryTokenStore {
    pub(crate) fn with_token(token: TokenState) -> Self {
        let store = Self::default();
        *store.token.lock().unwrap() = Some(token);
        store
    }

    pub(crate) fn handle(&self) -> std::sync::Arc<std::sync::Mutex<Option<TokenState>>> {
        self.token.clone()
    }
}

#[cfg(test)]
impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<TokenState>, AppError> {
        Ok(self.token.lock().unwrap().clone())
    }

    fn save(&self, token: &TokenState) -> Result<(), AppError> {
        *self.token.lock().unwrap() = Some(token.clone());
        Ok(())
    }
}
