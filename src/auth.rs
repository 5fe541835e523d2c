use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::beatport::endpoint;
use crate::config::{BeatportConfig, Config, ConfigError};

/// Beatport API credentials as currently known. May change after a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub base_url: String,
}

impl From<&BeatportConfig> for Credentials {
    fn from(cfg: &BeatportConfig) -> Self {
        Self {
            client_id: cfg.client_id.clone(),
            access_token: cfg.access_token.clone(),
            refresh_token: cfg.refresh_token.clone(),
            base_url: cfg.base_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    client_id: &'a str,
    refresh_token: &'a str,
    grant_type: &'a str,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no refresh token configured; run `beatport-sync init` for instructions")]
    MissingRefreshToken,
    #[error("token refresh request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("token refresh rejected: {status} {reason}")]
    Rejected { status: u16, reason: String },
    #[error("token refresh response was not understood: {0}")]
    Decode(String),
    #[error("refreshed tokens could not be saved: {0}")]
    Persist(#[from] ConfigError),
}

/// Source of the current Beatport credentials.
///
/// Callers must ask for [`CredentialProvider::credentials`] before every
/// request rather than holding on to a token across a refresh.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self) -> Credentials;

    /// Exchange the refresh token for a new pair and make it current.
    async fn refresh(&self) -> Result<TokenPair, AuthError>;
}

fn read_or_recover<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| {
        warn!("credentials lock poisoned, recovering");
        e.into_inner()
    })
}

fn write_or_recover<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| {
        warn!("credentials lock poisoned, recovering");
        e.into_inner()
    })
}

/// Credentials backed by the YAML config file. Refreshed tokens are written
/// back to the same file.
pub struct FileCredentialProvider {
    http: Client,
    config: RwLock<Config>,
    config_path: PathBuf,
}

impl FileCredentialProvider {
    pub fn new(http: Client, config: Config, config_path: PathBuf) -> Self {
        Self {
            http,
            config: RwLock::new(config),
            config_path,
        }
    }

    /// Ask Beatport whether the current access token is accepted.
    pub async fn validate(&self) -> bool {
        let creds = self.credentials();
        if creds.access_token.is_empty() {
            return false;
        }
        let url = endpoint(&creds.base_url, "auth/o/introspect/");
        match self.http.get(&url).bearer_auth(&creds.access_token).send().await {
            Ok(resp) => {
                debug!("token introspection returned {}", resp.status());
                resp.status().is_success()
            }
            Err(e) => {
                warn!("token introspection failed: {e}");
                false
            }
        }
    }
}

#[async_trait]
impl CredentialProvider for FileCredentialProvider {
    fn credentials(&self) -> Credentials {
        Credentials::from(&read_or_recover(&self.config).beatport)
    }

    async fn refresh(&self) -> Result<TokenPair, AuthError> {
        let creds = self.credentials();
        if creds.refresh_token.is_empty() {
            return Err(AuthError::MissingRefreshToken);
        }

        let url = endpoint(&creds.base_url, "auth/o/token/");
        info!("Refreshing Beatport access token");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&creds.access_token)
            .json(&RefreshRequest {
                client_id: &creds.client_id,
                refresh_token: &creds.refresh_token,
                grant_type: "refresh_token",
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let body = resp.text().await?;
        let pair: TokenPair =
            serde_json::from_str(&body).map_err(|e| AuthError::Decode(e.to_string()))?;

        let snapshot = {
            let mut config = write_or_recover(&self.config);
            config.beatport.access_token = pair.access_token.clone();
            config.beatport.refresh_token = pair.refresh_token.clone();
            config.clone()
        };
        snapshot.save(&self.config_path)?;
        info!("Saved refreshed tokens to {}", self.config_path.display());

        Ok(pair)
    }
}
