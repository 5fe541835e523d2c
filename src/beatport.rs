use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::auth::{AuthError, CredentialProvider};
use crate::types::CandidateMatch;

const SEARCH_PATH: &str = "catalog/tracks/";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub results: Vec<CatalogTrack>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogTrack {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mix_name: Option<String>,
    #[serde(default)]
    pub genre: Option<CatalogGenre>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogGenre {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
}

impl SearchResult {
    /// The first result's genre. Later results are only counted.
    pub fn candidate(&self) -> Option<CandidateMatch> {
        let first = self.results.first()?;
        let genre = first.genre.as_ref()?;
        debug!(
            "first result: track {:?} {:?} ({:?}), genre {:?} {}",
            first.id, first.name, first.mix_name, genre.id, genre.name
        );
        let genre = genre.name.clone();
        Some(CandidateMatch {
            genre,
            result_count: self.results.len(),
        })
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("rate limited by Beatport")]
    RateLimited,
    #[error("Beatport rejected the access token")]
    Unauthorized,
    #[error("Beatport request failed: {status} {reason}")]
    Api { status: u16, reason: String },
    #[error("Beatport request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Beatport response was not understood: {0}")]
    Decode(String),
    #[error("Beatport authentication failed: {0}")]
    Auth(#[from] AuthError),
}

impl CatalogError {
    /// A failed token refresh ends the run; everything else skips one track.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Genre lookup as seen by the sync loop.
#[async_trait]
pub trait CatalogSearch: Send {
    async fn search_track(
        &mut self,
        artist: &str,
        name: &str,
        mix: Option<&str>,
    ) -> Result<SearchResult, CatalogError>;
}

/// Single-slot limiter: at most one request per `min_interval`.
struct RateLimiter {
    last_request: Option<Instant>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: None,
            min_interval,
        }
    }

    /// Wait out the rest of the interval, then mark a request as dispatched.
    async fn acquire(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!("Rate limiting: waiting {wait:?}");
                tokio::time::sleep(wait).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}

/// Beatport v4 catalog client.
pub struct CatalogClient {
    http: Client,
    credentials: Arc<dyn CredentialProvider>,
    limiter: RateLimiter,
}

impl CatalogClient {
    pub fn with_min_interval(
        http: Client,
        credentials: Arc<dyn CredentialProvider>,
        min_interval: Duration,
    ) -> Self {
        Self {
            http,
            credentials,
            limiter: RateLimiter::new(min_interval),
        }
    }

    /// Search the catalog by artist, title and optional mix name.
    ///
    /// A 401 triggers one token refresh and one retry of the same request.
    /// A second 401 is returned as [`CatalogError::Unauthorized`].
    pub async fn search_track(
        &mut self,
        artist: &str,
        name: &str,
        mix: Option<&str>,
    ) -> Result<SearchResult, CatalogError> {
        let query = search_query(artist, name, mix);
        match self.get_search(&query).await {
            Err(CatalogError::Unauthorized) => {
                info!("Beatport returned 401, refreshing access token");
                self.credentials.refresh().await?;
                self.get_search(&query).await
            }
            other => other,
        }
    }

    async fn get_search(&mut self, query: &[(&str, &str)]) -> Result<SearchResult, CatalogError> {
        self.limiter.acquire().await;

        let creds = self.credentials.credentials();
        let url = endpoint(&creds.base_url, SEARCH_PATH);
        debug!("GET {url} {query:?}");

        let resp = self
            .http
            .get(&url)
            .query(query)
            .bearer_auth(&creds.access_token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = resp.status();
        match status.as_u16() {
            429 => Err(CatalogError::RateLimited),
            401 => Err(CatalogError::Unauthorized),
            _ if !status.is_success() => Err(CatalogError::Api {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            }),
            _ => {
                let body = resp.text().await?;
                serde_json::from_str(&body).map_err(|e| CatalogError::Decode(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl CatalogSearch for CatalogClient {
    async fn search_track(
        &mut self,
        artist: &str,
        name: &str,
        mix: Option<&str>,
    ) -> Result<SearchResult, CatalogError> {
        CatalogClient::search_track(self, artist, name, mix).await
    }
}

fn search_query<'a>(artist: &'a str, name: &'a str, mix: Option<&'a str>) -> Vec<(&'a str, &'a str)> {
    let mut query = vec![("artist_name", artist), ("name", name)];
    if let Some(mix) = mix {
        query.push(("mix_name", mix));
    }
    query
}

/// Join an API path onto the configured base URL.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
