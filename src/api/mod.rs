//! Client for the remote game-metadata API.
//!
//! Every request flows through the rate limiter before it touches the wire
//! and reports its outcome back afterwards. Rate-limit rejections are
//! retried here, inside the client, after the backoff clears; they are
//! invisible to the per-item retry budget.

mod connection;
mod error;
mod types;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use reqwest::StatusCode;
use tracing::{debug, info};
use url::Url;

pub use connection::{ConnectionPool, USER_AGENT};
pub use error::{ApiError, ErrorClass};
pub use types::{GameInfoResponse, GameMetadata, MediaAsset, SearchResponse, UserInfo};

use crate::config::ApiSettings;
use crate::models::RomFile;
use crate::scraper::rate_limiter::{Endpoint, RateLimiter};

/// Response header carrying the account's consumed daily quota.
const QUOTA_USED_HEADER: &str = "x-quota-used";
/// Response header carrying the account's daily quota ceiling.
const QUOTA_LIMIT_HEADER: &str = "x-quota-limit";

/// Rate-limited client for the metadata API.
pub struct ApiClient {
    pool: Arc<ConnectionPool>,
    rate_limiter: Arc<RateLimiter>,
    base_url: Url,
    username: String,
    password: String,
}

impl ApiClient {
    pub fn new(settings: &ApiSettings, rate_limiter: Arc<RateLimiter>) -> Result<Self, ApiError> {
        let base_url = Url::parse(&settings.base_url)
            .map_err(|e| ApiError::Fatal(format!("invalid API base URL: {e}")))?;
        Ok(Self {
            pool: Arc::new(ConnectionPool::new(settings.request_timeout())?),
            rate_limiter,
            base_url,
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    /// The shared transport, exposed so the orchestrator can resize it once
    /// after authentication.
    pub fn connection_pool(&self) -> Arc<ConnectionPool> {
        self.pool.clone()
    }

    /// Authenticate and fetch account limits. Updates the limiter's quota
    /// snapshot as a side effect.
    pub async fn authenticate(&self) -> Result<UserInfo, ApiError> {
        let response = self
            .get(Endpoint::UserInfo, "user_info", Vec::new())
            .await?;
        let user: UserInfo = response
            .json()
            .await
            .map_err(|e| ApiError::Transient(format!("malformed user_info response: {e}")))?;

        self.rate_limiter
            .update_quota(user.requests_today, user.max_requests_per_day);
        info!(
            "Authenticated as {} ({} threads, quota {}/{})",
            user.username, user.max_threads, user.requests_today, user.max_requests_per_day
        );
        Ok(user)
    }

    /// Look up metadata by ROM hash and filename.
    pub async fn game_info(&self, rom: &RomFile, system: &str) -> Result<GameMetadata, ApiError> {
        let query = vec![
            ("system".to_string(), system.to_string()),
            ("sha256".to_string(), rom.sha256.clone()),
            ("filename".to_string(), rom.filename.clone()),
            ("size".to_string(), rom.size.to_string()),
        ];
        let response = self.get(Endpoint::GameInfo, "game_info", query).await?;
        let parsed: GameInfoResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Transient(format!("malformed game_info response: {e}")))?;
        Ok(parsed.game)
    }

    /// Name-based fallback search. Empty result lists are a `NotFound`.
    pub async fn search(&self, name: &str, system: &str) -> Result<GameMetadata, ApiError> {
        let query = vec![
            ("system".to_string(), system.to_string()),
            ("name".to_string(), name.to_string()),
        ];
        let response = self.get(Endpoint::Search, "search", query).await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Transient(format!("malformed search response: {e}")))?;
        parsed
            .results
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound(format!("no search results for {name:?}")))
    }

    /// Download one media asset to `dest`. The file appears atomically:
    /// bytes land in a temp file that is renamed into place, so an
    /// interrupted download never leaves a partial file.
    pub async fn download_media(&self, asset: &MediaAsset, dest: &Path) -> Result<(), ApiError> {
        let url = Url::parse(&asset.url)
            .map_err(|e| ApiError::Transient(format!("bad media URL {}: {e}", asset.url)))?;
        let response = self.get_url(Endpoint::MediaDownload, url, Vec::new()).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Transient(format!("media download interrupted: {e}")))?;

        let dir = dest.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)
            .map_err(|e| ApiError::Fatal(format!("cannot create {}: {e}", dir.display())))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| ApiError::Fatal(format!("cannot write media: {e}")))?;
        tmp.write_all(&bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| ApiError::Fatal(format!("cannot write media: {e}")))?;
        tmp.persist(dest)
            .map_err(|e| ApiError::Fatal(format!("cannot write media: {e}")))?;

        debug!("Media saved to {}", dest.display());
        Ok(())
    }

    async fn get(
        &self,
        endpoint: Endpoint,
        path: &str,
        query: Vec<(String, String)>,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ApiError::Fatal(format!("invalid endpoint path {path:?}: {e}")))?;
        self.get_url(endpoint, url, query).await
    }

    /// Issue a GET through the rate limiter, retrying 429s after backoff.
    async fn get_url(
        &self,
        endpoint: Endpoint,
        url: Url,
        query: Vec<(String, String)>,
    ) -> Result<reqwest::Response, ApiError> {
        loop {
            self.rate_limiter.acquire(endpoint).await;

            let request = self
                .pool
                .client()
                .get(url.clone())
                .query(&query)
                .query(&[("username", &self.username), ("password", &self.password)]);

            let response = request.send().await.map_err(ApiError::from)?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                self.rate_limiter.record_rejection(endpoint).await;
                continue;
            }

            self.update_quota_from_headers(&response);

            return match status {
                s if s.is_success() => {
                    self.rate_limiter.record_success(endpoint).await;
                    Ok(response)
                }
                StatusCode::NOT_FOUND => {
                    // A valid, well-understood answer from the API.
                    self.rate_limiter.record_success(endpoint).await;
                    Err(ApiError::NotFound(url.path().to_string()))
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    if self.rate_limiter.get_quota_stats().exhausted() {
                        Err(ApiError::Fatal("daily API quota exhausted".to_string()))
                    } else {
                        Err(ApiError::Fatal("authentication rejected by API".to_string()))
                    }
                }
                s if s.is_server_error() => {
                    Err(ApiError::Transient(format!("server error {s}")))
                }
                s => Err(ApiError::Transient(format!("unexpected status {s}"))),
            };
        }
    }

    fn update_quota_from_headers(&self, response: &reqwest::Response) {
        let header_u64 = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
        };
        if let (Some(used), Some(limit)) =
            (header_u64(QUOTA_USED_HEADER), header_u64(QUOTA_LIMIT_HEADER))
        {
            self.rate_limiter.update_quota(used, limit);
        }
    }
}
