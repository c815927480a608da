//! Helix HTTP client.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, RETRY_AFTER};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::TokenProvider;
use crate::models::{Category, HelixResponse, HelixUser, LiveStream, StreamerProfile};
use crate::retry::RetryPolicy;
use crate::{Result, TwitchApiError};

pub const DEFAULT_API_BASE: &str = "https://api.twitch.tv/helix";
pub const DEFAULT_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Maximum page size accepted by `GET /helix/streams`.
const STREAMS_PAGE_SIZE: &str = "100";

const USER_AGENT: &str = concat!("sinon-twitch-api/", env!("CARGO_PKG_VERSION"));

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Client builder with the crypto provider installed and sane defaults.
///
/// A zero or missing timeout leaves reqwest's default (no timeout).
pub fn create_client_builder(timeout: Option<Duration>) -> ClientBuilder {
    install_rustls_provider();

    let mut builder = Client::builder().user_agent(USER_AGENT);
    if let Some(timeout) = timeout.filter(|t| !t.is_zero()) {
        builder = builder.timeout(timeout);
    }
    builder
}

#[derive(Debug, Clone)]
pub struct HelixClientConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Pre-issued app token, used until Twitch rejects it.
    pub access_token: Option<String>,
    pub api_base: String,
    pub token_url: String,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    /// Upper bound on pages followed when listing streams.
    pub max_stream_pages: usize,
}

impl Default for HelixClientConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            access_token: None,
            api_base: DEFAULT_API_BASE.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(10),
            max_stream_pages: 10,
        }
    }
}

/// Authenticated Helix client.
///
/// Every call is retried on transient failures according to the configured
/// [`RetryPolicy`]. A 401 discards the cached token and retries exactly once
/// with a freshly fetched one.
#[derive(Debug)]
pub struct HelixClient {
    http: Client,
    config: HelixClientConfig,
    tokens: TokenProvider,
}

impl HelixClient {
    pub fn new(config: HelixClientConfig) -> Result<Self> {
        let http = create_client_builder(Some(config.request_timeout)).build()?;
        Ok(Self::with_client(http, config))
    }

    pub fn with_client(http: Client, config: HelixClientConfig) -> Self {
        let tokens = TokenProvider::new(
            config.client_id.clone(),
            config.client_secret.clone(),
            config.token_url.clone(),
            config.access_token.clone(),
        );
        Self {
            http,
            config,
            tokens,
        }
    }

    /// Look up a category by its exact name.
    ///
    /// Returns `Ok(None)` when Twitch knows no such category.
    pub async fn resolve_category(&self, name: &str) -> Result<Option<Category>> {
        if name.trim().is_empty() {
            return Ok(None);
        }

        let response: HelixResponse<Category> = self.get("games", &[("name", name)]).await?;
        let category = response.data.into_iter().next();
        match &category {
            Some(c) => debug!(category = %name, id = %c.id, "Resolved Twitch category"),
            None => debug!(category = %name, "Twitch category not found"),
        }
        Ok(category)
    }

    /// List every live stream in a category.
    ///
    /// Follows pagination up to `max_stream_pages`. A failure on any page
    /// fails the whole call, and so does a cursor still pending after the
    /// last allowed page, so callers never see a truncated live set.
    pub async fn list_live_streams(&self, category_id: &str) -> Result<Vec<LiveStream>> {
        let max_pages = self.config.max_stream_pages.max(1);
        let mut streams: Vec<LiveStream> = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;

        for page in 1..=max_pages {
            let mut query = vec![("game_id", category_id), ("first", STREAMS_PAGE_SIZE)];
            if let Some(after) = cursor.as_deref() {
                query.push(("after", after));
            }

            let response: HelixResponse<LiveStream> = self.get("streams", &query).await?;
            let next = response.next_cursor().map(str::to_owned);
            let received = response.data.len();

            // Viewer-count ordering shifts between pages, so the same stream
            // can show up twice.
            streams.extend(
                response
                    .data
                    .into_iter()
                    .filter(|s| seen.insert(s.id.clone())),
            );

            match next {
                Some(next) if received > 0 => cursor = Some(next),
                _ => break,
            }

            if page == max_pages {
                warn!(category_id, pages = max_pages, "Live set exceeds the stream page limit");
                return Err(TwitchApiError::PageLimit { pages: max_pages });
            }
        }

        debug!(category_id, count = streams.len(), "Fetched live streams");
        Ok(streams)
    }

    /// Fetch profile metadata for a broadcaster.
    ///
    /// Best-effort: any failure yields an empty profile.
    pub async fn streamer_profile(&self, user_id: &str) -> StreamerProfile {
        match self
            .get::<HelixUser>("users", &[("id", user_id)])
            .await
        {
            Ok(response) => response
                .data
                .into_iter()
                .next()
                .map(StreamerProfile::from)
                .unwrap_or_default(),
            Err(e) => {
                warn!(user_id, error = %e, "Failed to fetch streamer profile");
                StreamerProfile::default()
            }
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<HelixResponse<T>> {
        let url = self.endpoint(path);
        let policy = self.config.retry;
        let mut attempt = 0u32;
        let mut refreshed = false;

        loop {
            match self.get_once(&url, query).await {
                Ok(response) => return Ok(response),
                Err(TwitchApiError::Unauthorized(token)) if !refreshed => {
                    refreshed = true;
                    debug!(%url, "Helix rejected app token, refreshing");
                    self.tokens.invalidate(&token).await;
                }
                Err(e) => {
                    attempt += 1;
                    if !policy.should_retry(attempt, &e) {
                        return Err(e);
                    }
                    let delay = policy.delay_for(attempt, &e);
                    debug!(
                        %url,
                        error = %e,
                        "Helix request failed, retrying in {:?} (attempt {}/{})",
                        delay,
                        attempt,
                        policy.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Issue one request. A 401 is reported as `Unauthorized` carrying the
    /// rejected token so the caller can invalidate precisely that one.
    async fn get_once<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<HelixResponse<T>> {
        let token = self.tokens.current(&self.http).await?;

        let response = self
            .http
            .get(url)
            .query(query)
            .header("Client-Id", self.tokens.client_id())
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        match status {
            StatusCode::UNAUTHORIZED => Err(TwitchApiError::Unauthorized(token)),
            StatusCode::TOO_MANY_REQUESTS => Err(TwitchApiError::RateLimited {
                retry_after: parse_retry_after(response.headers()),
            }),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(TwitchApiError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

/// Helix reports rate-limit resets as a unix timestamp in
/// `Ratelimit-Reset`; a plain `Retry-After` is honoured as well.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(secs) = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s >= 0.0)
    {
        return Some(Duration::from_secs_f64(secs));
    }

    let reset = headers
        .get("Ratelimit-Reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())?;
    let now = chrono::Utc::now().timestamp();
    Some(Duration::from_secs(reset.saturating_sub(now).max(0) as u64))
}
