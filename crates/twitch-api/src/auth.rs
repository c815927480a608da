//! App access token handling (OAuth client-credentials grant).
//!
//! The token is fetched on first use and cached for the lifetime of the
//! process. Callers report a token as stale after a 401 and the next call to
//! [`TokenProvider::current`] fetches a fresh one.

use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::TokenResponse;
use crate::{Result, TwitchApiError};

/// Refresh slightly before the advertised expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct AppToken {
    access_token: String,
    expires_at: Option<Instant>,
}

impl AppToken {
    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|at| Instant::now() + EXPIRY_MARGIN >= at)
    }
}

/// Lazily fetched, process-wide app access token.
#[derive(Debug)]
pub struct TokenProvider {
    client_id: String,
    client_secret: String,
    token_url: String,
    token: Mutex<Option<AppToken>>,
}

impl TokenProvider {
    /// Create a provider. `initial` is an optional pre-issued token that is
    /// used until the API rejects it.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
        initial: Option<String>,
    ) -> Self {
        let token = initial
            .filter(|t| !t.trim().is_empty())
            .map(|access_token| AppToken {
                access_token,
                expires_at: None,
            });
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: token_url.into(),
            token: Mutex::new(token),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Return the cached token, fetching a new one if none is cached or the
    /// cached one expired. Concurrent callers share a single fetch.
    pub async fn current(&self, client: &Client) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref()
            && !token.is_expired()
        {
            return Ok(token.access_token.clone());
        }

        let fresh = self.fetch(client).await?;
        let access_token = fresh.access_token.clone();
        *guard = Some(fresh);
        Ok(access_token)
    }

    /// Drop the cached token if it is still the one that was rejected.
    ///
    /// A concurrent caller may already have replaced it, in which case the
    /// newer token is kept.
    pub async fn invalidate(&self, rejected: &str) {
        let mut guard = self.token.lock().await;
        if guard
            .as_ref()
            .is_some_and(|token| token.access_token == rejected)
        {
            debug!("Discarding rejected Twitch app token");
            *guard = None;
        }
    }

    async fn fetch(&self, client: &Client) -> Result<AppToken> {
        if self.client_secret.is_empty() {
            return Err(TwitchApiError::Token(
                "no client secret configured, cannot request an app token".to_string(),
            ));
        }

        let response = client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(TwitchApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TwitchApiError::Token(format!("{status}: {body}")));
        }

        let token: TokenResponse = response.json().await?;
        if token.access_token.is_empty() {
            return Err(TwitchApiError::Token(
                "token endpoint returned an empty access token".to_string(),
            ));
        }

        info!(
            expires_in = token.expires_in,
            token_type = %token.token_type,
            "Obtained Twitch app access token"
        );

        let expires_at = (token.expires_in > 0)
            .then(|| Instant::now() + Duration::from_secs(token.expires_in));

        Ok(AppToken {
            access_token: token.access_token,
            expires_at,
        })
    }
}
