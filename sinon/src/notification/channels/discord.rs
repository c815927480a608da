//! Discord bot channel (REST API v10).
//!
//! Rate limit handling follows Discord's guidance: no hardcoded limits, a
//! 429 is answered by waiting for the advertised delay (`Retry-After`,
//! `X-RateLimit-Reset-After` or the `retry_after` body field) and retrying
//! once.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{ChannelHandle, DeliveryError, DeliveryResult, MessageHandle, NotificationChannel};
use crate::domain::ChannelId;
use crate::notification::render::Notification;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

const USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/puppetino/sinon, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Wait used when a 429 carries no delay hint.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(1);

/// Maximum page size of `GET /channels/{id}/messages`.
const MESSAGES_PAGE_SIZE: usize = 100;

/// Discord channel configuration.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    /// Bot token (without the `Bot ` prefix).
    pub token: String,
    pub api_base: String,
    pub request_timeout: Duration,
    /// Upper bound on a single rate-limit wait.
    pub max_rate_limit_wait: Duration,
    /// Pause between deletes while purging.
    pub purge_delay: Duration,
    /// Upper bound on history pages scanned while purging.
    pub max_purge_pages: usize,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(15),
            max_rate_limit_wait: Duration::from_secs(60),
            purge_delay: Duration::from_millis(500),
            max_purge_pages: 20,
        }
    }
}

impl DiscordConfig {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiscordObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelMessage {
    id: String,
    author: DiscordObject,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

/// Discord notification channel.
pub struct DiscordChannel {
    config: DiscordConfig,
    client: Client,
    bot_user_id: OnceCell<u64>,
}

impl DiscordChannel {
    /// Create a new Discord channel.
    pub fn new(config: DiscordConfig) -> DeliveryResult<Self> {
        let client = twitch_api::create_client_builder(Some(config.request_timeout))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DeliveryError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            client,
            bot_user_id: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Send a request, waiting out one rate limit.
    async fn execute<F>(&self, op: &'static str, build: F) -> DeliveryResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut rate_limited = false;

        loop {
            let response = build()
                .header(AUTHORIZATION, format!("Bot {}", self.config.token))
                .send()
                .await
                .map_err(|e| DeliveryError::Transport(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            match status {
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = parse_retry_after(response).await;

                    if rate_limited {
                        warn!(op, ?retry_after, "Discord rate limit persisted after retry");
                        return Err(DeliveryError::RateLimited { retry_after });
                    }
                    rate_limited = true;

                    let wait = retry_after
                        .unwrap_or(DEFAULT_RATE_LIMIT_WAIT)
                        .min(self.config.max_rate_limit_wait);
                    debug!(op, ?wait, "Discord rate limited (429), waiting before retry");
                    tokio::time::sleep(wait).await;
                }
                StatusCode::NOT_FOUND => return Err(DeliveryError::NotFound),
                StatusCode::FORBIDDEN => return Err(DeliveryError::Forbidden),
                _ => {
                    let body = response.text().await.unwrap_or_default();
                    warn!(op, status = status.as_u16(), body = %body, "Discord request failed");
                    return Err(DeliveryError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
            }
        }
    }

    async fn bot_user_id(&self) -> DeliveryResult<u64> {
        self.bot_user_id
            .get_or_try_init(|| async {
                let url = self.url("/users/@me");
                let response = self
                    .execute("get bot user", || self.client.get(&url))
                    .await?;
                let me: DiscordObject = decode(response).await?;
                parse_id(&me.id)
            })
            .await
            .copied()
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> DeliveryResult<T> {
    response
        .json()
        .await
        .map_err(|e| DeliveryError::Transport(format!("invalid response body: {e}")))
}

fn parse_id(id: &str) -> DeliveryResult<u64> {
    id.parse()
        .map_err(|_| DeliveryError::Transport(format!("invalid snowflake: {id}")))
}

fn duration_from_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// Parse the delay hint from rate limit headers.
fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    [RETRY_AFTER.as_str(), "x-ratelimit-reset-after"]
        .into_iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok()?.trim().parse::<f64>().ok())
        .find_map(duration_from_secs)
}

/// Parse the delay hint of a 429 response, headers first then body.
async fn parse_retry_after(response: Response) -> Option<Duration> {
    if let Some(wait) = retry_after_from_headers(response.headers()) {
        return Some(wait);
    }
    let body: RateLimitBody = response.json().await.ok()?;
    duration_from_secs(body.retry_after)
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    async fn resolve_channel(&self, channel_id: ChannelId) -> DeliveryResult<ChannelHandle> {
        let url = self.url(&format!("/channels/{channel_id}"));
        self.execute("resolve channel", || self.client.get(&url)).await?;
        Ok(ChannelHandle { channel_id })
    }

    async fn send(
        &self,
        channel: &ChannelHandle,
        notification: &Notification,
    ) -> DeliveryResult<MessageHandle> {
        let url = self.url(&format!("/channels/{}/messages", channel.channel_id));
        let response = self
            .execute("send message", || self.client.post(&url).json(notification))
            .await?;
        // The message is posted at this point; an unreadable reply leaves it
        // untracked.
        let message_id = decode::<DiscordObject>(response)
            .await
            .and_then(|message| parse_id(&message.id))
            .inspect_err(|e| {
                warn!(
                    channel = %channel.channel_id,
                    error = %e,
                    "Message was sent but its id could not be read, it may be left behind"
                );
            })?;

        let handle = MessageHandle {
            channel_id: channel.channel_id,
            message_id,
        };
        debug!(
            channel = %handle.channel_id,
            message = handle.message_id,
            "Discord message sent"
        );
        Ok(handle)
    }

    async fn edit(
        &self,
        message: &MessageHandle,
        notification: &Notification,
    ) -> DeliveryResult<()> {
        let url = self.url(&format!(
            "/channels/{}/messages/{}",
            message.channel_id, message.message_id
        ));
        self.execute("edit message", || {
            self.client.patch(&url).json(notification)
        })
        .await?;
        Ok(())
    }

    async fn delete(&self, message: &MessageHandle) -> DeliveryResult<()> {
        let url = self.url(&format!(
            "/channels/{}/messages/{}",
            message.channel_id, message.message_id
        ));
        self.execute("delete message", || self.client.delete(&url)).await?;
        debug!(
            channel = %message.channel_id,
            message = message.message_id,
            "Discord message deleted"
        );
        Ok(())
    }

    async fn purge_own_messages(&self, channel: &ChannelHandle) -> DeliveryResult<usize> {
        let me = self.bot_user_id().await?;
        let url = self.url(&format!("/channels/{}/messages", channel.channel_id));
        let mut before: Option<u64> = None;
        let mut deleted = 0;

        for _ in 0..self.config.max_purge_pages {
            let cursor = before;
            let response = self
                .execute("list messages", || {
                    let request = self
                        .client
                        .get(&url)
                        .query(&[("limit", MESSAGES_PAGE_SIZE)]);
                    match cursor {
                        Some(id) => request.query(&[("before", id)]),
                        None => request,
                    }
                })
                .await?;
            let page: Vec<ChannelMessage> = decode(response).await?;
            if page.is_empty() {
                break;
            }

            for message in &page {
                let Ok(message_id) = message.id.parse::<u64>() else {
                    continue;
                };
                before = Some(before.map_or(message_id, |b| b.min(message_id)));

                if message.author.id.parse::<u64>().ok() != Some(me) {
                    continue;
                }
                let handle = MessageHandle {
                    channel_id: channel.channel_id,
                    message_id,
                };
                match self.delete(&handle).await {
                    Ok(()) => deleted += 1,
                    Err(DeliveryError::NotFound) => {}
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(self.config.purge_delay).await;
            }

            if page.len() < MESSAGES_PAGE_SIZE || before == cursor {
                break;
            }
        }

        info!(channel = %channel.channel_id, deleted, "Purged previous bot messages");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::EmbedRenderer;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::get;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const TOKEN: &str = "bot-token";
    const BOT_ID: &str = "99";

    #[derive(Default)]
    struct FakeDiscord {
        /// Number of 429 responses to return before answering normally.
        rate_limits: AtomicUsize,
        requests: AtomicUsize,
        sent: Mutex<Vec<Value>>,
        /// Answer sends with a body that has no message id.
        garbled_send: AtomicBool,
        edit_status: Mutex<Option<u16>>,
        delete_status: Mutex<Option<u16>>,
        deleted: Mutex<Vec<String>>,
        history: Mutex<Vec<Value>>,
    }

    impl FakeDiscord {
        fn authorized(&self, headers: &AxumHeaders) -> bool {
            self.requests.fetch_add(1, Ordering::SeqCst);
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == format!("Bot {TOKEN}"))
        }

        fn take_rate_limit(&self) -> Option<AxumResponse> {
            self.rate_limits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .ok()
                .map(|_| {
                    (
                        AxumStatus::TOO_MANY_REQUESTS,
                        Json(json!({
                            "message": "You are being rate limited.",
                            "retry_after": 0.01,
                            "global": false
                        })),
                    )
                        .into_response()
                })
        }
    }

    fn status_response(status: Option<u16>) -> AxumResponse {
        match status {
            Some(code) => AxumStatus::from_u16(code)
                .unwrap_or(AxumStatus::INTERNAL_SERVER_ERROR)
                .into_response(),
            None => AxumStatus::NO_CONTENT.into_response(),
        }
    }

    async fn spawn_fake(fake: Arc<FakeDiscord>) -> String {
        let app = Router::new()
            .route(
                "/users/@me",
                get(|State(f): State<Arc<FakeDiscord>>, h: AxumHeaders| async move {
                    if !f.authorized(&h) {
                        return AxumStatus::UNAUTHORIZED.into_response();
                    }
                    Json(json!({"id": BOT_ID})).into_response()
                }),
            )
            .route(
                "/channels/{channel_id}",
                get(
                    |State(f): State<Arc<FakeDiscord>>,
                     h: AxumHeaders,
                     Path(id): Path<String>| async move {
                        if !f.authorized(&h) {
                            return AxumStatus::UNAUTHORIZED.into_response();
                        }
                        if id == "1" {
                            Json(json!({"id": "1"})).into_response()
                        } else {
                            AxumStatus::NOT_FOUND.into_response()
                        }
                    },
                ),
            )
            .route(
                "/channels/{channel_id}/messages",
                get(
                    |State(f): State<Arc<FakeDiscord>>,
                     h: AxumHeaders,
                     Query(q): Query<HashMap<String, String>>| async move {
                        if !f.authorized(&h) {
                            return AxumStatus::UNAUTHORIZED.into_response();
                        }
                        let history = f.history.lock().clone();
                        let page: Vec<Value> = match q.get("before") {
                            None => history,
                            Some(before) => {
                                let before: u64 = before.parse().unwrap();
                                history
                                    .into_iter()
                                    .filter(|m| {
                                        m["id"].as_str().unwrap().parse::<u64>().unwrap() < before
                                    })
                                    .collect()
                            }
                        };
                        Json(page).into_response()
                    },
                )
                .post(
                    |State(f): State<Arc<FakeDiscord>>,
                     h: AxumHeaders,
                     Json(body): Json<Value>| async move {
                        if !f.authorized(&h) {
                            return AxumStatus::UNAUTHORIZED.into_response();
                        }
                        if let Some(limited) = f.take_rate_limit() {
                            return limited;
                        }
                        f.sent.lock().push(body);
                        if f.garbled_send.load(Ordering::SeqCst) {
                            return Json(json!({"code": 0})).into_response();
                        }
                        Json(json!({"id": "555", "channel_id": "1"})).into_response()
                    },
                ),
            )
            .route(
                "/channels/{channel_id}/messages/{message_id}",
                axum::routing::patch(
                    |State(f): State<Arc<FakeDiscord>>, h: AxumHeaders| async move {
                        if !f.authorized(&h) {
                            return AxumStatus::UNAUTHORIZED.into_response();
                        }
                        match *f.edit_status.lock() {
                            Some(code) => status_response(Some(code)),
                            None => Json(json!({"id": "555"})).into_response(),
                        }
                    },
                )
                .delete(
                    |State(f): State<Arc<FakeDiscord>>,
                     h: AxumHeaders,
                     Path((_, message_id)): Path<(String, String)>| async move {
                        if !f.authorized(&h) {
                            return AxumStatus::UNAUTHORIZED.into_response();
                        }
                        let status = *f.delete_status.lock();
                        if status.is_none() {
                            f.deleted.lock().push(message_id);
                        }
                        status_response(status)
                    },
                ),
            )
            .with_state(fake);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn channel_for(fake: &Arc<FakeDiscord>) -> DiscordChannel {
        let base = spawn_fake(fake.clone()).await;
        DiscordChannel::new(DiscordConfig {
            token: TOKEN.to_string(),
            api_base: base,
            purge_delay: Duration::ZERO,
            ..Default::default()
        })
        .unwrap()
    }

    fn handle() -> ChannelHandle {
        ChannelHandle {
            channel_id: ChannelId(1),
        }
    }

    fn message() -> MessageHandle {
        MessageHandle {
            channel_id: ChannelId(1),
            message_id: 555,
        }
    }

    #[tokio::test]
    async fn send_posts_embed_and_returns_handle() {
        let fake = Arc::new(FakeDiscord::default());
        let channel = channel_for(&fake).await;
        let notification = EmbedRenderer::default().no_streams("Foo");

        let sent = channel.send(&handle(), &notification).await.unwrap();

        assert_eq!(sent, message());
        let bodies = fake.sent.lock();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["embeds"][0]["title"], "No live streams");
    }

    #[tokio::test]
    async fn unreadable_send_reply_is_a_transport_error() {
        let fake = Arc::new(FakeDiscord::default());
        fake.garbled_send.store(true, Ordering::SeqCst);
        let channel = channel_for(&fake).await;

        let err = channel
            .send(&handle(), &EmbedRenderer::default().no_streams("Foo"))
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::Transport(_)));
        // The message did reach Discord.
        assert_eq!(fake.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_is_retried_once() {
        let fake = Arc::new(FakeDiscord::default());
        fake.rate_limits.store(1, Ordering::SeqCst);
        let channel = channel_for(&fake).await;

        let result = channel
            .send(&handle(), &EmbedRenderer::default().no_streams("Foo"))
            .await;

        assert!(result.is_ok());
        assert_eq!(fake.requests.load(Ordering::SeqCst), 2);
        assert_eq!(fake.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn second_rate_limit_is_reported() {
        let fake = Arc::new(FakeDiscord::default());
        fake.rate_limits.store(5, Ordering::SeqCst);
        let channel = channel_for(&fake).await;

        let err = channel
            .send(&handle(), &EmbedRenderer::default().no_streams("Foo"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            DeliveryError::RateLimited {
                retry_after: Some(Duration::from_millis(10))
            }
        );
        assert_eq!(fake.requests.load(Ordering::SeqCst), 2);
        assert!(fake.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn edit_and_delete_classify_missing_and_forbidden() {
        let fake = Arc::new(FakeDiscord::default());
        let channel = channel_for(&fake).await;
        let notification = EmbedRenderer::default().no_streams("Foo");

        assert_eq!(channel.edit(&message(), &notification).await, Ok(()));
        *fake.edit_status.lock() = Some(404);
        assert_eq!(
            channel.edit(&message(), &notification).await,
            Err(DeliveryError::NotFound)
        );

        *fake.delete_status.lock() = Some(403);
        assert_eq!(channel.delete(&message()).await, Err(DeliveryError::Forbidden));
        *fake.delete_status.lock() = Some(500);
        assert!(matches!(
            channel.delete(&message()).await,
            Err(DeliveryError::Status { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn resolve_channel_reports_missing_channels() {
        let fake = Arc::new(FakeDiscord::default());
        let channel = channel_for(&fake).await;

        assert_eq!(channel.resolve_channel(ChannelId(1)).await, Ok(handle()));
        assert_eq!(
            channel.resolve_channel(ChannelId(2)).await,
            Err(DeliveryError::NotFound)
        );
    }

    #[tokio::test]
    async fn wrong_token_is_a_status_error() {
        let fake = Arc::new(FakeDiscord::default());
        let base = spawn_fake(fake.clone()).await;
        let channel = DiscordChannel::new(DiscordConfig {
            token: "wrong".to_string(),
            api_base: base,
            ..Default::default()
        })
        .unwrap();

        assert!(matches!(
            channel.resolve_channel(ChannelId(1)).await,
            Err(DeliveryError::Status { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn purge_deletes_only_own_messages() {
        let fake = Arc::new(FakeDiscord::default());
        *fake.history.lock() = vec![
            json!({"id": "30", "author": {"id": BOT_ID}}),
            json!({"id": "20", "author": {"id": "7"}}),
            json!({"id": "10", "author": {"id": BOT_ID}}),
        ];
        let channel = channel_for(&fake).await;

        let deleted = channel.purge_own_messages(&handle()).await.unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(*fake.deleted.lock(), vec!["30".to_string(), "10".to_string()]);
    }

    #[test]
    fn retry_after_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_from_headers(&headers), None);

        headers.insert("x-ratelimit-reset-after", "1.5".parse().unwrap());
        assert_eq!(
            retry_after_from_headers(&headers),
            Some(Duration::from_millis(1500))
        );

        headers.insert(RETRY_AFTER, "2".parse().unwrap());
        assert_eq!(retry_after_from_headers(&headers), Some(Duration::from_secs(2)));

        headers.insert(RETRY_AFTER, "-1".parse().unwrap());
        assert_eq!(
            retry_after_from_headers(&headers),
            Some(Duration::from_millis(1500))
        );
    }
}
