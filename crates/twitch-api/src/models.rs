//! Helix response models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const CHANNEL_BASE_URL: &str = "https://www.twitch.tv";

/// Envelope shared by every Helix endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HelixResponse<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub cursor: Option<String>,
}

impl<T> HelixResponse<T> {
    /// Cursor for the next page, if the endpoint reported one.
    pub fn next_cursor(&self) -> Option<&str> {
        self.pagination
            .as_ref()
            .and_then(|p| p.cursor.as_deref())
            .filter(|c| !c.is_empty())
    }
}

/// A Twitch category ("game").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub box_art_url: String,
}

/// A live stream as returned by `GET /helix/streams`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveStream {
    /// Stream session id. Stable for the lifetime of one broadcast.
    pub id: String,
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    #[serde(default)]
    pub game_id: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub viewer_count: u64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub language: String,
    /// Thumbnail template containing `{width}` and `{height}` placeholders.
    #[serde(default)]
    pub thumbnail_url: String,
}

impl LiveStream {
    /// Public channel page of the broadcaster.
    pub fn channel_url(&self) -> String {
        let login = if self.user_login.is_empty() {
            &self.user_name
        } else {
            &self.user_login
        };
        format!("{CHANNEL_BASE_URL}/{login}")
    }

    /// Thumbnail URL with the size placeholders filled in.
    pub fn thumbnail(&self, width: u32, height: u32) -> String {
        self.thumbnail_url
            .replace("{width}", &width.to_string())
            .replace("{height}", &height.to_string())
    }
}

/// A Twitch user as returned by `GET /helix/users`.
#[derive(Debug, Clone, Deserialize)]
pub struct HelixUser {
    pub id: String,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub profile_image_url: String,
}

/// Best-effort streamer metadata shown alongside a live notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamerProfile {
    pub description: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<HelixUser> for StreamerProfile {
    fn from(user: HelixUser) -> Self {
        let non_empty = |s: String| {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };
        Self {
            description: non_empty(user.description),
            avatar_url: non_empty(user.profile_image_url),
        }
    }
}

/// OAuth client-credentials token response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: String,
}
