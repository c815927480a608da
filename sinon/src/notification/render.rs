//! Rendering of Discord embeds.

use serde::Serialize;
use twitch_api::{LiveStream, StreamerProfile};

/// Embed accent color.
pub const EMBED_COLOR: u32 = 0x9900ff;

/// Size the thumbnail template is filled in with.
const THUMBNAIL_WIDTH: u32 = 440;
const THUMBNAIL_HEIGHT: u32 = 248;

// Discord embed limits.
const MAX_TITLE_LEN: usize = 256;
const MAX_DESCRIPTION_LEN: usize = 4096;
const MAX_AUTHOR_LEN: usize = 256;
const MAX_FOOTER_LEN: usize = 2048;

/// A rendered message body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub embeds: Vec<Embed>,
}

impl Notification {
    fn single(embed: Embed) -> Self {
        Self {
            embeds: vec![embed],
        }
    }

    /// The first (and usually only) embed.
    pub fn embed(&self) -> Option<&Embed> {
        self.embeds.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
}

impl Embed {
    /// Value of the field called `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

/// Builds the embeds posted by the reconciler.
#[derive(Debug, Clone)]
pub struct EmbedRenderer {
    footer: String,
}

impl Default for EmbedRenderer {
    fn default() -> Self {
        Self::new("Sinon")
    }
}

impl EmbedRenderer {
    pub fn new(footer: impl Into<String>) -> Self {
        Self {
            footer: footer.into(),
        }
    }

    /// Live notification for one stream.
    pub fn stream(
        &self,
        stream: &LiveStream,
        category: &str,
        profile: &StreamerProfile,
        max_viewers: u64,
    ) -> Notification {
        let channel_url = stream.channel_url();
        let streamer = if stream.user_name.is_empty() {
            &stream.user_login
        } else {
            &stream.user_name
        };

        let title = if stream.title.trim().is_empty() {
            format!("{streamer} is live")
        } else {
            stream.title.clone()
        };

        let mut description = format!("{streamer} is live streaming {category} on Twitch.");
        if let Some(bio) = &profile.description {
            description.push_str("\n\n");
            description.push_str(bio);
        }

        let thumbnail = (!stream.thumbnail_url.is_empty()).then(|| EmbedImage {
            url: stream.thumbnail(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT),
        });

        Notification::single(Embed {
            title: Some(truncate(&title, MAX_TITLE_LEN)),
            url: Some(channel_url.clone()),
            description: Some(truncate(&description, MAX_DESCRIPTION_LEN)),
            color: EMBED_COLOR,
            timestamp: stream.started_at.map(|t| t.to_rfc3339()),
            author: Some(EmbedAuthor {
                name: truncate(streamer, MAX_AUTHOR_LEN),
                url: Some(channel_url),
                icon_url: profile.avatar_url.clone(),
            }),
            fields: vec![
                EmbedField {
                    name: "Viewers".to_string(),
                    value: stream.viewer_count.to_string(),
                    inline: true,
                },
                EmbedField {
                    name: "Max Viewers".to_string(),
                    value: max_viewers.to_string(),
                    inline: true,
                },
            ],
            thumbnail,
            footer: self.footer(),
        })
    }

    /// Sentinel posted while the category has no live streams.
    pub fn no_streams(&self, category: &str) -> Notification {
        self.notice(
            "No live streams",
            format!("Nobody is streaming {category} on Twitch right now."),
        )
    }

    /// Notice posted once when the configured category does not exist.
    pub fn category_not_found(&self, category: &str) -> Notification {
        self.notice(
            "Category not found",
            format!(
                "The Twitch category \"{category}\" could not be found. \
                 Category names must match Twitch exactly, including capitalization."
            ),
        )
    }

    fn notice(&self, title: &str, description: String) -> Notification {
        Notification::single(Embed {
            title: Some(title.to_string()),
            description: Some(truncate(&description, MAX_DESCRIPTION_LEN)),
            color: EMBED_COLOR,
            footer: self.footer(),
            ..Default::default()
        })
    }

    fn footer(&self) -> Option<EmbedFooter> {
        (!self.footer.is_empty()).then(|| EmbedFooter {
            text: truncate(&self.footer, MAX_FOOTER_LEN),
        })
    }
}

/// Truncate to at most `max` characters, marking the cut with an ellipsis.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
