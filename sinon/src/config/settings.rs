//! Per-guild settings file.
//!
//! ```json
//! {
//!     "dev_mode": false,
//!     "guilds": {
//!         "123456789": { "channel_id": 42, "category_name": "Foo", "allowed_role": 7 }
//!     }
//! }
//! ```
//!
//! The file is read fresh on every pass so edits take effect without a
//! restart. Unknown fields are preserved on write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::DestinationSource;
use crate::domain::{ChannelId, Destination, DestinationId};
use crate::utils::fs;
use crate::{Error, Result};

/// Root of the settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub dev_mode: bool,
    #[serde(default)]
    pub guilds: BTreeMap<String, GuildEntry>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One entry of `guilds`.
///
/// An entry that does not match [`GuildSettings`] is kept verbatim so a
/// single bad guild neither fails the whole file nor gets lost on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GuildEntry {
    Valid(GuildSettings),
    Malformed(serde_json::Value),
}

impl Default for GuildEntry {
    fn default() -> Self {
        Self::Valid(GuildSettings::default())
    }
}

impl GuildEntry {
    pub fn settings(&self) -> Option<&GuildSettings> {
        match self {
            Self::Valid(guild) => Some(guild),
            Self::Malformed(_) => None,
        }
    }

    /// Why the entry does not parse, for logging.
    fn parse_error(&self) -> Option<String> {
        match self {
            Self::Valid(_) => None,
            Self::Malformed(raw) => Some(
                serde_json::from_value::<GuildSettings>(raw.clone())
                    .err()
                    .map_or_else(|| "unexpected shape".to_string(), |e| e.to_string()),
            ),
        }
    }
}

/// Settings of a single guild.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildSettings {
    #[serde(
        default,
        deserialize_with = "deserialize_snowflake",
        skip_serializing_if = "Option::is_none"
    )]
    pub channel_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_snowflake",
        skip_serializing_if = "Option::is_none"
    )]
    pub allowed_role: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GuildSettings {
    fn is_empty(&self) -> bool {
        self.channel_id.is_none() && self.category_name.is_none()
    }
}

impl Settings {
    /// Valid destinations in guild id order.
    ///
    /// Guilds without a channel or a category are skipped; partially
    /// configured ones are reported.
    pub fn destinations(&self) -> Vec<Destination> {
        let mut destinations = Vec::with_capacity(self.guilds.len());
        for (guild_id, entry) in &self.guilds {
            let Some(guild) = entry.settings() else {
                let reason = entry.parse_error().unwrap_or_default();
                warn!(
                    destination = %guild_id,
                    error = %reason,
                    "Guild settings are malformed, skipping"
                );
                continue;
            };
            let category = guild
                .category_name
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty());

            match (guild.channel_id, category) {
                (Some(channel_id), Some(category)) => destinations.push(Destination {
                    id: DestinationId::new(guild_id.as_str()),
                    category: category.to_string(),
                    channel_id: ChannelId(channel_id),
                }),
                _ if guild.is_empty() => {
                    debug!(destination = %guild_id, "Guild is not configured, skipping");
                }
                (None, _) => {
                    warn!(destination = %guild_id, "Guild has no channel_id, skipping");
                }
                (_, None) => {
                    warn!(destination = %guild_id, "Guild has no category_name, skipping");
                }
            }
        }
        destinations
    }
}

/// Accepts a snowflake as a JSON number, a numeric string or a channel
/// mention such as `<#123>`.
fn deserialize_snowflake<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(text)) => Ok(parse_snowflake(&text)),
    }
}

/// Extract the digits of a snowflake or mention. Returns `None` if there are
/// none or they overflow.
pub fn parse_snowflake(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// File-backed settings store.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the settings. A missing or unreadable file yields empty settings.
    pub async fn load(&self) -> Settings {
        match self.read().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to load settings, using empty settings"
                );
                Settings::default()
            }
        }
    }

    /// Read the settings, failing on a file that exists but does not parse.
    async fn read(&self) -> Result<Settings> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Settings file does not exist yet");
                return Ok(Settings::default());
            }
            Err(e) => return Err(fs::io_error("reading", &self.path, e)),
        };
        if raw.trim().is_empty() {
            return Ok(Settings::default());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    /// Configure (or reconfigure) the destination of a guild.
    pub async fn set_destination(
        &self,
        guild_id: &str,
        channel_id: u64,
        category: &str,
    ) -> Result<Destination> {
        let category = category.trim();
        if category.is_empty() {
            return Err(Error::validation("category must not be empty"));
        }
        if guild_id.trim().is_empty() {
            return Err(Error::validation("guild id must not be empty"));
        }

        let _guard = self.write_lock.lock().await;
        let mut settings = self.read().await?;
        // A malformed entry is replaced by fresh settings.
        let entry = settings.guilds.entry(guild_id.to_string()).or_default();
        let mut guild = entry.settings().cloned().unwrap_or_default();
        guild.channel_id = Some(channel_id);
        guild.category_name = Some(category.to_string());
        *entry = GuildEntry::Valid(guild);
        self.write(&settings).await?;

        Ok(Destination::new(guild_id, category, channel_id))
    }

    /// Reset the settings of a guild. Returns `false` if it had none.
    pub async fn remove_destination(&self, guild_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut settings = self.read().await?;
        if settings.guilds.remove(guild_id).is_none() {
            return Ok(false);
        }
        self.write(&settings).await?;
        Ok(true)
    }

    async fn write(&self, settings: &Settings) -> Result<()> {
        let path = self.path.clone();
        let settings = settings.clone();
        tokio::task::spawn_blocking(move || fs::atomic_write_json(&path, &settings))
            .await
            .map_err(|e| Error::Other(format!("settings write task failed: {e}")))?
    }
}

#[async_trait]
impl DestinationSource for SettingsStore {
    /// Unlike [`SettingsStore::load`], a corrupt file is an error here.
    async fn destinations(&self) -> Result<Vec<Destination>> {
        Ok(self.read().await?.destinations())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn store_with(contents: &str) -> (tempfile::TempDir, SettingsStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, contents).unwrap();
        (dir, SettingsStore::new(path))
    }

    #[tokio::test]
    async fn reads_destinations_and_skips_incomplete_guilds() {
        let (_dir, store) = store_with(
            r#"{
                "dev_mode": false,
                "guilds": {
                    "1": {"channel_id": 100, "category_name": "Foo"},
                    "2": {"channel_id": 200},
                    "3": {"category_name": "Bar"},
                    "4": {},
                    "5": {"channel_id": "<#500>", "category_name": " Baz ", "allowed_role": 9}
                }
            }"#,
        );

        let destinations = store.destinations().await.unwrap();

        assert_eq!(
            destinations,
            vec![
                Destination::new("1", "Foo", 100),
                Destination::new("5", "Baz", 500),
            ]
        );
    }

    #[rstest]
    #[case::missing(None)]
    #[case::empty(Some(""))]
    #[tokio::test]
    async fn absent_settings_mean_no_destinations(#[case] contents: Option<&str>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        if let Some(contents) = contents {
            std::fs::write(&path, contents).unwrap();
        }
        let store = SettingsStore::new(path);

        assert!(store.destinations().await.unwrap().is_empty());
    }

    #[rstest]
    #[case::category_not_a_string(r#"{"channel_id": 200, "category_name": 5}"#)]
    #[case::negative_channel(r#"{"channel_id": -1, "category_name": "Bar"}"#)]
    #[case::fractional_channel(r#"{"channel_id": 1.5, "category_name": "Bar"}"#)]
    #[case::null_guild("null")]
    #[tokio::test]
    async fn malformed_guild_does_not_hide_the_others(#[case] guild: &str) {
        let (_dir, store) = store_with(&format!(
            r#"{{"guilds": {{"1": {{"channel_id": 100, "category_name": "Foo"}}, "2": {guild}}}}}"#
        ));

        let destinations = store.destinations().await.unwrap();

        assert_eq!(destinations, vec![Destination::new("1", "Foo", 100)]);
        assert!(matches!(
            store.load().await.guilds["2"],
            GuildEntry::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn malformed_guild_survives_unrelated_writes() {
        let (_dir, store) =
            store_with(r#"{"guilds": {"2": {"channel_id": 200, "category_name": 5}}}"#);

        store.set_destination("1", 100, "Foo").await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["guilds"]["2"]["category_name"], 5);
        assert_eq!(raw["guilds"]["1"]["channel_id"], 100);
    }

    #[tokio::test]
    async fn set_destination_repairs_a_malformed_guild() {
        let (_dir, store) =
            store_with(r#"{"guilds": {"2": {"channel_id": 200, "category_name": 5}}}"#);

        store.set_destination("2", 300, "Bar").await.unwrap();

        assert_eq!(
            store.destinations().await.unwrap(),
            vec![Destination::new("2", "Bar", 300)]
        );
    }

    #[tokio::test]
    async fn corrupt_settings_load_empty_but_fail_destinations() {
        let (_dir, store) = store_with("{not json");

        assert_eq!(store.load().await, Settings::default());
        assert!(matches!(
            store.destinations().await,
            Err(Error::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn set_destination_preserves_other_fields() {
        let (_dir, store) = store_with(
            r#"{"dev_mode": true, "owner": "x", "guilds": {"1": {"allowed_role": 7, "note": "keep"}}}"#,
        );

        let dest = store.set_destination("1", 42, "Foo").await.unwrap();
        assert_eq!(dest, Destination::new("1", "Foo", 42));

        let settings = store.load().await;
        assert!(settings.dev_mode);
        assert_eq!(settings.extra.get("owner"), Some(&serde_json::json!("x")));
        let guild = settings.guilds["1"].settings().unwrap();
        assert_eq!(guild.channel_id, Some(42));
        assert_eq!(guild.category_name.as_deref(), Some("Foo"));
        assert_eq!(guild.allowed_role, Some(7));
        assert_eq!(guild.extra.get("note"), Some(&serde_json::json!("keep")));
    }

    #[tokio::test]
    async fn set_destination_refuses_to_clobber_a_corrupt_file() {
        let (_dir, store) = store_with("{oops");
        assert!(store.set_destination("1", 42, "Foo").await.is_err());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{oops");
    }

    #[tokio::test]
    async fn set_destination_validates_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        assert!(matches!(
            store.set_destination("1", 42, "  ").await,
            Err(Error::Validation(_))
        ));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn remove_destination() {
        let (_dir, store) =
            store_with(r#"{"guilds": {"1": {"channel_id": 1, "category_name": "Foo"}}}"#);

        assert!(store.remove_destination("1").await.unwrap());
        assert!(!store.remove_destination("1").await.unwrap());
        assert!(store.destinations().await.unwrap().is_empty());
    }

    #[rstest]
    #[case("123", Some(123))]
    #[case("<#123>", Some(123))]
    #[case("general", None)]
    #[case("99999999999999999999999", None)]
    fn snowflake_parsing(#[case] input: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_snowflake(input), expected);
    }
}
