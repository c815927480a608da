//! Process-level configuration loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::api::ApiServerConfig;
use crate::{Error, Result};

/// Default polling interval (2.5 minutes).
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(150);

/// Shortest accepted polling interval.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(10);

const DEFAULT_SETTINGS_PATH: &str = "settings.json";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_EMBED_FOOTER: &str = "Sinon";

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    pub discord_token: String,
    pub twitch_client_id: String,
    pub twitch_client_secret: String,
    /// Pre-issued app token, used until Twitch rejects it.
    pub twitch_access_token: Option<String>,
    pub settings_path: PathBuf,
    pub check_interval: Duration,
    pub log_dir: String,
    /// Delete the bot's previous messages in every configured channel before
    /// the first pass.
    pub purge_on_startup: bool,
    pub embed_footer: String,
    pub api: ApiServerConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("discord_token", &"<redacted>")
            .field("twitch_client_id", &self.twitch_client_id)
            .field("twitch_client_secret", &"<redacted>")
            .field(
                "twitch_access_token",
                &self.twitch_access_token.as_ref().map(|_| "<redacted>"),
            )
            .field("settings_path", &self.settings_path)
            .field("check_interval", &self.check_interval)
            .field("log_dir", &self.log_dir)
            .field("purge_on_startup", &self.purge_on_startup)
            .field("embed_footer", &self.embed_footer)
            .field("api", &self.api)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration using `lookup` to resolve variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required =
            |key: &str| get(key).ok_or_else(|| Error::config(format!("{key} must be set")));

        let check_interval = match get("CHECK_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|_| {
                    Error::config(format!("CHECK_INTERVAL_SECS is not a number: {raw}"))
                })?;
                let interval = Duration::from_secs(secs);
                if interval < MIN_CHECK_INTERVAL {
                    return Err(Error::config(format!(
                        "CHECK_INTERVAL_SECS must be at least {}",
                        MIN_CHECK_INTERVAL.as_secs()
                    )));
                }
                interval
            }
            None => DEFAULT_CHECK_INTERVAL,
        };

        let purge_on_startup = match get("PURGE_ON_STARTUP") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                Error::config(format!("PURGE_ON_STARTUP is not a boolean: {raw}"))
            })?,
            None => false,
        };

        Ok(Self {
            discord_token: required("DISCORD_TOKEN")?,
            twitch_client_id: required("TWITCH_CLIENT_ID")?,
            twitch_client_secret: required("TWITCH_CLIENT_SECRET")?,
            twitch_access_token: get("TWITCH_ACCESS_TOKEN"),
            settings_path: get("SETTINGS_PATH")
                .unwrap_or_else(|| DEFAULT_SETTINGS_PATH.to_string())
                .into(),
            check_interval,
            log_dir: get("LOG_DIR").unwrap_or_else(|| DEFAULT_LOG_DIR.to_string()),
            purge_on_startup,
            embed_footer: get("EMBED_FOOTER").unwrap_or_else(|| DEFAULT_EMBED_FOOTER.to_string()),
            api: ApiServerConfig::from_lookup(&get),
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
