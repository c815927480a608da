//! Live stream source.

use async_trait::async_trait;
use twitch_api::{HelixClient, LiveStream, StreamerProfile};

/// Where live streams come from.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Resolve a category name to its id. `Ok(None)` means it does not exist.
    async fn resolve_category(&self, name: &str) -> twitch_api::Result<Option<String>>;

    /// Every stream currently live in a category. An empty list is a valid
    /// answer; errors must never be reported as an empty list.
    async fn live_streams(&self, category_id: &str) -> twitch_api::Result<Vec<LiveStream>>;

    /// Best-effort profile metadata.
    async fn streamer_profile(&self, user_id: &str) -> StreamerProfile;
}

#[async_trait]
impl StreamSource for HelixClient {
    async fn resolve_category(&self, name: &str) -> twitch_api::Result<Option<String>> {
        Ok(HelixClient::resolve_category(self, name)
            .await?
            .map(|category| category.id))
    }

    async fn live_streams(&self, category_id: &str) -> twitch_api::Result<Vec<LiveStream>> {
        self.list_live_streams(category_id).await
    }

    async fn streamer_profile(&self, user_id: &str) -> StreamerProfile {
        HelixClient::streamer_profile(self, user_id).await
    }
}
