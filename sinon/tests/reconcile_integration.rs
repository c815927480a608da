//! End-to-end tests of the polling loop.
//!
//! A scripted stream source and an in-memory channel stand in for Twitch and
//! Discord; destinations come from a real settings file.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use twitch_api::{LiveStream, StreamerProfile};

use sinon::config::{DestinationSource, SettingsStore};
use sinon::domain::{ChannelId, Destination};
use sinon::metrics::StatsCollector;
use sinon::monitor::{ReconcileOutcome, StreamReconciler, StreamSource};
use sinon::notification::{
    ChannelHandle, DeliveryResult, EmbedRenderer, MessageHandle, Notification,
    NotificationChannel,
};
use sinon::scheduler::{Scheduler, SchedulerConfig, SchedulerControl};

/// Category "Foo" whose live set the test controls.
#[derive(Default)]
struct ScriptedSource {
    live: Mutex<Vec<LiveStream>>,
}

impl ScriptedSource {
    fn set_live(&self, streams: &[(&str, u64)]) {
        *self.live.lock() = streams
            .iter()
            .map(|(id, viewers)| LiveStream {
                id: id.to_string(),
                user_id: format!("user-{id}"),
                user_login: format!("login{id}"),
                user_name: format!("Streamer {id}"),
                game_name: "Foo".to_string(),
                title: format!("Stream {id}"),
                viewer_count: *viewers,
                ..Default::default()
            })
            .collect();
    }
}

#[async_trait]
impl StreamSource for ScriptedSource {
    async fn resolve_category(&self, name: &str) -> twitch_api::Result<Option<String>> {
        Ok((name == "Foo").then(|| "100".to_string()))
    }

    async fn live_streams(&self, _category_id: &str) -> twitch_api::Result<Vec<LiveStream>> {
        Ok(self.live.lock().clone())
    }

    async fn streamer_profile(&self, _user_id: &str) -> StreamerProfile {
        StreamerProfile::default()
    }
}

/// Keeps the messages currently visible in each channel.
#[derive(Default)]
struct MemoryChannel {
    next_id: AtomicU64,
    messages: Mutex<BTreeMap<u64, (ChannelId, Notification)>>,
    purges: AtomicUsize,
}

impl MemoryChannel {
    /// Embed titles visible in `channel`, in posting order.
    fn titles(&self, channel: u64) -> Vec<String> {
        self.messages
            .lock()
            .values()
            .filter(|(c, _)| *c == ChannelId(channel))
            .filter_map(|(_, n)| n.embed().and_then(|e| e.title.clone()))
            .collect()
    }

    fn field(&self, channel: u64, title: &str, field: &str) -> Option<String> {
        self.messages
            .lock()
            .values()
            .filter(|(c, _)| *c == ChannelId(channel))
            .filter_map(|(_, n)| n.embed())
            .find(|e| e.title.as_deref() == Some(title))
            .and_then(|e| e.field(field).map(str::to_string))
    }
}

#[async_trait]
impl NotificationChannel for MemoryChannel {
    async fn resolve_channel(&self, channel_id: ChannelId) -> DeliveryResult<ChannelHandle> {
        Ok(ChannelHandle { channel_id })
    }

    async fn send(
        &self,
        channel: &ChannelHandle,
        notification: &Notification,
    ) -> DeliveryResult<MessageHandle> {
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.messages
            .lock()
            .insert(message_id, (channel.channel_id, notification.clone()));
        Ok(MessageHandle {
            channel_id: channel.channel_id,
            message_id,
        })
    }

    async fn edit(
        &self,
        message: &MessageHandle,
        notification: &Notification,
    ) -> DeliveryResult<()> {
        match self.messages.lock().get_mut(&message.message_id) {
            Some(entry) => {
                entry.1 = notification.clone();
                Ok(())
            }
            None => Err(sinon::notification::DeliveryError::NotFound),
        }
    }

    async fn delete(&self, message: &MessageHandle) -> DeliveryResult<()> {
        match self.messages.lock().remove(&message.message_id) {
            Some(_) => Ok(()),
            None => Err(sinon::notification::DeliveryError::NotFound),
        }
    }

    async fn purge_own_messages(&self, channel: &ChannelHandle) -> DeliveryResult<usize> {
        self.purges.fetch_add(1, Ordering::SeqCst);
        let mut messages = self.messages.lock();
        let before = messages.len();
        messages.retain(|_, (c, _)| *c != channel.channel_id);
        Ok(before - messages.len())
    }
}

struct Harness {
    source: Arc<ScriptedSource>,
    channel: Arc<MemoryChannel>,
    reconciler: Arc<StreamReconciler>,
    control: Arc<SchedulerControl>,
}

impl Harness {
    fn new() -> Self {
        let source = Arc::new(ScriptedSource::default());
        let channel = Arc::new(MemoryChannel::default());
        let reconciler = Arc::new(StreamReconciler::new(
            source.clone(),
            channel.clone(),
            EmbedRenderer::default(),
            Arc::new(StatsCollector::new()),
        ));
        Self {
            source,
            channel,
            reconciler,
            control: Arc::new(SchedulerControl::new()),
        }
    }

    fn scheduler(
        &self,
        destinations: Arc<dyn DestinationSource>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Scheduler {
        Scheduler::new(
            self.reconciler.clone(),
            destinations,
            config,
            self.control.clone(),
            cancel,
        )
    }
}

fn settings_file(dir: &tempfile::TempDir, contents: &str) -> Arc<SettingsStore> {
    let path = dir.path().join("settings.json");
    std::fs::write(&path, contents).unwrap();
    Arc::new(SettingsStore::new(path))
}

#[tokio::test]
async fn notifications_follow_the_live_set() {
    let dir = tempfile::tempdir().unwrap();
    let store = settings_file(
        &dir,
        r#"{"guilds": {"1": {"channel_id": 10, "category_name": "Foo"}}}"#,
    );
    let harness = Harness::new();
    let scheduler = harness.scheduler(
        store,
        SchedulerConfig::default(),
        CancellationToken::new(),
    );

    // Nothing live: a single sentinel, not repeated.
    scheduler.run_pass().await.unwrap();
    scheduler.run_pass().await.unwrap();
    assert_eq!(harness.channel.titles(10), vec!["No live streams"]);

    // Two streams go live: sentinel replaced by one notification each.
    harness.source.set_live(&[("a", 10), ("b", 20)]);
    scheduler.run_pass().await.unwrap();
    assert_eq!(harness.channel.titles(10), vec!["Stream a", "Stream b"]);

    // Viewers move: notifications are edited in place, max never drops.
    harness.source.set_live(&[("a", 50), ("b", 5)]);
    scheduler.run_pass().await.unwrap();
    assert_eq!(harness.channel.titles(10), vec!["Stream a", "Stream b"]);
    assert_eq!(harness.channel.field(10, "Stream a", "Max Viewers").as_deref(), Some("50"));
    assert_eq!(harness.channel.field(10, "Stream b", "Viewers").as_deref(), Some("5"));
    assert_eq!(harness.channel.field(10, "Stream b", "Max Viewers").as_deref(), Some("20"));

    // One ends.
    harness.source.set_live(&[("b", 7)]);
    scheduler.run_pass().await.unwrap();
    assert_eq!(harness.channel.titles(10), vec!["Stream b"]);

    // All end: back to a single sentinel.
    harness.source.set_live(&[]);
    let results = scheduler.run_pass().await.unwrap();
    assert_eq!(harness.channel.titles(10), vec!["No live streams"]);
    match &results[0].1 {
        ReconcileOutcome::Completed(report) => {
            assert_eq!(report.deleted, 1);
            assert_eq!(report.sent, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let stats = harness.reconciler.stats().snapshot();
    assert_eq!(stats.passes, 6);
    assert_eq!(stats.cycles_completed, 6);
}

#[tokio::test]
async fn destinations_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let store = settings_file(
        &dir,
        r#"{"guilds": {
            "1": {"channel_id": 10, "category_name": "Foo"},
            "2": {"channel_id": 20, "category_name": "Nope"}
        }}"#,
    );
    let harness = Harness::new();
    harness.source.set_live(&[("a", 1)]);
    let scheduler = harness.scheduler(
        store,
        SchedulerConfig::default(),
        CancellationToken::new(),
    );

    scheduler.run_pass().await.unwrap();
    scheduler.run_pass().await.unwrap();

    assert_eq!(harness.channel.titles(10), vec!["Stream a"]);
    // The unknown category is reported once.
    assert_eq!(harness.channel.titles(20), vec!["Category not found"]);
}

#[tokio::test]
async fn corrupt_settings_skip_the_pass_without_dropping_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = settings_file(
        &dir,
        r#"{"guilds": {"1": {"channel_id": 10, "category_name": "Foo"}}}"#,
    );
    let harness = Harness::new();
    harness.source.set_live(&[("a", 1)]);
    let scheduler = harness.scheduler(
        store.clone(),
        SchedulerConfig::default(),
        CancellationToken::new(),
    );

    scheduler.run_pass().await.unwrap();
    assert_eq!(harness.reconciler.snapshot().len(), 1);

    std::fs::write(store.path(), "{broken").unwrap();
    assert!(scheduler.run_pass().await.is_none());
    assert_eq!(harness.reconciler.snapshot().len(), 1);
    assert_eq!(harness.channel.titles(10), vec!["Stream a"]);

    // Removing the destination drops its state on the next pass.
    std::fs::write(store.path(), r#"{"guilds": {}}"#).unwrap();
    assert!(scheduler.run_pass().await.unwrap().is_empty());
    assert!(harness.reconciler.snapshot().is_empty());
}

#[tokio::test]
async fn startup_purge_clears_previous_messages() {
    let harness = Harness::new();
    let destinations: Arc<dyn DestinationSource> = Arc::new(vec![Destination::new("1", "Foo", 10)]);
    harness.channel.messages.lock().insert(
        999,
        (ChannelId(10), EmbedRenderer::default().no_streams("Foo")),
    );

    let scheduler = harness.scheduler(
        destinations,
        SchedulerConfig::default(),
        CancellationToken::new(),
    );

    assert_eq!(scheduler.purge_previous_messages().await, 1);
    assert_eq!(harness.channel.purges.load(Ordering::SeqCst), 1);
    assert!(harness.channel.titles(10).is_empty());
}

#[tokio::test]
async fn pause_stops_passes_until_resumed() {
    let harness = Harness::new();
    let destinations: Arc<dyn DestinationSource> = Arc::new(vec![Destination::new("1", "Foo", 10)]);
    let cancel = CancellationToken::new();
    let scheduler = harness.scheduler(
        destinations,
        SchedulerConfig {
            check_interval: Duration::from_millis(50),
            purge_on_startup: true,
        },
        cancel.clone(),
    );
    let stats = harness.reconciler.stats().clone();
    let task = tokio::spawn(scheduler.run());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(stats.passes() >= 1);
    assert_eq!(harness.channel.purges.load(Ordering::SeqCst), 1);

    harness.control.pause();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let paused_at = stats.passes();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(stats.passes(), paused_at);

    harness.control.resume();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(stats.passes() > paused_at);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}
