use std::sync::Arc;

use anyhow::Context;
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use sinon::api::{ApiServer, AppState};
use sinon::config::{AppConfig, SettingsStore};
use sinon::logging::init_logging;
use sinon::metrics::StatsCollector;
use sinon::monitor::StreamReconciler;
use sinon::notification::{DiscordChannel, DiscordConfig, EmbedRenderer};
use sinon::scheduler::{Scheduler, SchedulerConfig, SchedulerControl};
use twitch_api::{HelixClient, HelixClientConfig};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let (logging_config, _log_guard) = init_logging(&config.log_dir)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Sinon");
    info!(?config, "Configuration loaded");

    let twitch = HelixClient::new(HelixClientConfig {
        client_id: config.twitch_client_id.clone(),
        client_secret: config.twitch_client_secret.clone(),
        access_token: config.twitch_access_token.clone(),
        ..Default::default()
    })
    .context("Failed to create Twitch client")?;

    let discord = DiscordChannel::new(DiscordConfig::with_token(config.discord_token.clone()))
        .map_err(|e| anyhow::anyhow!("Failed to create Discord client: {e}"))?;

    let stats = Arc::new(StatsCollector::new());
    let reconciler = Arc::new(StreamReconciler::new(
        Arc::new(twitch),
        Arc::new(discord),
        EmbedRenderer::new(config.embed_footer.clone()),
        stats,
    ));
    let settings = Arc::new(SettingsStore::new(config.settings_path.clone()));
    let control = Arc::new(SchedulerControl::new());
    let cancel_token = CancellationToken::new();

    logging_config.start_retention_cleanup(cancel_token.child_token());

    let scheduler = Scheduler::new(
        Arc::clone(&reconciler),
        settings.clone(),
        SchedulerConfig {
            check_interval: config.check_interval,
            purge_on_startup: config.purge_on_startup,
        },
        Arc::clone(&control),
        cancel_token.child_token(),
    );
    let scheduler_task = tokio::spawn(scheduler.run());

    let state = AppState::new(reconciler, settings, control).with_logging_config(logging_config);
    let server = ApiServer::new(config.api.clone(), state, cancel_token.child_token());
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "API server failed");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    cancel_token.cancel();

    let _ = tokio::join!(scheduler_task, server_task);
    info!("Sinon stopped");

    Ok(())
}
