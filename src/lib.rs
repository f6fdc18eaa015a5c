pub mod api;
pub mod beacon;
pub mod credentials;
pub mod feed;
pub mod interactions;
pub mod models;
pub mod realtime;
pub mod settings;
pub mod telemetry;
pub mod utils;

#[cfg(test)]
mod test_support;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::broadcast;

pub use api::{FeedApi, HttpFeedApi};
pub use beacon::Beacon;
pub use credentials::{Credentials, TokenFactory};
pub use feed::{FeedController, FeedMode, FeedStore, Seed};
pub use interactions::{InteractionError, InteractionEvent, InteractionReconciler};
pub use models::{ActionKind, FeedItem, ItemId};
pub use realtime::{ChannelEvent, ConnectionState, RealtimeChannel};
pub use settings::{FeedSettings, SettingsStore};
pub use telemetry::ViewTelemetryCollector;
pub use utils::init_logging;

/// Inputs for one headless feed session.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub settings_path: PathBuf,
    pub mode: FeedMode,
    pub seed: Option<ItemId>,
    pub token: Option<String>,
}

/// Drive one feed session until Ctrl-C: connect, load the first batch, play the
/// first item, then flush everything through the unload path.
pub async fn run(options: RunOptions) -> Result<()> {
    init_logging();
    info!("reelfeed starting up...");

    let settings = SettingsStore::new(options.settings_path)?.current();
    let api: Arc<dyn FeedApi> = Arc::new(HttpFeedApi::new(&settings)?);
    let beacon = Beacon::new(
        Arc::new(HttpFeedApi::new(&settings)?),
        settings.request_timeout(),
    )?;
    let credentials = options
        .token
        .map(Credentials::with_token)
        .unwrap_or_default();
    if !credentials.is_authenticated() {
        warn!("No viewer token; likes and saves will be rejected");
    }

    let feed = FeedController::new(settings, options.mode, api, credentials, Some(beacon));

    let mut state = feed.channel().watch_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            info!("Realtime channel {:?}", *state.borrow());
        }
    });
    let mut events = feed.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!("Interaction: {event:?}"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Interaction log skipped {skipped} events")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    feed.channel()
        .connect()
        .await
        .context("failed to start realtime channel")?;

    let added = feed.initialize(options.seed.map(Seed::Id)).await;
    info!("Feed initialized with {added} items");

    if let Some(first) = feed.items().first() {
        feed.activate(&first.id).await;
        info!("Playing item {}", first.id);
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("Shutting down...");
    feed.on_unload();
    feed.shutdown().await;
    Ok(())
}
