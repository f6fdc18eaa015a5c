use std::{future::Future, sync::Arc};

use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use tokio::{
    sync::{broadcast, Mutex},
    time,
};

use crate::{
    api::FeedApi,
    beacon::Beacon,
    credentials::Credentials,
    interactions::{InteractionError, InteractionEvent, InteractionReconciler, ToggleOutcome},
    models::{FeedItem, ItemId, PageRequest, RecommendationRequest},
    realtime::{ChannelEvent, ItemSubscription, RealtimeChannel},
    settings::FeedSettings,
    telemetry::ViewTelemetryCollector,
};

use super::state::{FeedMode, FeedState, FeedStore, FetchTicket};

/// What `initialize` starts from.
#[derive(Debug, Clone)]
pub enum Seed {
    /// A full item already in hand; shown first without a fetch.
    Item(FeedItem),
    /// Only the id is known; the item is fetched before recommendations.
    Id(ItemId),
}

#[derive(Debug, Clone)]
enum FetchRequest {
    Recommendations(RecommendationRequest),
    Page(PageRequest),
}

impl FetchRequest {
    /// Next request for the state's mode: recommendations excluding every id
    /// delivered this epoch, or the next page.
    fn next(state: &FeedState, page_size: u32) -> Self {
        match (&state.mode, state.mode.source()) {
            (_, Some(source)) => FetchRequest::Recommendations(RecommendationRequest {
                excluded_ids: state.excluded_ids(),
                page_size,
                source,
            }),
            (mode, None) => FetchRequest::Page(PageRequest {
                page: state.page + 1,
                page_size,
                playlist: match mode {
                    FeedMode::Playlist { key } => key.clone(),
                    _ => None,
                },
            }),
        }
    }
}

struct ActiveItem {
    item_id: ItemId,
    // Dropping the subscription leaves the item's group.
    _subscription: ItemSubscription,
}

/// Top-level orchestrator: owns the item list and composes telemetry, the
/// interaction reconciler and the realtime subscription for the active item.
#[derive(Clone)]
pub struct FeedController {
    store: FeedStore,
    api: Arc<dyn FeedApi>,
    settings: FeedSettings,
    reconciler: InteractionReconciler,
    telemetry: ViewTelemetryCollector,
    channel: RealtimeChannel,
    active: Arc<Mutex<Option<ActiveItem>>>,
}

impl FeedController {
    pub fn new(
        settings: FeedSettings,
        mode: FeedMode,
        api: Arc<dyn FeedApi>,
        credentials: Credentials,
        beacon: Option<Beacon>,
    ) -> Self {
        let store = FeedStore::new(mode);
        let reconciler = InteractionReconciler::new(
            store.clone(),
            api.clone(),
            credentials.clone(),
            settings.request_timeout(),
        );
        let telemetry = ViewTelemetryCollector::new(
            store.clone(),
            api.clone(),
            credentials.clone(),
            &settings,
            beacon,
        );
        let channel = RealtimeChannel::new(&settings, credentials.token_factory());

        Self {
            store,
            api,
            settings,
            reconciler,
            telemetry,
            channel,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn store(&self) -> &FeedStore {
        &self.store
    }

    pub fn reconciler(&self) -> &InteractionReconciler {
        &self.reconciler
    }

    pub fn telemetry(&self) -> &ViewTelemetryCollector {
        &self.telemetry
    }

    pub fn channel(&self) -> &RealtimeChannel {
        &self.channel
    }

    pub fn items(&self) -> Vec<FeedItem> {
        self.store.items()
    }

    pub fn has_more(&self) -> bool {
        self.store.read(|state| state.has_more)
    }

    pub fn is_loading(&self) -> bool {
        self.store.read(FeedState::is_loading)
    }

    pub fn mode(&self) -> FeedMode {
        self.store.read(|state| state.mode.clone())
    }

    /// Start a new epoch, optionally headed by `seed`. On any fetch failure the
    /// list is left as far as it got and the loading flag is cleared.
    pub async fn initialize(&self, seed: Option<Seed>) -> usize {
        let Some(ticket) = self.store.update(FeedState::begin_reload) else {
            debug!("initialize dropped: a fetch is already running");
            return 0;
        };

        let seed = match seed {
            None => None,
            Some(Seed::Item(item)) => Some(item),
            Some(Seed::Id(item_id)) => {
                match self.bounded(self.api.fetch_item(&item_id)).await {
                    Ok(item) => Some(item),
                    Err(err) => {
                        error!("Failed to fetch seed item {item_id}: {err:#}");
                        self.store.update(|state| state.finish_fetch(ticket));
                        return 0;
                    }
                }
            }
        };
        let seed_id = seed.as_ref().map(|item| item.id.clone());

        let request = self.store.update(|state| {
            if !state.is_current(ticket) {
                return None;
            }
            if let Some(item) = seed {
                state.place_seed(item);
            }
            Some(FetchRequest::next(state, self.settings.page_size))
        });
        let Some(request) = request else {
            debug!("initialize superseded before the first batch was requested");
            return 0;
        };

        let added = self.run_fetch(ticket, request).await;

        if let Some(seed_id) = seed_id {
            // Push events may have refreshed the seed while the batch was in flight.
            self.store.update(|state| {
                if state.is_current(ticket) {
                    if let Some(fresh) = state.item(&seed_id).cloned() {
                        state.place_seed(fresh);
                    }
                }
            });
        }
        added
    }

    /// Fetch the next batch. Dropped when a fetch is running or the feed is
    /// exhausted. Returns the number of items appended.
    pub async fn load_more(&self) -> usize {
        let page_size = self.settings.page_size;
        let next = self.store.update(|state| {
            if !state.has_more {
                return None;
            }
            let ticket = state.begin_fetch()?;
            Some((ticket, FetchRequest::next(state, page_size)))
        });

        match next {
            Some((ticket, request)) => self.run_fetch(ticket, request).await,
            None => 0,
        }
    }

    /// Clear the list and exclusion set and fetch a fresh first batch.
    pub async fn reload(&self) -> usize {
        let page_size = self.settings.page_size;
        let next = self.store.update(|state| {
            let ticket = state.begin_reload()?;
            Some((ticket, FetchRequest::next(state, page_size)))
        });

        match next {
            Some((ticket, request)) => self.run_fetch(ticket, request).await,
            None => {
                debug!("reload dropped: a fetch is already running");
                0
            }
        }
    }

    /// Apply an externally selected mode. Reloads exactly once per actual change.
    pub async fn set_mode(&self, mode: FeedMode) -> bool {
        let page_size = self.settings.page_size;
        let next = self.store.update(|state| {
            let ticket = state.switch_mode(mode)?;
            Some((ticket, FetchRequest::next(state, page_size)))
        });

        match next {
            Some((ticket, request)) => {
                info!("Feed mode switched to {:?}", self.mode());
                self.run_fetch(ticket, request).await;
                true
            }
            None => false,
        }
    }

    async fn run_fetch(&self, ticket: FetchTicket, request: FetchRequest) -> usize {
        let fetched = match &request {
            FetchRequest::Recommendations(request) => {
                self.bounded(self.api.fetch_recommendations(request)).await
            }
            FetchRequest::Page(request) => self.bounded(self.api.fetch_page(request)).await,
        };

        let page_size = self.settings.page_size as usize;
        let min_new_items = self.settings.min_new_items;
        self.store.update(|state| {
            state.finish_fetch(ticket);
            if !state.is_current(ticket) {
                debug!("Discarding batch from superseded epoch {}", ticket.epoch);
                return 0;
            }

            let batch = match fetched {
                Ok(batch) => batch,
                Err(err) => {
                    error!("Feed fetch failed: {err:#}");
                    return 0;
                }
            };

            match request {
                FetchRequest::Recommendations(_) => {
                    let added = state.append_unique(batch);
                    if added < min_new_items {
                        info!("Recommendations exhausted after {} items", state.items().len());
                        state.has_more = false;
                    }
                    added
                }
                FetchRequest::Page(request) => {
                    let received = batch.len();
                    state.page = request.page;
                    state.has_more = received >= page_size;
                    state.append_unique(batch)
                }
            }
        })
    }

    async fn bounded<T>(&self, request: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.settings.request_timeout();
        time::timeout(limit, request)
            .await
            .map_err(|_| anyhow!("request timed out after {}ms", limit.as_millis()))?
    }

    /// Make `item_id` the playing item: the previous one is flushed and
    /// unsubscribed, then telemetry and push routing attach to the new one.
    /// Final reports are sent in the background once the switch is done.
    pub async fn activate(&self, item_id: &ItemId) -> bool {
        if self.store.item(item_id).is_none() {
            warn!("Cannot activate item {item_id}: not in the feed");
            return false;
        }

        let flushed = {
            let mut active = self.active.lock().await;
            if active.as_ref().is_some_and(|current| &current.item_id == item_id) {
                return true;
            }
            let previous = active
                .take()
                .and_then(|previous| self.telemetry.finish(&previous.item_id));

            let reconciler = self.reconciler.clone();
            let subscription = self.channel.watch_item(
                item_id.clone(),
                Arc::new(move |event: &ChannelEvent| reconciler.apply_event(event)),
            );
            let replaced = self.telemetry.start(item_id);

            *active = Some(ActiveItem {
                item_id: item_id.clone(),
                _subscription: subscription,
            });
            previous.into_iter().chain(replaced)
        };

        for report in flushed {
            self.telemetry.deliver_detached(report);
        }
        true
    }

    pub async fn active_item(&self) -> Option<ItemId> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|current| current.item_id.clone())
    }

    pub async fn deactivate(&self) {
        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            self.telemetry.deactivate(&previous.item_id).await;
        }
    }

    pub async fn on_play(&self) {
        if let Some(item_id) = self.active_item().await {
            self.telemetry.on_play(&item_id);
        }
    }

    pub async fn on_pause(&self) {
        if let Some(item_id) = self.active_item().await {
            self.telemetry.on_pause(&item_id).await;
        }
    }

    pub async fn on_progress(&self, position_secs: f64, duration_secs: f64) {
        if let Some(item_id) = self.active_item().await {
            self.telemetry
                .on_progress(&item_id, position_secs, duration_secs)
                .await;
        }
    }

    pub async fn toggle_like(&self, item_id: &ItemId) -> Result<ToggleOutcome, InteractionError> {
        self.reconciler.toggle_like(item_id).await
    }

    pub async fn toggle_save(&self, item_id: &ItemId) -> Result<ToggleOutcome, InteractionError> {
        self.reconciler.toggle_save(item_id).await
    }

    pub fn events(&self) -> broadcast::Receiver<InteractionEvent> {
        self.reconciler.subscribe_events()
    }

    /// Orderly teardown: final reports are awaited and the channel is closed.
    pub async fn shutdown(&self) {
        self.deactivate().await;
        self.telemetry.shutdown().await;
        if let Err(err) = self.channel.disconnect().await {
            warn!("Realtime channel did not shut down cleanly: {err}");
        }
    }

    /// Abrupt teardown: never waits. Pending reports go through the beacon path.
    pub fn on_unload(&self) {
        self.telemetry.on_unload();
        match self.active.try_lock() {
            Ok(mut active) => {
                active.take();
            }
            Err(_) => warn!("Active item busy during unload; subscription left to channel teardown"),
        }
    }
}
