use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    api::FeedApi,
    beacon::Beacon,
    credentials::Credentials,
    feed::FeedStore,
    models::ItemId,
    settings::FeedSettings,
};

use super::state::{TelemetryReport, Thresholds, WatchSession, WatchSnapshot};

// Set to true to log every poll and every delivered report
const ENABLE_LOGS: bool = false;

use crate::{log_debug, log_info};

/// Tracks watch time per active item and reports it to the backend.
///
/// Each session owns a cancellation token for its poll task, so removing the
/// session from the map and finishing it tears down every timer it started.
#[derive(Clone)]
pub struct ViewTelemetryCollector {
    sessions: Arc<Mutex<HashMap<ItemId, WatchSession>>>,
    api: Arc<dyn FeedApi>,
    credentials: Credentials,
    store: FeedStore,
    thresholds: Thresholds,
    tick_interval: Duration,
    request_timeout: Duration,
    beacon: Option<Beacon>,
}

impl ViewTelemetryCollector {
    pub fn new(
        store: FeedStore,
        api: Arc<dyn FeedApi>,
        credentials: Credentials,
        settings: &FeedSettings,
        beacon: Option<Beacon>,
    ) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            api,
            credentials,
            store,
            thresholds: Thresholds::from(settings),
            tick_interval: settings.tick_interval(),
            request_timeout: settings.request_timeout(),
            beacon,
        }
    }

    /// Start a fresh session for `item_id`, flushing any session it replaces.
    pub async fn activate(&self, item_id: &ItemId) {
        if let Some(report) = self.start(item_id) {
            self.deliver(report).await;
        }
    }

    /// Begin watching `item_id` and start its poll task. Returns the final
    /// report of a session it replaced, left for the caller to deliver.
    pub fn start(&self, item_id: &ItemId) -> Option<TelemetryReport> {
        let now = Instant::now();
        let cancel = CancellationToken::new();
        let replaced = {
            let mut sessions = self.sessions.lock();
            let replaced = sessions
                .remove(item_id)
                .and_then(|mut previous| previous.finish(now));

            let mut session = WatchSession::new(item_id.clone(), self.thresholds);
            session.attach_ticker(cancel.clone());
            session.resume(now);
            sessions.insert(item_id.clone(), session);
            replaced
        };
        self.spawn_ticker(item_id.clone(), cancel);
        replaced
    }

    /// Remove the session for `item_id` and return its final report unsent.
    pub fn finish(&self, item_id: &ItemId) -> Option<TelemetryReport> {
        self.sessions
            .lock()
            .remove(item_id)
            .and_then(|mut session| session.finish(Instant::now()))
    }

    pub fn on_play(&self, item_id: &ItemId) -> bool {
        self.sessions
            .lock()
            .get_mut(item_id)
            .map(|session| session.resume(Instant::now()))
            .unwrap_or(false)
    }

    pub async fn on_pause(&self, item_id: &ItemId) {
        let report = self
            .sessions
            .lock()
            .get_mut(item_id)
            .and_then(|session| session.pause(Instant::now()));
        if let Some(report) = report {
            self.deliver(report).await;
        }
    }

    /// Playback position update. Readings without a usable duration are ignored.
    pub async fn on_progress(&self, item_id: &ItemId, position_secs: f64, duration_secs: f64) {
        if !(duration_secs.is_finite() && duration_secs > 0.0) {
            return;
        }
        let percent = (position_secs / duration_secs * 100.0).clamp(0.0, 100.0);
        let report = self
            .sessions
            .lock()
            .get_mut(item_id)
            .and_then(|session| session.on_progress(percent, Instant::now()));
        if let Some(report) = report {
            self.deliver(report).await;
        }
    }

    /// Tear down the session for `item_id`, sending its final report.
    pub async fn deactivate(&self, item_id: &ItemId) {
        if let Some(report) = self.finish(item_id) {
            self.deliver(report).await;
        }
    }

    pub async fn shutdown(&self) {
        for report in self.drain() {
            self.deliver(report).await;
        }
    }

    /// Flush every session without waiting on the network. Reports go to the
    /// beacon worker when one is configured, otherwise to detached tasks.
    pub fn on_unload(&self) {
        let reports = self.drain();
        if reports.is_empty() {
            return;
        }
        let token = self.credentials.token();

        for report in reports {
            match &self.beacon {
                Some(beacon) => {
                    if let Err(err) = beacon.send(report.report, token.clone()) {
                        log::warn!("Dropping unload report: {err:#}");
                    }
                }
                None => self.deliver_detached(report),
            }
        }
    }

    /// Send `report` from a background task so the caller never waits on it.
    pub fn deliver_detached(&self, report: TelemetryReport) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let collector = self.clone();
                handle.spawn(async move { collector.deliver(report).await });
            }
            Err(_) => {
                log::warn!(
                    "No runtime to deliver report for item {}",
                    report.report.item_id
                );
            }
        }
    }

    pub fn snapshot(&self, item_id: &ItemId) -> Option<WatchSnapshot> {
        self.sessions
            .lock()
            .get(item_id)
            .map(|session| session.snapshot(Instant::now()))
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    fn drain(&self) -> Vec<TelemetryReport> {
        let now = Instant::now();
        self.sessions
            .lock()
            .drain()
            .filter_map(|(_, mut session)| session.finish(now))
            .collect()
    }

    fn spawn_ticker(&self, item_id: ItemId, cancel: CancellationToken) {
        let collector = self.clone();
        tokio::spawn(async move {
            let start = Instant::now() + collector.tick_interval;
            let mut interval = time::interval_at(start, collector.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let report = {
                    let mut sessions = collector.sessions.lock();
                    if cancel.is_cancelled() {
                        break;
                    }
                    match sessions.get_mut(&item_id) {
                        Some(session) => session.tick(Instant::now()),
                        None => break,
                    }
                };

                if let Some(report) = report {
                    collector.deliver(report).await;
                }
            }
            log_debug!("Watch ticker for item {item_id} stopped");
        });
    }

    /// Send one report. Failures are logged and dropped; watch reports are
    /// analytics, never retried.
    async fn deliver(&self, report: TelemetryReport) {
        let token = self.credentials.token();
        let item_id = report.report.item_id.clone();
        let sent = time::timeout(
            self.request_timeout,
            self.api.report_watch(&report.report, token.as_deref()),
        )
        .await;

        match sent {
            Ok(Ok(response)) => {
                log_info!(
                    "{:?} report for item {item_id}: {}s, new view: {}",
                    report.kind,
                    report.report.watched_seconds,
                    response.is_new_view
                );
                self.store.update_item(&item_id, |item| {
                    item.counters.view_count = response.total_views;
                });
            }
            Ok(Err(err)) => {
                log::warn!(
                    "{:?} report for item {item_id} failed: {err:#}",
                    report.kind
                );
            }
            Err(_) => {
                log::warn!("{:?} report for item {item_id} timed out", report.kind);
            }
        }
    }
}
