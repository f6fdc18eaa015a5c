//! Scriptable in-memory backend used by unit tests across the crate.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::{
    api::FeedApi,
    models::{
        ActionKind, FeedItem, ItemId, PageRequest, RecommendationRequest, ToggleLikeResponse,
        ToggleSaveResponse, WatchReport, WatchReportResponse,
    },
};

pub(crate) fn item(id: u64) -> FeedItem {
    FeedItem::new(id)
}

pub(crate) fn items(ids: &[u64]) -> Vec<FeedItem> {
    ids.iter().copied().map(item).collect()
}

pub(crate) fn ids(items: &[FeedItem]) -> Vec<String> {
    items.iter().map(|item| item.id.to_string()).collect()
}

#[derive(Default)]
pub(crate) struct FakeApi {
    pub items: Mutex<HashMap<ItemId, FeedItem>>,
    pub recommendation_batches: Mutex<VecDeque<Result<Vec<FeedItem>>>>,
    pub page_batches: Mutex<VecDeque<Result<Vec<FeedItem>>>>,
    pub recommendation_requests: Mutex<Vec<RecommendationRequest>>,
    pub page_requests: Mutex<Vec<PageRequest>>,
    /// Server-side truth for toggles, keyed by item and kind.
    pub interactions: Mutex<HashMap<(ItemId, ActionKind), (bool, u64)>>,
    pub mutation_calls: Mutex<Vec<(ActionKind, ItemId)>>,
    pub fail_mutations: Mutex<bool>,
    pub reports: Mutex<Vec<WatchReport>>,
    pub fail_reports: Mutex<bool>,
    /// Latency added to every watch report after it is recorded.
    pub report_delay: Mutex<Option<Duration>>,
    /// When set, fetches and mutations wait for a permit before answering.
    pub gate: Option<Arc<Semaphore>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let api = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (api, gate)
    }

    pub fn with_item(self, item: FeedItem) -> Self {
        self.items.lock().insert(item.id.clone(), item);
        self
    }

    pub fn push_recommendations(&self, batch: Vec<FeedItem>) {
        self.recommendation_batches.lock().push_back(Ok(batch));
    }

    pub fn push_recommendation_error(&self) {
        self.recommendation_batches
            .lock()
            .push_back(Err(anyhow!("recommendations unavailable")));
    }

    pub fn push_page(&self, batch: Vec<FeedItem>) {
        self.page_batches.lock().push_back(Ok(batch));
    }

    pub fn set_interaction(&self, id: &ItemId, kind: ActionKind, active: bool, count: u64) {
        self.interactions
            .lock()
            .insert((id.clone(), kind), (active, count));
    }

    pub fn reports(&self) -> Vec<WatchReport> {
        self.reports.lock().clone()
    }

    async fn wait_gate(&self) {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }

    async fn toggle(&self, id: &ItemId, kind: ActionKind) -> Result<(bool, u64)> {
        self.mutation_calls.lock().push((kind, id.clone()));
        self.wait_gate().await;
        if *self.fail_mutations.lock() {
            return Err(anyhow!("mutation rejected"));
        }
        let mut interactions = self.interactions.lock();
        let entry = interactions.entry((id.clone(), kind)).or_insert((false, 0));
        *entry = if entry.0 {
            (false, entry.1.saturating_sub(1))
        } else {
            (true, entry.1 + 1)
        };
        Ok(*entry)
    }
}

#[async_trait]
impl FeedApi for FakeApi {
    async fn fetch_recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> Result<Vec<FeedItem>> {
        self.recommendation_requests.lock().push(request.clone());
        self.wait_gate().await;
        self.recommendation_batches
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<FeedItem>> {
        self.page_requests.lock().push(request.clone());
        self.wait_gate().await;
        self.page_batches
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_item(&self, id: &ItemId) -> Result<FeedItem> {
        self.items
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("item {id} not found"))
    }

    async fn toggle_like(&self, id: &ItemId, _token: &str) -> Result<ToggleLikeResponse> {
        let (liked_by_viewer, like_count) = self.toggle(id, ActionKind::Like).await?;
        Ok(ToggleLikeResponse {
            liked_by_viewer,
            like_count,
        })
    }

    async fn toggle_save(&self, id: &ItemId, _token: &str) -> Result<ToggleSaveResponse> {
        let (saved_by_viewer, save_count) = self.toggle(id, ActionKind::Save).await?;
        Ok(ToggleSaveResponse {
            saved_by_viewer,
            save_count,
        })
    }

    async fn report_watch(
        &self,
        report: &WatchReport,
        _token: Option<&str>,
    ) -> Result<WatchReportResponse> {
        let total_views = {
            let mut reports = self.reports.lock();
            reports.push(report.clone());
            reports
                .iter()
                .filter(|sent| sent.item_id == report.item_id && !sent.skip_view_count)
                .count() as u64
        };
        let delay = *self.report_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_reports.lock() {
            return Err(anyhow!("report dropped"));
        }
        Ok(WatchReportResponse {
            is_new_view: !report.skip_view_count,
            total_views,
        })
    }
}
