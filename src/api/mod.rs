//! Backend REST contract consumed by the feed engine.
//!
//! The recommendation ranking and resource storage live on the server; this crate
//! only sees the request/response shapes below. Everything that talks to the
//! backend goes through [`FeedApi`] so components can be driven by in-test fakes.

mod http;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    FeedItem, ItemId, PageRequest, RecommendationRequest, ToggleLikeResponse, ToggleSaveResponse,
    WatchReport, WatchReportResponse,
};

pub use http::HttpFeedApi;

#[async_trait]
pub trait FeedApi: Send + Sync {
    async fn fetch_recommendations(&self, request: &RecommendationRequest)
        -> Result<Vec<FeedItem>>;

    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<FeedItem>>;

    async fn fetch_item(&self, id: &ItemId) -> Result<FeedItem>;

    async fn toggle_like(&self, id: &ItemId, token: &str) -> Result<ToggleLikeResponse>;

    async fn toggle_save(&self, id: &ItemId, token: &str) -> Result<ToggleSaveResponse>;

    /// Anonymous viewers still report watch time, so the token is optional.
    async fn report_watch(
        &self,
        report: &WatchReport,
        token: Option<&str>,
    ) -> Result<WatchReportResponse>;
}
