//! Request and response shapes exchanged with the backend REST API.

use serde::{Deserialize, Serialize};

use super::item::ItemId;

/// Which recommendation-bearing tab a request is ranked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedSource {
    Home,
    Explore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRequest {
    pub excluded_ids: Vec<ItemId>,
    pub page_size: u32,
    pub source: FeedSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleLikeResponse {
    pub liked_by_viewer: bool,
    pub like_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleSaveResponse {
    pub saved_by_viewer: bool,
    pub save_count: u64,
}

/// Authoritative `(flag, count)` pair confirmed by the server for one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleResult {
    pub active: bool,
    pub count: u64,
}

impl From<ToggleLikeResponse> for ToggleResult {
    fn from(response: ToggleLikeResponse) -> Self {
        Self {
            active: response.liked_by_viewer,
            count: response.like_count,
        }
    }
}

impl From<ToggleSaveResponse> for ToggleResult {
    fn from(response: ToggleSaveResponse) -> Self {
        Self {
            active: response.saved_by_viewer,
            count: response.save_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchReport {
    pub item_id: ItemId,
    pub watched_seconds: u64,
    pub is_completed: bool,
    pub rewatch_count: u32,
    pub skip_view_count: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchReportResponse {
    pub is_new_view: bool,
    pub total_views: u64,
}
