mod item;
mod wire;

pub use item::{ActionKind, FeedItem, ItemCounters, ItemId, MediaRef, OwnerRef};
pub use wire::{
    FeedSource, PageRequest, RecommendationRequest, ToggleLikeResponse, ToggleResult,
    ToggleSaveResponse, WatchReport, WatchReportResponse,
};
