//! Feed item data models.
//!
//! `FeedItem` is created when a fetch returns it and is never deleted in place:
//! counters and viewer flags are mutated by the interaction reconciler and by
//! realtime push events, and the whole item only disappears on list replacement.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Opaque feed item identity.
///
/// The backend emits ids either as JSON numbers or strings; both decode into the
/// same textual form so lookups never depend on the wire representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for ItemId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(u64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Number(value) => ItemId::from(value),
            RawId::Text(value) => ItemId(value),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCounters {
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub save_count: u64,
    #[serde(default)]
    pub comment_count: u64,
    #[serde(default)]
    pub share_count: u64,
    #[serde(default)]
    pub view_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub id: ItemId,
    #[serde(default)]
    pub media: MediaRef,
    #[serde(default)]
    pub owner: OwnerRef,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub counters: ItemCounters,
    #[serde(default)]
    pub liked_by_viewer: bool,
    #[serde(default)]
    pub saved_by_viewer: bool,
}

impl FeedItem {
    /// Bare item with zeroed counters, used when only the identity is known.
    pub fn new(id: impl Into<ItemId>) -> Self {
        Self {
            id: id.into(),
            media: MediaRef::default(),
            owner: OwnerRef::default(),
            caption: None,
            created_at: None,
            counters: ItemCounters::default(),
            liked_by_viewer: false,
            saved_by_viewer: false,
        }
    }

    /// Viewer flag and counter for one interaction kind.
    pub fn interaction(&self, kind: ActionKind) -> (bool, u64) {
        match kind {
            ActionKind::Like => (self.liked_by_viewer, self.counters.like_count),
            ActionKind::Save => (self.saved_by_viewer, self.counters.save_count),
        }
    }

    pub fn set_interaction(&mut self, kind: ActionKind, active: bool, count: u64) {
        match kind {
            ActionKind::Like => {
                self.liked_by_viewer = active;
                self.counters.like_count = count;
            }
            ActionKind::Save => {
                self.saved_by_viewer = active;
                self.counters.save_count = count;
            }
        }
    }
}

/// Interaction kinds that go through optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Like,
    Save,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Like => "like",
            ActionKind::Save => "save",
        }
    }
}
