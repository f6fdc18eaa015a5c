//! Frames exchanged over the realtime hub connection.
//!
//! Server frames are tagged JSON objects. Viewer flags on count updates are only
//! present when the event was caused by the current viewer, so they decode into
//! `Option<bool>` and a missing field stays distinguishable from `false`.

use serde::{Deserialize, Serialize};

use crate::models::ItemId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChannelEvent {
    #[serde(rename_all = "camelCase")]
    LikeCountUpdated {
        item_id: ItemId,
        count: u64,
        #[serde(default)]
        liked_by_viewer: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    SaveCountUpdated {
        item_id: ItemId,
        count: u64,
        #[serde(default)]
        saved_by_viewer: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    CommentAdded {
        item_id: ItemId,
        #[serde(default)]
        comment_id: Option<String>,
        #[serde(default)]
        comment_count: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    CommentDeleted {
        item_id: ItemId,
        #[serde(default)]
        comment_id: Option<String>,
        #[serde(default)]
        comment_count: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LikeCount,
    SaveCount,
    CommentAdded,
    CommentDeleted,
}

impl ChannelEvent {
    pub fn item_id(&self) -> &ItemId {
        match self {
            ChannelEvent::LikeCountUpdated { item_id, .. }
            | ChannelEvent::SaveCountUpdated { item_id, .. }
            | ChannelEvent::CommentAdded { item_id, .. }
            | ChannelEvent::CommentDeleted { item_id, .. } => item_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ChannelEvent::LikeCountUpdated { .. } => EventKind::LikeCount,
            ChannelEvent::SaveCountUpdated { .. } => EventKind::SaveCount,
            ChannelEvent::CommentAdded { .. } => EventKind::CommentAdded,
            ChannelEvent::CommentDeleted { .. } => EventKind::CommentDeleted,
        }
    }
}

/// Hub methods invoked by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    JoinGroup { item_id: ItemId },
    #[serde(rename_all = "camelCase")]
    LeaveGroup { item_id: ItemId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omitted_viewer_flag_decodes_as_none() {
        let event: ChannelEvent =
            serde_json::from_str(r#"{"type":"likeCountUpdated","itemId":42,"count":7}"#).unwrap();

        assert_eq!(
            event,
            ChannelEvent::LikeCountUpdated {
                item_id: ItemId::from(42),
                count: 7,
                liked_by_viewer: None,
            }
        );
    }

    #[test]
    fn explicit_false_flag_is_kept() {
        let event: ChannelEvent = serde_json::from_str(
            r#"{"type":"saveCountUpdated","itemId":"9","count":0,"savedByViewer":false}"#,
        )
        .unwrap();

        assert_eq!(event.kind(), EventKind::SaveCount);
        assert!(matches!(
            event,
            ChannelEvent::SaveCountUpdated {
                saved_by_viewer: Some(false),
                ..
            }
        ));
    }

    #[test]
    fn join_frame_wire_shape() {
        let frame = ClientFrame::JoinGroup {
            item_id: ItemId::from(42),
        };

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value, serde_json::json!({"type": "joinGroup", "itemId": "42"}));
    }
}
