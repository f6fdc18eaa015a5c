use std::{sync::Arc, time::Duration};

use log::{debug, warn};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::{sync::broadcast, time};

use crate::{
    api::FeedApi,
    credentials::Credentials,
    feed::FeedStore,
    models::{ActionKind, ItemId, ToggleResult},
    realtime::ChannelEvent,
};

use super::state::{flip, Admission, PendingMutations};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("sign in to like or save videos")]
    Unauthenticated,
    #[error("item {0} is not in the feed")]
    UnknownItem(ItemId),
    #[error("{} request for item {item_id} timed out", .kind.as_str())]
    Timeout { kind: ActionKind, item_id: ItemId },
    #[error("{} request for item {item_id} failed: {message}", .kind.as_str())]
    Request {
        kind: ActionKind,
        item_id: ItemId,
        message: String,
    },
}

/// Edges a UI layer reacts to (pulse on like, toast on rollback).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InteractionEvent {
    Liked { item_id: ItemId },
    Unliked { item_id: ItemId },
    Saved { item_id: ItemId },
    Unsaved { item_id: ItemId },
    RolledBack { item_id: ItemId, kind: ActionKind },
}

impl InteractionEvent {
    fn transition(item_id: &ItemId, kind: ActionKind, active: bool) -> Self {
        let item_id = item_id.clone();
        match (kind, active) {
            (ActionKind::Like, true) => InteractionEvent::Liked { item_id },
            (ActionKind::Like, false) => InteractionEvent::Unliked { item_id },
            (ActionKind::Save, true) => InteractionEvent::Saved { item_id },
            (ActionKind::Save, false) => InteractionEvent::Unsaved { item_id },
        }
    }
}

/// Result of a toggle as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub active: bool,
    pub count: u64,
    /// The toggle folded into a request already in flight; the state is optimistic.
    pub coalesced: bool,
}

/// Authoritative value for one interaction field. `None` leaves local state alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthoritativeUpdate {
    pub kind: ActionKind,
    pub count: Option<u64>,
    pub viewer_flag: Option<bool>,
}

#[derive(Clone)]
pub struct InteractionReconciler {
    store: FeedStore,
    api: Arc<dyn FeedApi>,
    credentials: Credentials,
    pending: Arc<Mutex<PendingMutations>>,
    events: broadcast::Sender<InteractionEvent>,
    request_timeout: Duration,
}

impl InteractionReconciler {
    pub fn new(
        store: FeedStore,
        api: Arc<dyn FeedApi>,
        credentials: Credentials,
        request_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            api,
            credentials,
            pending: Arc::new(Mutex::new(PendingMutations::new())),
            events,
            request_timeout,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<InteractionEvent> {
        self.events.subscribe()
    }

    pub fn is_pending(&self, item_id: &ItemId, kind: ActionKind) -> bool {
        self.pending.lock().is_pending(item_id, kind)
    }

    pub async fn toggle_like(&self, item_id: &ItemId) -> Result<ToggleOutcome, InteractionError> {
        self.toggle(item_id, ActionKind::Like).await
    }

    pub async fn toggle_save(&self, item_id: &ItemId) -> Result<ToggleOutcome, InteractionError> {
        self.toggle(item_id, ActionKind::Save).await
    }

    async fn toggle(
        &self,
        item_id: &ItemId,
        kind: ActionKind,
    ) -> Result<ToggleOutcome, InteractionError> {
        let token = self
            .credentials
            .token()
            .ok_or(InteractionError::Unauthenticated)?;

        let (after, admission) = {
            let mut pending = self.pending.lock();
            let (before, after) = self
                .store
                .update_item(item_id, |item| {
                    let (active, count) = item.interaction(kind);
                    let before = ToggleResult { active, count };
                    let after = flip(before);
                    item.set_interaction(kind, after.active, after.count);
                    (before, after)
                })
                .ok_or_else(|| InteractionError::UnknownItem(item_id.clone()))?;
            (after, pending.admit(item_id, kind, before, after))
        };
        self.emit(InteractionEvent::transition(item_id, kind, after.active));

        if admission == Admission::Coalesced {
            debug!(
                "{} toggle on item {item_id} coalesced into in-flight request",
                kind.as_str()
            );
            return Ok(ToggleOutcome {
                active: after.active,
                count: after.count,
                coalesced: true,
            });
        }

        self.drive(item_id, kind, &token).await
    }

    /// Keep one request in flight until the server agrees with the viewer's
    /// latest toggle, or roll the whole chain back on the first failure.
    async fn drive(
        &self,
        item_id: &ItemId,
        kind: ActionKind,
        token: &str,
    ) -> Result<ToggleOutcome, InteractionError> {
        loop {
            let sent = time::timeout(self.request_timeout, self.send(item_id, kind, token)).await;
            let failure = match sent {
                Ok(Ok(server)) => {
                    let mut pending = self.pending.lock();
                    match pending.confirm(item_id, kind, server) {
                        None => {
                            self.write(item_id, kind, server);
                            return Ok(ToggleOutcome {
                                active: server.active,
                                count: server.count,
                                coalesced: false,
                            });
                        }
                        Some(optimistic) => {
                            self.write(item_id, kind, optimistic);
                            continue;
                        }
                    }
                }
                Ok(Err(err)) => InteractionError::Request {
                    kind,
                    item_id: item_id.clone(),
                    message: format!("{err:#}"),
                },
                Err(_) => InteractionError::Timeout {
                    kind,
                    item_id: item_id.clone(),
                },
            };

            let restored = self.pending.lock().abandon(item_id, kind);
            if let Some(snapshot) = restored {
                self.write(item_id, kind, snapshot);
            }
            warn!("{failure}; local state rolled back");
            self.emit(InteractionEvent::RolledBack {
                item_id: item_id.clone(),
                kind,
            });
            return Err(failure);
        }
    }

    async fn send(
        &self,
        item_id: &ItemId,
        kind: ActionKind,
        token: &str,
    ) -> anyhow::Result<ToggleResult> {
        Ok(match kind {
            ActionKind::Like => self.api.toggle_like(item_id, token).await?.into(),
            ActionKind::Save => self.api.toggle_save(item_id, token).await?.into(),
        })
    }

    fn write(&self, item_id: &ItemId, kind: ActionKind, state: ToggleResult) {
        self.store
            .update_item(item_id, |item| item.set_interaction(kind, state.active, state.count));
    }

    fn emit(&self, event: InteractionEvent) {
        // No receivers is fine; nobody is rendering.
        let _ = self.events.send(event);
    }

    /// Merge a server-pushed value. Provided fields overwrite local state,
    /// superseding any optimistic guess; omitted fields are left untouched.
    pub fn on_authoritative_update(&self, item_id: &ItemId, update: AuthoritativeUpdate) -> bool {
        let edge = self.store.update_item(item_id, |item| {
            let (was_active, count) = item.interaction(update.kind);
            let active = update.viewer_flag.unwrap_or(was_active);
            item.set_interaction(update.kind, active, update.count.unwrap_or(count));
            (was_active != active).then_some(active)
        });

        match edge {
            Some(Some(active)) => {
                self.emit(InteractionEvent::transition(item_id, update.kind, active));
                true
            }
            Some(None) => true,
            None => false,
        }
    }

    /// Route one realtime event into the feed store.
    pub fn apply_event(&self, event: &ChannelEvent) {
        match event {
            ChannelEvent::LikeCountUpdated {
                item_id,
                count,
                liked_by_viewer,
            } => {
                self.on_authoritative_update(
                    item_id,
                    AuthoritativeUpdate {
                        kind: ActionKind::Like,
                        count: Some(*count),
                        viewer_flag: *liked_by_viewer,
                    },
                );
            }
            ChannelEvent::SaveCountUpdated {
                item_id,
                count,
                saved_by_viewer,
            } => {
                self.on_authoritative_update(
                    item_id,
                    AuthoritativeUpdate {
                        kind: ActionKind::Save,
                        count: Some(*count),
                        viewer_flag: *saved_by_viewer,
                    },
                );
            }
            ChannelEvent::CommentAdded {
                item_id,
                comment_count,
                ..
            } => {
                self.store.update_item(item_id, |item| {
                    item.counters.comment_count =
                        comment_count.unwrap_or(item.counters.comment_count + 1);
                });
            }
            ChannelEvent::CommentDeleted {
                item_id,
                comment_count,
                ..
            } => {
                self.store.update_item(item_id, |item| {
                    item.counters.comment_count = comment_count
                        .unwrap_or_else(|| item.counters.comment_count.saturating_sub(1));
                });
            }
        }
    }
}
