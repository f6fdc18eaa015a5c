use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;

use crate::models::ItemId;

use super::events::{ChannelEvent, EventKind};

pub type EventHandler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Kind(EventKind),
    Item(ItemId),
}

impl EventFilter {
    fn matches(&self, event: &ChannelEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Kind(kind) => event.kind() == *kind,
            EventFilter::Item(item_id) => event.item_id() == item_id,
        }
    }
}

/// Handle returned by [`EventBus::on`]; pass it to [`EventBus::off`] to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HandlerToken(u64);

#[derive(Default)]
struct BusInner {
    next_id: u64,
    handlers: BTreeMap<u64, (EventFilter, EventHandler)>,
}

/// Routes decoded server events to registered observers, in registration order.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, filter: EventFilter, handler: EventHandler) -> HandlerToken {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.insert(id, (filter, handler));
        HandlerToken(id)
    }

    pub fn off(&self, token: HandlerToken) -> bool {
        self.inner.lock().handlers.remove(&token.0).is_some()
    }

    pub fn handler_count(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    /// Invoke every matching handler. Handlers run outside the bus lock so they
    /// may register or detach observers themselves.
    pub fn dispatch(&self, event: &ChannelEvent) -> usize {
        let matching: Vec<EventHandler> = self
            .inner
            .lock()
            .handlers
            .values()
            .filter(|(filter, _)| filter.matches(event))
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in &matching {
            handler(event);
        }
        matching.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn like(item: u64, count: u64) -> ChannelEvent {
        ChannelEvent::LikeCountUpdated {
            item_id: ItemId::from(item),
            count,
            liked_by_viewer: None,
        }
    }

    #[test]
    fn filters_route_by_item_and_kind() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        bus.on(
            EventFilter::Item(ItemId::from(1)),
            Arc::new(move |event: &ChannelEvent| sink.lock().push(("item", event.item_id().clone()))),
        );
        let sink = seen.clone();
        bus.on(
            EventFilter::Kind(EventKind::CommentAdded),
            Arc::new(move |event: &ChannelEvent| sink.lock().push(("comment", event.item_id().clone()))),
        );

        assert_eq!(bus.dispatch(&like(1, 3)), 1);
        assert_eq!(bus.dispatch(&like(2, 3)), 0);
        assert_eq!(
            bus.dispatch(&ChannelEvent::CommentAdded {
                item_id: ItemId::from(1),
                comment_id: None,
                comment_count: None,
            }),
            2
        );

        assert_eq!(seen.lock().len(), 3);
    }

    #[test]
    fn detached_handlers_stop_receiving() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0));

        let counter = hits.clone();
        let token = bus.on(EventFilter::All, Arc::new(move |_: &ChannelEvent| *counter.lock() += 1));
        bus.dispatch(&like(1, 1));

        assert!(bus.off(token));
        assert!(!bus.off(token));
        bus.dispatch(&like(1, 2));

        assert_eq!(*hits.lock(), 1);
        assert_eq!(bus.handler_count(), 0);
    }
}
