use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::models::{FeedItem, FeedSource, ItemId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedMode {
    Home,
    Explore,
    /// Manually pinned list fetched page by page, optionally scoped to a playlist key.
    Playlist { key: Option<String> },
}

impl Default for FeedMode {
    fn default() -> Self {
        FeedMode::Home
    }
}

impl FeedMode {
    /// Recommendation source for the two recommendation-bearing modes.
    pub fn source(&self) -> Option<FeedSource> {
        match self {
            FeedMode::Home => Some(FeedSource::Home),
            FeedMode::Explore => Some(FeedSource::Explore),
            FeedMode::Playlist { .. } => None,
        }
    }
}

/// Proof that the caller owns the fetch guard for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub epoch: u64,
}

#[derive(Debug, Clone, Default)]
pub struct FeedState {
    items: Vec<FeedItem>,
    /// Every id delivered in the current epoch; a superset of the ids in `items`.
    excluded: HashSet<ItemId>,
    pub mode: FeedMode,
    /// Last page requested in paginated mode; 0 before the first page.
    pub page: u32,
    pub has_more: bool,
    pub epoch: u64,
    in_flight: Option<u64>,
}

impl FeedState {
    pub fn new(mode: FeedMode) -> Self {
        Self {
            mode,
            has_more: true,
            ..Self::default()
        }
    }

    pub fn items(&self) -> &[FeedItem] {
        &self.items
    }

    pub fn item(&self, id: &ItemId) -> Option<&FeedItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn item_mut(&mut self, id: &ItemId) -> Option<&mut FeedItem> {
        self.items.iter_mut().find(|item| &item.id == id)
    }

    pub fn is_excluded(&self, id: &ItemId) -> bool {
        self.excluded.contains(id)
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Ids to send as the exclusion list, in feed order first.
    pub fn excluded_ids(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.items.iter().map(|item| item.id.clone()).collect();
        let mut extra: Vec<ItemId> = self
            .excluded
            .iter()
            .filter(|id| self.item(id).is_none())
            .cloned()
            .collect();
        extra.sort();
        ids.extend(extra);
        ids
    }

    /// Take the fetch guard for the current epoch, or `None` if a fetch is running.
    pub fn begin_fetch(&mut self) -> Option<FetchTicket> {
        if self.in_flight.is_some() {
            return None;
        }
        self.in_flight = Some(self.epoch);
        Some(FetchTicket { epoch: self.epoch })
    }

    /// Start a new epoch with an empty list and exclusion set.
    pub fn begin_reload(&mut self) -> Option<FetchTicket> {
        if self.in_flight.is_some() {
            return None;
        }
        self.reset_epoch();
        Some(FetchTicket { epoch: self.epoch })
    }

    /// Switch modes and start a new epoch. Supersedes any fetch already running:
    /// its results belong to the old epoch and are discarded on arrival.
    pub fn switch_mode(&mut self, mode: FeedMode) -> Option<FetchTicket> {
        if self.mode == mode {
            return None;
        }
        self.mode = mode;
        self.reset_epoch();
        Some(FetchTicket { epoch: self.epoch })
    }

    fn reset_epoch(&mut self) {
        self.items.clear();
        self.excluded.clear();
        self.page = 0;
        self.has_more = true;
        self.epoch += 1;
        self.in_flight = Some(self.epoch);
    }

    pub fn is_current(&self, ticket: FetchTicket) -> bool {
        ticket.epoch == self.epoch
    }

    pub fn finish_fetch(&mut self, ticket: FetchTicket) {
        if self.in_flight == Some(ticket.epoch) {
            self.in_flight = None;
        }
    }

    /// Append items whose ids were never delivered in this epoch. Returns how many
    /// were appended; every returned id joins the exclusion set either way.
    pub fn append_unique(&mut self, batch: Vec<FeedItem>) -> usize {
        let mut added = 0;
        for item in batch {
            if self.excluded.insert(item.id.clone()) {
                self.items.push(item);
                added += 1;
            }
        }
        added
    }

    /// Put `seed` at the head of the list, replacing any other copy of it.
    pub fn place_seed(&mut self, seed: FeedItem) {
        self.items.retain(|item| item.id != seed.id);
        self.excluded.insert(seed.id.clone());
        self.items.insert(0, seed);
    }
}

/// Shared handle to the feed state, owned by the controller and lent to the
/// reconciler and telemetry collector. Locks are never held across an await.
#[derive(Clone)]
pub struct FeedStore {
    inner: Arc<Mutex<FeedState>>,
}

impl FeedStore {
    pub fn new(mode: FeedMode) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FeedState::new(mode))),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&FeedState) -> R) -> R {
        f(&self.inner.lock())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut FeedState) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn items(&self) -> Vec<FeedItem> {
        self.read(|state| state.items().to_vec())
    }

    pub fn item(&self, id: &ItemId) -> Option<FeedItem> {
        self.read(|state| state.item(id).cloned())
    }

    pub fn update_item<R>(&self, id: &ItemId, f: impl FnOnce(&mut FeedItem) -> R) -> Option<R> {
        self.update(|state| state.item_mut(id).map(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ids, item, items};

    #[test]
    fn append_skips_ids_already_delivered() {
        let mut state = FeedState::new(FeedMode::Home);

        assert_eq!(state.append_unique(items(&[1, 2, 3])), 3);
        assert_eq!(state.append_unique(items(&[3, 4, 1, 4])), 1);

        assert_eq!(ids(state.items()), vec!["1", "2", "3", "4"]);
        assert_eq!(state.excluded_ids().len(), 4);
    }

    #[test]
    fn fetch_guard_admits_one_fetch_at_a_time() {
        let mut state = FeedState::new(FeedMode::Home);

        let ticket = state.begin_fetch().unwrap();
        assert!(state.begin_fetch().is_none());
        assert!(state.begin_reload().is_none());

        state.finish_fetch(ticket);
        assert!(!state.is_loading());
        assert!(state.begin_fetch().is_some());
    }

    #[test]
    fn reload_clears_list_and_exclusions() {
        let mut state = FeedState::new(FeedMode::Home);
        state.append_unique(items(&[1, 2]));
        state.has_more = false;

        let ticket = state.begin_reload().unwrap();

        assert!(state.items().is_empty());
        assert!(!state.is_excluded(&ItemId::from(1)));
        assert!(state.has_more);
        assert!(state.is_current(ticket));
    }

    #[test]
    fn mode_switch_supersedes_running_fetch() {
        let mut state = FeedState::new(FeedMode::Home);
        let stale = state.begin_fetch().unwrap();

        let fresh = state.switch_mode(FeedMode::Explore).unwrap();
        assert!(state.switch_mode(FeedMode::Explore).is_none());

        assert!(!state.is_current(stale));
        state.finish_fetch(stale);
        assert!(state.is_loading(), "stale completion must not release the new guard");

        state.finish_fetch(fresh);
        assert!(!state.is_loading());
    }

    #[test]
    fn seed_is_moved_to_the_front() {
        let mut state = FeedState::new(FeedMode::Home);
        state.append_unique(items(&[7, 42, 9]));

        state.place_seed(item(42));

        assert_eq!(ids(state.items()), vec!["42", "7", "9"]);
    }
}
