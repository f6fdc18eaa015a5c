use std::collections::{hash_map::Entry, HashMap};

use crate::models::{ActionKind, ItemId, ToggleResult};

/// Flip a viewer flag and move its counter by one in the matching direction.
pub fn flip(current: ToggleResult) -> ToggleResult {
    if current.active {
        ToggleResult {
            active: false,
            count: current.count.saturating_sub(1),
        }
    } else {
        ToggleResult {
            active: true,
            count: current.count + 1,
        }
    }
}

/// A chain of local toggles on one (item, kind) pair awaiting server confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticMutation {
    /// Last state known to be true on the server; restored verbatim on failure.
    pub snapshot: ToggleResult,
    /// Flag the viewer asked for with their latest toggle.
    pub desired: bool,
}

/// What a toggle did to the pending table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No mutation was in flight; the caller must send the request.
    Started,
    /// Folded into the mutation already in flight.
    Coalesced,
}

#[derive(Debug, Default)]
pub struct PendingMutations {
    entries: HashMap<(ItemId, ActionKind), OptimisticMutation>,
}

impl PendingMutations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self, item_id: &ItemId, kind: ActionKind) -> bool {
        self.entries.contains_key(&(item_id.clone(), kind))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a toggle from `before` to `after`.
    pub fn admit(
        &mut self,
        item_id: &ItemId,
        kind: ActionKind,
        before: ToggleResult,
        after: ToggleResult,
    ) -> Admission {
        match self.entries.entry((item_id.clone(), kind)) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().desired = after.active;
                Admission::Coalesced
            }
            Entry::Vacant(entry) => {
                entry.insert(OptimisticMutation {
                    snapshot: before,
                    desired: after.active,
                });
                Admission::Started
            }
        }
    }

    /// Apply a server confirmation. Returns `None` when the chain is settled
    /// (entry removed), or the optimistic state to show while a follow-up request
    /// brings the server in line with the viewer's latest toggle.
    pub fn confirm(
        &mut self,
        item_id: &ItemId,
        kind: ActionKind,
        server: ToggleResult,
    ) -> Option<ToggleResult> {
        let key = (item_id.clone(), kind);
        let entry = self.entries.get_mut(&key)?;
        if entry.desired == server.active {
            self.entries.remove(&key);
            return None;
        }
        entry.snapshot = server;
        Some(flip(server))
    }

    /// Drop the chain and hand back the state to restore.
    pub fn abandon(&mut self, item_id: &ItemId, kind: ActionKind) -> Option<ToggleResult> {
        self.entries
            .remove(&(item_id.clone(), kind))
            .map(|mutation| mutation.snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(active: bool, count: u64) -> ToggleResult {
        ToggleResult { active, count }
    }

    #[test]
    fn flip_never_underflows() {
        assert_eq!(flip(state(true, 0)), state(false, 0));
        assert_eq!(flip(state(false, 10)), state(true, 11));
    }

    #[test]
    fn second_toggle_is_coalesced_into_the_first() {
        let mut pending = PendingMutations::new();
        let id = ItemId::from(1);

        assert_eq!(
            pending.admit(&id, ActionKind::Like, state(false, 10), state(true, 11)),
            Admission::Started
        );
        assert_eq!(
            pending.admit(&id, ActionKind::Like, state(true, 11), state(false, 10)),
            Admission::Coalesced
        );
        assert_eq!(
            pending.admit(&id, ActionKind::Save, state(false, 0), state(true, 1)),
            Admission::Started
        );

        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn confirmation_requests_follow_up_when_viewer_changed_their_mind() {
        let mut pending = PendingMutations::new();
        let id = ItemId::from(1);
        pending.admit(&id, ActionKind::Like, state(false, 10), state(true, 11));
        pending.admit(&id, ActionKind::Like, state(true, 11), state(false, 10));

        let follow_up = pending.confirm(&id, ActionKind::Like, state(true, 11));
        assert_eq!(follow_up, Some(state(false, 10)));
        assert!(pending.is_pending(&id, ActionKind::Like));

        assert_eq!(pending.confirm(&id, ActionKind::Like, state(false, 10)), None);
        assert!(pending.is_empty());
    }

    #[test]
    fn abandon_returns_last_confirmed_snapshot() {
        let mut pending = PendingMutations::new();
        let id = ItemId::from(1);
        pending.admit(&id, ActionKind::Like, state(false, 10), state(true, 11));
        pending.admit(&id, ActionKind::Like, state(true, 11), state(false, 10));
        pending.confirm(&id, ActionKind::Like, state(true, 12));

        assert_eq!(pending.abandon(&id, ActionKind::Like), Some(state(true, 12)));
        assert_eq!(pending.abandon(&id, ActionKind::Like), None);
    }
}
