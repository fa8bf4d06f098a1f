/// Tracker for cards with an optimistic move still waiting on its write.
///
/// Registering a move stores the pre-move order of the lists it touched.
/// While the write is out, change events for that card are held back instead
/// of being merged, so a stale event cannot undo the local move. Resolving
/// the write hands back the snapshot and the held events, exactly once.
use std::collections::HashMap;
use std::time::Instant;

use super::event::ChangeEvent;
use crate::board::ListsSnapshot;
use crate::position::Placement;

struct PendingMove {
    placement: Placement,
    snapshot: ListsSnapshot,
    buffered: Vec<ChangeEvent>,
    registered_at: Instant,
}

/// What is left of a pending move once its write has resolved.
#[derive(Debug)]
pub struct ResolvedMove {
    pub placement: Placement,
    pub snapshot: ListsSnapshot,
    pub buffered: Vec<ChangeEvent>,
}

#[derive(Default)]
pub struct PendingWrites {
    pending: HashMap<String, PendingMove>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a move (called right after applying it locally).
    pub fn register(&mut self, card_id: &str, placement: Placement, snapshot: ListsSnapshot) {
        self.pending.insert(
            card_id.to_string(),
            PendingMove {
                placement,
                snapshot,
                buffered: Vec::new(),
                registered_at: Instant::now(),
            },
        );
    }

    pub fn is_pending(&self, card_id: &str) -> bool {
        self.pending.contains_key(card_id)
    }

    /// Hold an event back if its card has a write in flight.
    /// Hands the event back when there is nothing to wait for.
    pub fn buffer(&mut self, event: ChangeEvent) -> Result<(), ChangeEvent> {
        match self.pending.get_mut(event.card_id()) {
            Some(entry) => {
                entry.buffered.push(event);
                Ok(())
            }
            None => Err(event),
        }
    }

    /// Take the entry for a card whose write has resolved.
    pub fn resolve(&mut self, card_id: &str) -> Option<ResolvedMove> {
        let entry = self.pending.remove(card_id)?;
        log::debug!(
            "[corkboard.pending.resolve] Card {} resolved after {:?} with {} held events",
            card_id,
            entry.registered_at.elapsed(),
            entry.buffered.len()
        );
        Some(ResolvedMove {
            placement: entry.placement,
            snapshot: entry.snapshot,
            buffered: entry.buffered,
        })
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
