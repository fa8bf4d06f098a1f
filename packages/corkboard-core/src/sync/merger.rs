/// Folding of remote change events into local board state.
///
/// Inserted and updated rows are the same idempotent upsert: a row replaces
/// the stored card's columns while nested collections the row does not carry
/// are kept. Deleting an unknown card is a no-op. Events for a card whose
/// move is still being written are held in [`PendingWrites`] and replayed by
/// [`replay`] once the write has resolved.
use super::event::ChangeEvent;
use super::pending::PendingWrites;
use crate::board::{BoardError, BoardState};
use crate::types::{Card, CardRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Applied,
    /// Held back until the card's in-flight write resolves.
    Buffered,
    /// Nothing to do (delete of a card that is not there).
    Ignored,
    Rejected(BoardError),
}

/// Merge one event, holding it back if its card has a move in flight.
pub fn apply_event(
    board: &mut BoardState,
    pending: &mut PendingWrites,
    event: ChangeEvent,
) -> MergeOutcome {
    match pending.buffer(event) {
        Ok(()) => MergeOutcome::Buffered,
        Err(event) => apply_now(board, event),
    }
}

/// Merge one event regardless of in-flight writes.
pub fn apply_now(board: &mut BoardState, event: ChangeEvent) -> MergeOutcome {
    match event {
        ChangeEvent::Inserted(record) | ChangeEvent::Updated(record) => {
            upsert_record(board, record)
        }
        ChangeEvent::Deleted(id) => match board.remove(&id) {
            Some(_) => MergeOutcome::Applied,
            None => MergeOutcome::Ignored,
        },
    }
}

pub fn upsert_record(board: &mut BoardState, record: CardRecord) -> MergeOutcome {
    let card = match board.card(&record.id) {
        Some(existing) => existing.merged_with(record),
        None => Card::from(record),
    };
    let card_id = card.id.clone();
    match board.upsert(card) {
        Ok(()) => MergeOutcome::Applied,
        Err(e) => {
            log::warn!(
                "[corkboard.merge.upsert] Rejected row for card {}: {}",
                card_id,
                e
            );
            MergeOutcome::Rejected(e)
        }
    }
}

/// Replay events held back during a write.
///
/// With `keep_placement` the card's current list and position override the
/// ones carried by the events, so a committed move survives events that were
/// produced before it landed. Deletes always apply.
pub fn replay(
    board: &mut BoardState,
    events: Vec<ChangeEvent>,
    keep_placement: bool,
) -> Vec<MergeOutcome> {
    events
        .into_iter()
        .map(|event| match event {
            ChangeEvent::Inserted(mut record) | ChangeEvent::Updated(mut record)
                if keep_placement =>
            {
                if let Some(local) = board.card(&record.id) {
                    record.list_id = local.list_id.clone();
                    record.position = local.position;
                }
                upsert_record(board, record)
            }
            other => apply_now(board, other),
        })
        .collect()
}
