/// Local board state.
///
/// Cards are held per list in display order. Every mutation leaves each list
/// it touched densely numbered 0..n-1, so no two cards of a list share a
/// position once the call returns. Lists are fixed at construction.
use std::collections::{HashMap, HashSet};

use crate::types::{Card, ListDef};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BoardError {
    #[error("Unknown list: {0}")]
    UnknownList(String),

    #[error("Card not found: {0}")]
    CardNotFound(String),
}

#[derive(Debug, Clone)]
pub struct ListColumn {
    pub list: ListDef,
    cards: Vec<Card>,
}

impl ListColumn {
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }
}

/// Card order of some lists, captured before an optimistic move.
#[derive(Debug, Clone)]
pub struct ListsSnapshot {
    lists: Vec<(String, Vec<Card>)>,
}

impl ListsSnapshot {
    pub fn list_ids(&self) -> impl Iterator<Item = &str> {
        self.lists.iter().map(|(id, _)| id.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct BoardState {
    columns: Vec<ListColumn>,
}

impl BoardState {
    pub fn new(lists: &[ListDef]) -> Self {
        Self {
            columns: lists
                .iter()
                .map(|list| ListColumn {
                    list: list.clone(),
                    cards: Vec::new(),
                })
                .collect(),
        }
    }

    /// Build state from a loaded snapshot. Cards are ordered by position,
    /// ties by id, and renumbered. Cards naming an unknown list are returned
    /// instead of being stored; a repeated id keeps the last occurrence.
    pub fn seed(lists: &[ListDef], cards: Vec<Card>) -> (Self, Vec<Card>) {
        let mut state = Self::new(lists);
        let mut rejected = Vec::new();
        let mut latest: HashMap<String, Card> = HashMap::new();

        for card in cards {
            if !state.has_list(&card.list_id) {
                rejected.push(card);
                continue;
            }
            latest.insert(card.id.clone(), card);
        }

        for card in latest.into_values() {
            if let Some(column) = state.column_mut(&card.list_id) {
                column.cards.push(card);
            }
        }
        for column in &mut state.columns {
            column
                .cards
                .sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
            renumber(&mut column.cards);
        }

        (state, rejected)
    }

    pub fn columns(&self) -> &[ListColumn] {
        &self.columns
    }

    pub fn has_list(&self, list_id: &str) -> bool {
        self.columns.iter().any(|c| c.list.id == list_id)
    }

    /// Cards of a list ordered by position. Unknown lists are empty.
    pub fn cards_in_list(&self, list_id: &str) -> &[Card] {
        self.columns
            .iter()
            .find(|c| c.list.id == list_id)
            .map(|c| c.cards.as_slice())
            .unwrap_or(&[])
    }

    pub fn card(&self, card_id: &str) -> Option<&Card> {
        self.all_cards().find(|c| c.id == card_id)
    }

    pub fn all_cards(&self) -> impl Iterator<Item = &Card> {
        self.columns.iter().flat_map(|c| c.cards.iter())
    }

    pub fn len(&self) -> usize {
        self.columns.iter().map(|c| c.cards.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position a new card should take at the end of a list.
    pub fn next_position(&self, list_id: &str) -> u32 {
        self.cards_in_list(list_id)
            .iter()
            .map(|c| c.position + 1)
            .max()
            .unwrap_or(0)
    }

    /// Insert or replace a card by id. The card lands at index
    /// `min(position, len)` of its list.
    pub fn upsert(&mut self, card: Card) -> Result<(), BoardError> {
        if !self.has_list(&card.list_id) {
            return Err(BoardError::UnknownList(card.list_id));
        }
        self.take(&card.id);
        self.place(card);
        Ok(())
    }

    pub fn remove(&mut self, card_id: &str) -> Option<Card> {
        self.take(card_id)
    }

    /// Move a card to `position` in `list_id` and renumber the destination.
    pub fn move_card(
        &mut self,
        card_id: &str,
        list_id: &str,
        position: u32,
    ) -> Result<(), BoardError> {
        if !self.has_list(list_id) {
            return Err(BoardError::UnknownList(list_id.to_string()));
        }
        let mut card = self
            .take(card_id)
            .ok_or_else(|| BoardError::CardNotFound(card_id.to_string()))?;
        card.list_id = list_id.to_string();
        card.position = position;
        self.place(card);
        Ok(())
    }

    pub fn snapshot_lists(&self, list_ids: &[&str]) -> ListsSnapshot {
        let mut lists: Vec<(String, Vec<Card>)> = Vec::new();
        for id in list_ids {
            if lists.iter().any(|(seen, _)| seen == id) {
                continue;
            }
            lists.push((id.to_string(), self.cards_in_list(id).to_vec()));
        }
        ListsSnapshot { lists }
    }

    /// Put the snapshotted lists back into their captured order after the
    /// move of `moved_card_id` failed.
    ///
    /// Only order is restored: cards keep their current payload. Cards
    /// deleted since the snapshot stay deleted, and apart from the moved card,
    /// cards that changed list since the snapshot stay where they are. Cards
    /// that arrived in the lists are kept after the restored ones.
    pub fn restore(&mut self, snapshot: ListsSnapshot, moved_card_id: &str) {
        let home: HashMap<String, String> = snapshot
            .lists
            .iter()
            .flat_map(|(list_id, cards)| cards.iter().map(move |c| (c.id.clone(), list_id.clone())))
            .collect();

        let mut current: HashMap<String, Card> = HashMap::new();
        let snapshot_lists: HashSet<&str> = snapshot.list_ids().collect();
        let outside = self
            .card(moved_card_id)
            .is_some_and(|c| !snapshot_lists.contains(c.list_id.as_str()));
        if outside && home.contains_key(moved_card_id) {
            if let Some(card) = self.take(moved_card_id) {
                current.insert(card.id.clone(), card);
            }
        }

        for (list_id, _) in &snapshot.lists {
            if let Some(column) = self.column_mut(list_id) {
                let (restored, kept): (Vec<Card>, Vec<Card>) = std::mem::take(&mut column.cards)
                    .into_iter()
                    .partition(|c| match home.get(&c.id) {
                        Some(home_list) => c.id == moved_card_id || home_list == list_id,
                        None => false,
                    });
                column.cards = kept;
                current.extend(restored.into_iter().map(|c| (c.id.clone(), c)));
            }
        }

        for (list_id, cards) in snapshot.lists {
            let Some(column) = self.column_mut(&list_id) else {
                continue;
            };
            let mut rebuilt: Vec<Card> = cards
                .into_iter()
                .filter_map(|old| {
                    current.remove(&old.id).map(|mut card| {
                        card.list_id = list_id.clone();
                        card
                    })
                })
                .collect();
            rebuilt.append(&mut column.cards);
            renumber(&mut rebuilt);
            column.cards = rebuilt;
        }
    }

    fn column_mut(&mut self, list_id: &str) -> Option<&mut ListColumn> {
        self.columns.iter_mut().find(|c| c.list.id == list_id)
    }

    /// Detach a card from whichever list holds it, closing the gap.
    fn take(&mut self, card_id: &str) -> Option<Card> {
        for column in &mut self.columns {
            if let Some(index) = column.cards.iter().position(|c| c.id == card_id) {
                let card = column.cards.remove(index);
                renumber(&mut column.cards);
                return Some(card);
            }
        }
        None
    }

    fn place(&mut self, card: Card) {
        let Some(column) = self.column_mut(&card.list_id) else {
            log::warn!(
                "[corkboard.board.place] Dropping card {} for unknown list {}",
                card.id,
                card.list_id
            );
            return;
        };
        let index = (card.position as usize).min(column.cards.len());
        column.cards.insert(index, card);
        renumber(&mut column.cards);
    }
}

fn renumber(cards: &mut [Card]) {
    for (index, card) in cards.iter_mut().enumerate() {
        card.position = index as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::default_lists;

    fn board(cards: &[(&str, &str, u32)]) -> BoardState {
        let cards = cards
            .iter()
            .map(|(id, list, pos)| Card::new(id, &format!("Card {}", id), list, *pos))
            .collect();
        let (state, rejected) = BoardState::seed(&default_lists(), cards);
        assert!(rejected.is_empty());
        state
    }

    fn order(state: &BoardState, list: &str) -> Vec<(String, u32)> {
        state
            .cards_in_list(list)
            .iter()
            .map(|c| (c.id.clone(), c.position))
            .collect()
    }

    fn assert_dense(state: &BoardState) {
        for column in state.columns() {
            let positions: Vec<u32> = column.cards().iter().map(|c| c.position).collect();
            let expected: Vec<u32> = (0..column.cards().len() as u32).collect();
            assert_eq!(positions, expected, "list {} not dense", column.list.id);
        }
    }

    #[test]
    fn test_seed_orders_by_position_then_id_and_renumbers() {
        let state = board(&[("b", "todo", 5), ("a", "todo", 5), ("c", "todo", 1)]);
        assert_eq!(
            order(&state, "todo"),
            vec![("c".into(), 0), ("a".into(), 1), ("b".into(), 2)]
        );
    }

    #[test]
    fn test_seed_rejects_unknown_lists_and_dedupes() {
        let cards = vec![
            Card::new("x", "First", "todo", 0),
            Card::new("y", "Lost", "backlog", 0),
            Card::new("x", "Second", "done", 0),
        ];
        let (state, rejected) = BoardState::seed(&default_lists(), cards);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].id, "y");
        assert_eq!(state.len(), 1);
        assert_eq!(state.card("x").unwrap().list_id, "done");
    }

    #[test]
    fn test_move_down_within_list() {
        let mut state = board(&[("x", "todo", 0), ("y", "todo", 1)]);
        state.move_card("x", "todo", 1).unwrap();
        assert_eq!(order(&state, "todo"), vec![("y".into(), 0), ("x".into(), 1)]);
    }

    #[test]
    fn test_move_across_lists_closes_gap_in_source() {
        let mut state = board(&[("a", "todo", 0), ("b", "todo", 1), ("w", "done", 0)]);
        state.move_card("a", "done", 0).unwrap();
        assert_eq!(order(&state, "todo"), vec![("b".into(), 0)]);
        assert_eq!(order(&state, "done"), vec![("a".into(), 0), ("w".into(), 1)]);
    }

    #[test]
    fn test_move_past_end_clamps() {
        let mut state = board(&[("a", "todo", 0), ("w", "done", 0)]);
        state.move_card("a", "done", 40).unwrap();
        assert_eq!(order(&state, "done"), vec![("w".into(), 0), ("a".into(), 1)]);
    }

    #[test]
    fn test_move_to_unknown_list_leaves_state_untouched() {
        let mut state = board(&[("a", "todo", 0)]);
        let err = state.move_card("a", "archive", 0).unwrap_err();
        assert_eq!(err, BoardError::UnknownList("archive".into()));
        assert_eq!(order(&state, "todo"), vec![("a".into(), 0)]);
    }

    #[test]
    fn test_move_missing_card() {
        let mut state = board(&[]);
        assert_eq!(
            state.move_card("ghost", "todo", 0),
            Err(BoardError::CardNotFound("ghost".into()))
        );
    }

    #[test]
    fn test_positions_stay_dense_over_many_moves() {
        let ids = ["a", "b", "c", "d", "e", "f", "g"];
        let lists = ["todo", "inprogress", "done"];
        let seeded: Vec<(&str, &str, u32)> =
            ids.iter().enumerate().map(|(i, id)| (*id, "todo", i as u32)).collect();
        let mut state = board(&seeded);

        let mut seed: u64 = 0x2545_f491;
        for _ in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let id = ids[(seed >> 33) as usize % ids.len()];
            let list = lists[(seed >> 17) as usize % lists.len()];
            let position = (seed >> 5) as u32 % 10;
            state.move_card(id, list, position).unwrap();
            assert_dense(&state);
            assert_eq!(state.len(), ids.len());
        }
    }

    #[test]
    fn test_upsert_twice_is_idempotent() {
        let mut state = board(&[("a", "todo", 0), ("b", "todo", 1)]);
        let incoming = Card::new("c", "New", "todo", 1);
        state.upsert(incoming.clone()).unwrap();
        let once = order(&state, "todo");
        state.upsert(incoming).unwrap();
        assert_eq!(order(&state, "todo"), once);
        assert_eq!(once, vec![("a".into(), 0), ("c".into(), 1), ("b".into(), 2)]);
    }

    #[test]
    fn test_upsert_unknown_list_rejected() {
        let mut state = board(&[]);
        let err = state.upsert(Card::new("a", "A", "someday", 0)).unwrap_err();
        assert_eq!(err, BoardError::UnknownList("someday".into()));
        assert!(state.is_empty());
    }

    #[test]
    fn test_remove_renumbers_and_missing_is_none() {
        let mut state = board(&[("a", "todo", 0), ("b", "todo", 1), ("c", "todo", 2)]);
        assert!(state.remove("b").is_some());
        assert_eq!(order(&state, "todo"), vec![("a".into(), 0), ("c".into(), 1)]);
        assert!(state.remove("b").is_none());
    }

    #[test]
    fn test_next_position() {
        let state = board(&[("a", "todo", 0), ("b", "todo", 1)]);
        assert_eq!(state.next_position("todo"), 2);
        assert_eq!(state.next_position("done"), 0);
    }

    #[test]
    fn test_restore_returns_card_to_source_list() {
        let mut state = board(&[("z", "todo", 0), ("y", "todo", 1), ("w", "done", 0)]);
        let snapshot = state.snapshot_lists(&["todo", "done"]);
        state.move_card("z", "done", 0).unwrap();

        state.restore(snapshot, "z");
        assert_eq!(order(&state, "todo"), vec![("z".into(), 0), ("y".into(), 1)]);
        assert_eq!(order(&state, "done"), vec![("w".into(), 0)]);
        assert_eq!(state.card("z").unwrap().list_id, "todo");
    }

    #[test]
    fn test_restore_keeps_newer_payload_and_later_arrivals() {
        let mut state = board(&[("x", "todo", 0), ("y", "todo", 1)]);
        let snapshot = state.snapshot_lists(&["todo"]);
        state.move_card("x", "todo", 1).unwrap();

        // Renamed and a new card arrived while the move was in flight.
        let mut renamed = state.card("y").unwrap().clone();
        renamed.title = "Renamed".into();
        state.upsert(renamed).unwrap();
        state.upsert(Card::new("n", "New", "todo", 5)).unwrap();
        state.remove("x");
        state.upsert(Card::new("x", "X", "todo", 2)).unwrap();

        state.restore(snapshot, "x");
        assert_eq!(
            order(&state, "todo"),
            vec![("x".into(), 0), ("y".into(), 1), ("n".into(), 2)]
        );
        assert_eq!(state.card("y").unwrap().title, "Renamed");
    }

    #[test]
    fn test_restore_skips_deleted_cards() {
        let mut state = board(&[("x", "todo", 0), ("y", "todo", 1)]);
        let snapshot = state.snapshot_lists(&["todo", "todo"]);
        assert_eq!(snapshot.list_ids().count(), 1);
        state.move_card("x", "todo", 1).unwrap();
        state.remove("y");
        state.restore(snapshot, "x");
        assert_eq!(order(&state, "todo"), vec![("x".into(), 0)]);
    }
}
