/// Drop-target to placement resolution for drag gestures.
///
/// Pure: reads board state, never changes it.
use serde::{Deserialize, Serialize};

use crate::board::{BoardError, BoardState};

/// What a dragged card was released over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DropTarget {
    /// The empty area of a list.
    List(String),
    /// Another card.
    Card(String),
}

/// Where a card should end up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub list_id: String,
    pub position: u32,
}

/// Resolve a drop into a placement for `card_id`.
///
/// - no target, an unknown moving card or an unknown target card abandon the
///   gesture (`Ok(None)`);
/// - a list target keeps the card's current position in that list;
/// - a card target takes that card's list and position, one further when the
///   moving card started at a higher position.
///
/// Dropping a card onto itself resolves to its current placement.
pub fn allocate(
    board: &BoardState,
    card_id: &str,
    target: Option<&DropTarget>,
) -> Result<Option<Placement>, BoardError> {
    let Some(target) = target else {
        return Ok(None);
    };
    let Some(moving) = board.card(card_id) else {
        return Ok(None);
    };

    match target {
        DropTarget::List(list_id) => {
            if !board.has_list(list_id) {
                return Err(BoardError::UnknownList(list_id.clone()));
            }
            Ok(Some(Placement {
                list_id: list_id.clone(),
                position: moving.position,
            }))
        }
        DropTarget::Card(over_id) => {
            let Some(over) = board.card(over_id) else {
                return Ok(None);
            };
            let mut position = over.position;
            if moving.position > over.position {
                position += 1;
            }
            Ok(Some(Placement {
                list_id: over.list_id.clone(),
                position,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{default_lists, Card};

    fn board(cards: &[(&str, &str, u32)]) -> BoardState {
        let cards = cards
            .iter()
            .map(|(id, list, pos)| Card::new(id, id, list, *pos))
            .collect();
        BoardState::seed(&default_lists(), cards).0
    }

    fn placed(list_id: &str, position: u32) -> Option<Placement> {
        Some(Placement {
            list_id: list_id.to_string(),
            position,
        })
    }

    #[test]
    fn test_no_target_abandons() {
        let state = board(&[("x", "todo", 0)]);
        assert_eq!(allocate(&state, "x", None), Ok(None));
    }

    #[test]
    fn test_drop_on_lower_card_takes_its_position() {
        let state = board(&[("x", "todo", 0), ("y", "todo", 1)]);
        let target = DropTarget::Card("y".into());
        assert_eq!(allocate(&state, "x", Some(&target)), Ok(placed("todo", 1)));
    }

    #[test]
    fn test_drop_on_higher_card_goes_one_past_it() {
        let state = board(&[("a", "todo", 0), ("b", "todo", 1), ("c", "todo", 2)]);
        let target = DropTarget::Card("a".into());
        assert_eq!(allocate(&state, "c", Some(&target)), Ok(placed("todo", 1)));
    }

    #[test]
    fn test_drop_on_card_in_other_list() {
        let state = board(&[("x", "todo", 0), ("w", "done", 0), ("v", "done", 1)]);
        let target = DropTarget::Card("v".into());
        assert_eq!(allocate(&state, "x", Some(&target)), Ok(placed("done", 1)));
    }

    #[test]
    fn test_drop_on_list_keeps_position() {
        let state = board(&[("a", "todo", 0), ("z", "todo", 1), ("w", "done", 0)]);
        let target = DropTarget::List("done".into());
        assert_eq!(allocate(&state, "z", Some(&target)), Ok(placed("done", 1)));
    }

    #[test]
    fn test_drop_on_empty_list() {
        let state = board(&[("z", "todo", 0)]);
        let target = DropTarget::List("inprogress".into());
        assert_eq!(
            allocate(&state, "z", Some(&target)),
            Ok(placed("inprogress", 0))
        );
    }

    #[test]
    fn test_drop_on_self_is_current_placement() {
        let state = board(&[("a", "todo", 0), ("b", "todo", 1)]);
        let target = DropTarget::Card("b".into());
        assert_eq!(allocate(&state, "b", Some(&target)), Ok(placed("todo", 1)));
    }

    #[test]
    fn test_unknown_cards_abandon() {
        let state = board(&[("a", "todo", 0)]);
        let target = DropTarget::Card("ghost".into());
        assert_eq!(allocate(&state, "a", Some(&target)), Ok(None));
        let target = DropTarget::Card("a".into());
        assert_eq!(allocate(&state, "ghost", Some(&target)), Ok(None));
    }

    #[test]
    fn test_unknown_list_is_an_error() {
        let state = board(&[("a", "todo", 0)]);
        let target = DropTarget::List("icebox".into());
        assert_eq!(
            allocate(&state, "a", Some(&target)),
            Err(BoardError::UnknownList("icebox".into()))
        );
    }

    #[test]
    fn test_drop_target_wire_shape() {
        let json = serde_json::to_value(DropTarget::Card("c1".into())).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "card", "id": "c1" }));
    }
}
