/// User-facing notices raised by a board session.
///
/// Sent over a tokio broadcast channel; a session with no listener simply
/// drops them.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// A dragged card was placed locally; its write is still out.
    CardMovedLocally {
        card_id: String,
        list_id: String,
        position: u32,
    },
    /// A remote change altered a card in local state.
    BoardChanged { card_id: String },
    CardMoved { card_id: String },
    MoveFailed { card_id: String, message: String },
    CardAdded { card_id: String },
    CardDeleted { card_id: String },
    CardUpdated { card_id: String },
    ChecklistUpdated { card_id: String },
    WriteFailed { message: String },
    ValidationFailed { message: String },
    /// A remote change could not be merged and was dropped.
    EventRejected { card_id: String, message: String },
    StreamClosed { board_id: String },
    /// The board could not be loaded; the caller should navigate away.
    BoardUnavailable { board_id: String, message: String },
}

impl Notice {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Notice::MoveFailed { .. }
                | Notice::WriteFailed { .. }
                | Notice::ValidationFailed { .. }
                | Notice::EventRejected { .. }
                | Notice::StreamClosed { .. }
                | Notice::BoardUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(Notice::MoveFailed {
            card_id: "c1".into(),
            message: "offline".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "kind": "move_failed", "card_id": "c1", "message": "offline" })
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(!Notice::CardMoved { card_id: "c1".into() }.is_error());
        assert!(!Notice::BoardChanged { card_id: "c1".into() }.is_error());
        assert!(Notice::StreamClosed { board_id: "b1".into() }.is_error());
    }
}
