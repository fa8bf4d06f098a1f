pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::sync::event::ChangeEvent;
use crate::types::{
    ActivityAction, Attachment, BoardSnapshot, CardPatch, CardRecord, ChecklistItem, NewAttachment,
    NewCard,
};

/// Loads the full state of a board at session start.
#[async_trait]
pub trait SnapshotLoader: Send + Sync {
    /// Fails with `NotFound` when the board does not exist.
    async fn load_board(&self, board_id: &str) -> Result<BoardSnapshot, RemoteError>;
}

/// Writes card changes to the store.
#[async_trait]
pub trait CardWriter: Send + Sync {
    /// Update some fields of a card.
    async fn write_card(&self, card_id: &str, patch: CardPatch) -> Result<(), RemoteError>;

    /// Create a card and return the stored row.
    async fn insert_card(&self, card: NewCard) -> Result<CardRecord, RemoteError>;

    async fn delete_card(&self, card_id: &str) -> Result<(), RemoteError>;

    async fn insert_checklist_item(
        &self,
        card_id: &str,
        title: &str,
        position: u32,
    ) -> Result<ChecklistItem, RemoteError>;

    async fn set_checklist_item_completed(
        &self,
        item_id: &str,
        completed: bool,
    ) -> Result<(), RemoteError>;

    /// Record an uploaded file against a card. The upload itself happens
    /// elsewhere.
    async fn insert_attachment(
        &self,
        card_id: &str,
        attachment: NewAttachment,
    ) -> Result<Attachment, RemoteError>;
}

/// Push channel of card changes for one board.
pub trait ChangeStream: Send + Sync {
    /// Start delivering the board's change events into `sink`.
    fn subscribe(
        &self,
        board_id: &str,
        sink: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Result<SubscriptionHandle, RemoteError>;

    /// Stop delivering. Unknown handles are ignored.
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// Per-card activity history. Best effort: callers log failures and move on.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn record(
        &self,
        card_id: &str,
        action: ActivityAction,
        details: serde_json::Value,
    ) -> Result<(), RemoteError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionHandle(pub u64);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(String),
}
