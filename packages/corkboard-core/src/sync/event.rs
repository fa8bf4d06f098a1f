/// Change events pushed by the store for a board's cards.
///
/// Transports hand over loosely-typed payloads of the shape
/// `{"eventType": "INSERT" | "UPDATE" | "DELETE", "new": {...}, "old": {...}}`.
/// They are decoded into [`ChangeEvent`] here, before anything reaches the
/// merger.
use serde::{Deserialize, Serialize};

use crate::types::CardRecord;

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Inserted(CardRecord),
    Updated(CardRecord),
    Deleted(String),
}

impl ChangeEvent {
    pub fn card_id(&self) -> &str {
        match self {
            ChangeEvent::Inserted(record) | ChangeEvent::Updated(record) => &record.id,
            ChangeEvent::Deleted(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Inserted(_) => "inserted",
            ChangeEvent::Updated(_) => "updated",
            ChangeEvent::Deleted(_) => "deleted",
        }
    }

    /// Decode a raw JSON change payload.
    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        let wire: WireChange = serde_json::from_str(payload)?;
        Self::try_from(wire)
    }
}

/// The untyped payload as it comes off the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireChange {
    pub event_type: String,
    #[serde(default)]
    pub new: Option<serde_json::Value>,
    #[serde(default)]
    pub old: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct DeletedRow {
    id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed change payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown change kind: {0}")]
    UnknownKind(String),

    #[error("Change payload is missing its `{0}` record")]
    MissingRecord(&'static str),
}

impl TryFrom<WireChange> for ChangeEvent {
    type Error = DecodeError;

    fn try_from(wire: WireChange) -> Result<Self, Self::Error> {
        match wire.event_type.to_ascii_uppercase().as_str() {
            "INSERT" => {
                let new = wire.new.ok_or(DecodeError::MissingRecord("new"))?;
                Ok(ChangeEvent::Inserted(serde_json::from_value(new)?))
            }
            "UPDATE" => {
                let new = wire.new.ok_or(DecodeError::MissingRecord("new"))?;
                Ok(ChangeEvent::Updated(serde_json::from_value(new)?))
            }
            "DELETE" => {
                let old = wire.old.ok_or(DecodeError::MissingRecord("old"))?;
                let row: DeletedRow = serde_json::from_value(old)?;
                Ok(ChangeEvent::Deleted(row.id))
            }
            other => Err(DecodeError::UnknownKind(other.to_string())),
        }
    }
}
