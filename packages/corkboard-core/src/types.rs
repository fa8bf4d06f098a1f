use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The buckets every board starts with, in display order.
pub const DEFAULT_LISTS: &[(&str, &str)] = &[
    ("todo", "To Do"),
    ("inprogress", "In Progress"),
    ("done", "Done"),
];

/// One of the fixed lists a card can live in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListDef {
    pub id: String,
    pub title: String,
}

impl ListDef {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
        }
    }
}

pub fn default_lists() -> Vec<ListDef> {
    DEFAULT_LISTS
        .iter()
        .map(|(id, title)| ListDef::new(id, title))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub file_name: String,
    pub file_path: String,
    pub file_type: String,
    #[serde(default)]
    pub file_size: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Metadata of a file already uploaded to file storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAttachment {
    pub file_name: String,
    /// Location in file storage, e.g. `card-<id>/<stamp>.pdf`.
    pub file_path: String,
    pub file_type: String,
    #[serde(default)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub is_completed: bool,
    pub position: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default)]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A label defined on the board; cards reference it by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardLabel {
    pub id: String,
    pub name: String,
    pub color: String,
}

/// A card as held in local board state.
///
/// Only `list_id` and `position` are managed by the reconciliation engine;
/// the rest is payload carried through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub title: String,
    pub list_id: String,
    pub position: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checklists: Vec<ChecklistItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activities: Vec<ActivityRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Card {
    pub fn new(id: &str, title: &str, list_id: &str, position: u32) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            list_id: list_id.to_string(),
            position,
            labels: Vec::new(),
            due_date: None,
            attachments: Vec::new(),
            checklists: Vec::new(),
            activities: Vec::new(),
            created_at: None,
        }
    }

    /// Overlay a row received from the store onto this card.
    /// Row columns replace the stored values; nested collections the row
    /// does not carry are kept.
    pub fn merged_with(&self, record: CardRecord) -> Card {
        Card {
            id: record.id,
            title: record.title,
            list_id: record.list_id,
            position: record.position,
            labels: record.labels,
            due_date: record.due_date,
            attachments: record
                .attachments
                .unwrap_or_else(|| self.attachments.clone()),
            checklists: record
                .checklists
                .unwrap_or_else(|| self.checklists.clone()),
            activities: record
                .activities
                .unwrap_or_else(|| self.activities.clone()),
            created_at: record.created_at.or(self.created_at),
        }
    }

    /// Apply a partial update. Fields absent from the patch are untouched.
    pub fn apply_patch(&mut self, patch: &CardPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(list_id) = &patch.list_id {
            self.list_id = list_id.clone();
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
        if let Some(labels) = &patch.labels {
            self.labels = labels.clone();
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
    }
}

/// A card row as it travels through the store and the change stream.
/// Nested collections are `None` when the row does not include them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    pub id: String,
    pub title: String,
    pub list_id: String,
    #[serde(default)]
    pub position: u32,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklists: Option<Vec<ChecklistItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activities: Option<Vec<ActivityRecord>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<CardRecord> for Card {
    fn from(record: CardRecord) -> Self {
        Card {
            id: record.id,
            title: record.title,
            list_id: record.list_id,
            position: record.position,
            labels: record.labels,
            due_date: record.due_date,
            attachments: record.attachments.unwrap_or_default(),
            checklists: record.checklists.unwrap_or_default(),
            activities: record.activities.unwrap_or_default(),
            created_at: record.created_at,
        }
    }
}

impl From<&Card> for CardRecord {
    /// The bare row: nested collections are left out, as the change stream
    /// delivers them.
    fn from(card: &Card) -> Self {
        CardRecord {
            id: card.id.clone(),
            title: card.title.clone(),
            list_id: card.list_id.clone(),
            position: card.position,
            labels: card.labels.clone(),
            due_date: card.due_date,
            attachments: None,
            checklists: None,
            activities: None,
            created_at: card.created_at,
        }
    }
}

/// Partial card update sent to the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CardPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    /// `Some(None)` clears the due date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<DateTime<Utc>>>,
}

impl CardPatch {
    pub fn placement(list_id: &str, position: u32) -> Self {
        Self {
            list_id: Some(list_id.to_string()),
            position: Some(position),
            ..Self::default()
        }
    }

    pub fn touches_placement(&self) -> bool {
        self.list_id.is_some() || self.position.is_some()
    }
}

/// What the user filled in to create a card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardDraft {
    pub title: String,
    pub list_id: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Insert request for the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCard {
    pub board_id: String,
    pub list_id: String,
    pub title: String,
    pub position: u32,
    pub due_date: Option<DateTime<Utc>>,
    pub labels: Vec<String>,
}

/// Full state of a board at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub board_id: String,
    pub title: String,
    #[serde(default)]
    pub labels: Vec<BoardLabel>,
    #[serde(default)]
    pub cards: Vec<Card>,
}

/// Activity kinds written to the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    CreatedCard,
    MovedCard,
    DeletedCard,
    AddedChecklist,
    AttachedFile,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::CreatedCard => "created_card",
            ActivityAction::MovedCard => "moved_card",
            ActivityAction::DeletedCard => "deleted_card",
            ActivityAction::AddedChecklist => "added_checklist",
            ActivityAction::AttachedFile => "attached_file",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, title: &str, list_id: &str, position: u32) -> CardRecord {
        CardRecord::from(&Card::new(id, title, list_id, position))
    }

    #[test]
    fn test_merge_keeps_nested_collections_missing_from_row() {
        let mut card = Card::new("c1", "Write report", "todo", 0);
        card.checklists.push(ChecklistItem {
            id: "i1".to_string(),
            title: "Outline".to_string(),
            is_completed: false,
            position: 0,
            created_at: Utc::now(),
        });

        let merged = card.merged_with(record("c1", "Write final report", "done", 3));
        assert_eq!(merged.title, "Write final report");
        assert_eq!(merged.list_id, "done");
        assert_eq!(merged.position, 3);
        assert_eq!(merged.checklists.len(), 1);
    }

    #[test]
    fn test_merge_replaces_nested_collections_present_in_row() {
        let mut card = Card::new("c1", "Task", "todo", 0);
        card.attachments.push(Attachment {
            id: "a1".to_string(),
            file_name: "brief.pdf".to_string(),
            file_path: "card-c1/1.pdf".to_string(),
            file_type: "application/pdf".to_string(),
            file_size: Some(2048),
            created_at: Utc::now(),
        });

        let mut row = record("c1", "Task", "todo", 0);
        row.attachments = Some(Vec::new());
        assert!(card.merged_with(row).attachments.is_empty());
    }

    #[test]
    fn test_apply_patch_only_touches_given_fields() {
        let mut card = Card::new("c1", "Task", "todo", 2);
        card.labels = vec!["l1".to_string()];
        card.apply_patch(&CardPatch {
            title: Some("Renamed".to_string()),
            due_date: Some(None),
            ..CardPatch::default()
        });
        assert_eq!(card.title, "Renamed");
        assert_eq!(card.position, 2);
        assert_eq!(card.labels, vec!["l1".to_string()]);
        assert!(card.due_date.is_none());
    }

    #[test]
    fn test_patch_serializes_only_present_fields() {
        let json = serde_json::to_value(CardPatch::placement("done", 4)).unwrap();
        assert_eq!(json, serde_json::json!({ "list_id": "done", "position": 4 }));
    }

    #[test]
    fn test_card_record_deserializes_row_without_relations() {
        let row: CardRecord = serde_json::from_str(
            r#"{"id":"c9","title":"Ship","list_id":"inprogress","position":1,
                "board_id":"b1","due_date":null,"labels":[]}"#,
        )
        .unwrap();
        assert_eq!(row.list_id, "inprogress");
        assert!(row.checklists.is_none());
    }
}
