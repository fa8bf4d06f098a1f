/// In-memory remote store.
///
/// Implements every collaborator trait against process memory:
/// - writes echo back as change events to the board's subscribers
/// - queued failures make the next writes fail, for rollback paths
/// - `push_event` injects events as if another client had written them
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use super::{
    ActivityLog, CardWriter, ChangeStream, RemoteError, SnapshotLoader, SubscriptionHandle,
};
use crate::sync::event::ChangeEvent;
use crate::types::*;

/// One entry written through [`ActivityLog`].
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEntry {
    pub card_id: String,
    pub action: ActivityAction,
    pub details: serde_json::Value,
}

struct StoredBoard {
    title: String,
    labels: Vec<BoardLabel>,
}

struct Subscriber {
    board_id: String,
    sink: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct Inner {
    boards: HashMap<String, StoredBoard>,
    /// card_id -> (board_id, card)
    cards: HashMap<String, (String, Card)>,
    subscribers: HashMap<SubscriptionHandle, Subscriber>,
    next_handle: u64,
    activity: Vec<ActivityEntry>,
    write_failures: VecDeque<RemoteError>,
    activity_failing: bool,
    subscribe_failing: bool,
    load_failure: Option<RemoteError>,
}

impl Inner {
    fn take_failure(&mut self) -> Result<(), RemoteError> {
        match self.write_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn broadcast(&self, board_id: &str, event: ChangeEvent) {
        for (handle, subscriber) in &self.subscribers {
            if subscriber.board_id != board_id {
                continue;
            }
            if subscriber.sink.send(event.clone()).is_err() {
                log::debug!(
                    "[corkboard.memory.broadcast] Subscriber {:?} is gone",
                    handle
                );
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_board(&self, board_id: &str, title: &str) {
        self.lock().boards.insert(
            board_id.to_string(),
            StoredBoard {
                title: title.to_string(),
                labels: Vec::new(),
            },
        );
    }

    pub fn add_label(&self, board_id: &str, label: BoardLabel) {
        if let Some(board) = self.lock().boards.get_mut(board_id) {
            board.labels.push(label);
        }
    }

    /// Store a card without notifying anyone.
    pub fn seed_card(&self, board_id: &str, card: Card) {
        self.lock()
            .cards
            .insert(card.id.clone(), (board_id.to_string(), card));
    }

    /// Deliver an event to the board's subscribers without storing anything.
    pub fn push_event(&self, board_id: &str, event: ChangeEvent) {
        self.lock().broadcast(board_id, event);
    }

    /// Make the next card write fail with `err`. Failures queue up.
    pub fn fail_next_write(&self, err: RemoteError) {
        self.lock().write_failures.push_back(err);
    }

    pub fn fail_next_load(&self, err: RemoteError) {
        self.lock().load_failure = Some(err);
    }

    pub fn set_activity_failing(&self, failing: bool) {
        self.lock().activity_failing = failing;
    }

    pub fn set_subscribe_failing(&self, failing: bool) {
        self.lock().subscribe_failing = failing;
    }

    pub fn stored_card(&self, card_id: &str) -> Option<Card> {
        self.lock().cards.get(card_id).map(|(_, card)| card.clone())
    }

    pub fn activity(&self) -> Vec<ActivityEntry> {
        self.lock().activity.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Hang up on every subscriber, as a dropped connection would.
    pub fn close_streams(&self) {
        self.lock().subscribers.clear();
    }
}

#[async_trait]
impl SnapshotLoader for MemoryRemote {
    async fn load_board(&self, board_id: &str) -> Result<BoardSnapshot, RemoteError> {
        let mut inner = self.lock();
        if let Some(err) = inner.load_failure.take() {
            return Err(err);
        }
        let board = inner
            .boards
            .get(board_id)
            .ok_or_else(|| RemoteError::NotFound(format!("board {}", board_id)))?;
        let mut cards: Vec<Card> = inner
            .cards
            .values()
            .filter(|(owner, _)| owner == board_id)
            .map(|(_, card)| card.clone())
            .collect();
        cards.sort_by(|a, b| a.position.cmp(&b.position));
        Ok(BoardSnapshot {
            board_id: board_id.to_string(),
            title: board.title.clone(),
            labels: board.labels.clone(),
            cards,
        })
    }
}

#[async_trait]
impl CardWriter for MemoryRemote {
    async fn write_card(&self, card_id: &str, patch: CardPatch) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.take_failure()?;
        let (board_id, card) = inner
            .cards
            .get_mut(card_id)
            .ok_or_else(|| RemoteError::NotFound(format!("card {}", card_id)))?;
        card.apply_patch(&patch);
        let board_id = board_id.clone();
        let row = CardRecord::from(&*card);
        inner.broadcast(&board_id, ChangeEvent::Updated(row));
        Ok(())
    }

    async fn insert_card(&self, new_card: NewCard) -> Result<CardRecord, RemoteError> {
        let mut inner = self.lock();
        inner.take_failure()?;
        if !inner.boards.contains_key(&new_card.board_id) {
            return Err(RemoteError::NotFound(format!("board {}", new_card.board_id)));
        }
        if new_card.title.trim().is_empty() {
            return Err(RemoteError::Validation("title must not be empty".to_string()));
        }
        let mut card = Card::new(
            &generate_id(),
            &new_card.title,
            &new_card.list_id,
            new_card.position,
        );
        card.labels = new_card.labels;
        card.due_date = new_card.due_date;
        card.created_at = Some(Utc::now());

        let row = CardRecord::from(&card);
        inner
            .cards
            .insert(card.id.clone(), (new_card.board_id.clone(), card));
        inner.broadcast(&new_card.board_id, ChangeEvent::Inserted(row.clone()));
        Ok(row)
    }

    async fn delete_card(&self, card_id: &str) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.take_failure()?;
        let (board_id, _) = inner
            .cards
            .remove(card_id)
            .ok_or_else(|| RemoteError::NotFound(format!("card {}", card_id)))?;
        inner.broadcast(&board_id, ChangeEvent::Deleted(card_id.to_string()));
        Ok(())
    }

    async fn insert_checklist_item(
        &self,
        card_id: &str,
        title: &str,
        position: u32,
    ) -> Result<ChecklistItem, RemoteError> {
        let mut inner = self.lock();
        inner.take_failure()?;
        let (_, card) = inner
            .cards
            .get_mut(card_id)
            .ok_or_else(|| RemoteError::NotFound(format!("card {}", card_id)))?;
        let item = ChecklistItem {
            id: generate_id(),
            title: title.to_string(),
            is_completed: false,
            position,
            created_at: Utc::now(),
        };
        card.checklists.push(item.clone());
        Ok(item)
    }

    async fn set_checklist_item_completed(
        &self,
        item_id: &str,
        completed: bool,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.take_failure()?;
        let item = inner
            .cards
            .values_mut()
            .flat_map(|(_, card)| card.checklists.iter_mut())
            .find(|item| item.id == item_id)
            .ok_or_else(|| RemoteError::NotFound(format!("checklist item {}", item_id)))?;
        item.is_completed = completed;
        Ok(())
    }

    async fn insert_attachment(
        &self,
        card_id: &str,
        attachment: NewAttachment,
    ) -> Result<Attachment, RemoteError> {
        let mut inner = self.lock();
        inner.take_failure()?;
        let (_, card) = inner
            .cards
            .get_mut(card_id)
            .ok_or_else(|| RemoteError::NotFound(format!("card {}", card_id)))?;
        let stored = Attachment {
            id: generate_id(),
            file_name: attachment.file_name,
            file_path: attachment.file_path,
            file_type: attachment.file_type,
            file_size: attachment.file_size,
            created_at: Utc::now(),
        };
        card.attachments.push(stored.clone());
        Ok(stored)
    }
}

impl ChangeStream for MemoryRemote {
    fn subscribe(
        &self,
        board_id: &str,
        sink: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Result<SubscriptionHandle, RemoteError> {
        let mut inner = self.lock();
        if inner.subscribe_failing {
            return Err(RemoteError::Transport("change stream unavailable".to_string()));
        }
        inner.next_handle += 1;
        let handle = SubscriptionHandle(inner.next_handle);
        inner.subscribers.insert(
            handle,
            Subscriber {
                board_id: board_id.to_string(),
                sink,
            },
        );
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.lock().subscribers.remove(&handle);
    }
}

#[async_trait]
impl ActivityLog for MemoryRemote {
    async fn record(
        &self,
        card_id: &str,
        action: ActivityAction,
        details: serde_json::Value,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        if inner.activity_failing {
            return Err(RemoteError::Transport("activity log unavailable".to_string()));
        }
        if let Some((_, card)) = inner.cards.get_mut(card_id) {
            card.activities.push(ActivityRecord {
                id: generate_id(),
                action: action.as_str().to_string(),
                details: details.clone(),
                user_id: None,
                created_at: Utc::now(),
            });
        }
        inner.activity.push(ActivityEntry {
            card_id: card_id.to_string(),
            action,
            details,
        });
        Ok(())
    }
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a 16 hex char id from a process-wide counter and the clock.
fn generate_id() -> String {
    let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut hasher = Sha256::new();
    hasher.update(seq.to_le_bytes());
    hasher.update(ts.to_le_bytes());
    hex::encode(&hasher.finalize()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_with_board() -> MemoryRemote {
        let remote = MemoryRemote::new();
        remote.add_board("b1", "Launch");
        remote.seed_card("b1", Card::new("c1", "Draft", "todo", 0));
        remote
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[test]
    fn test_generate_id_format() {
        let id = generate_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_id());
    }

    #[test]
    fn test_load_missing_board() {
        let remote = MemoryRemote::new();
        let err = block_on(remote.load_board("nope")).unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }

    #[test]
    fn test_write_echoes_to_board_subscribers() {
        let remote = remote_with_board();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (other_tx, mut other_rx) = mpsc::unbounded_channel();
        remote.subscribe("b1", tx).unwrap();
        remote.subscribe("b2", other_tx).unwrap();

        block_on(remote.write_card("c1", CardPatch::placement("done", 2))).unwrap();

        match rx.try_recv().unwrap() {
            ChangeEvent::Updated(row) => {
                assert_eq!(row.list_id, "done");
                assert_eq!(row.position, 2);
                assert!(row.checklists.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn test_queued_failure_applies_once() {
        let remote = remote_with_board();
        remote.fail_next_write(RemoteError::Transport("offline".into()));
        let first = block_on(remote.write_card("c1", CardPatch::placement("done", 0)));
        assert_eq!(first, Err(RemoteError::Transport("offline".into())));
        assert_eq!(remote.stored_card("c1").unwrap().list_id, "todo");

        block_on(remote.write_card("c1", CardPatch::placement("done", 0))).unwrap();
        assert_eq!(remote.stored_card("c1").unwrap().list_id, "done");
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let remote = remote_with_board();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = remote.subscribe("b1", tx).unwrap();
        remote.unsubscribe(handle);
        assert_eq!(remote.subscriber_count(), 0);

        block_on(remote.delete_card("c1")).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_attachment_is_stored_on_card() {
        let remote = remote_with_board();
        let stored = block_on(remote.insert_attachment(
            "c1",
            NewAttachment {
                file_name: "brief.pdf".into(),
                file_path: "card-c1/1700000000.pdf".into(),
                file_type: "application/pdf".into(),
                file_size: Some(1024),
            },
        ))
        .unwrap();
        assert_eq!(stored.file_name, "brief.pdf");
        assert_eq!(remote.stored_card("c1").unwrap().attachments, vec![stored]);

        let missing = block_on(remote.insert_attachment(
            "ghost",
            NewAttachment {
                file_name: "a.txt".into(),
                file_path: "card-ghost/1.txt".into(),
                file_type: "text/plain".into(),
                file_size: None,
            },
        ));
        assert!(matches!(missing, Err(RemoteError::NotFound(_))));
    }

    #[test]
    fn test_activity_is_attached_to_card() {
        let remote = remote_with_board();
        block_on(remote.record(
            "c1",
            ActivityAction::MovedCard,
            serde_json::json!({ "to_list": "done" }),
        ))
        .unwrap();
        assert_eq!(remote.activity().len(), 1);
        assert_eq!(
            remote.stored_card("c1").unwrap().activities[0].action,
            "moved_card"
        );
    }
}
