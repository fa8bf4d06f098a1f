/// Optimistic and confirmed card mutations.
///
/// Moves are applied to local state first and written afterwards; a failed
/// write puts the touched lists back the way they were. Every other mutation
/// is validated, written, and only reflected locally once the store accepted
/// it, so the echo that comes back over the change stream is a no-op.
///
/// The mutator never awaits anything itself. It hands out `'static` futures
/// so the session can keep draining the change stream while they run.
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::json;

use crate::board::{BoardError, BoardState};
use crate::position::{allocate, DropTarget, Placement};
use crate::remote::{ActivityLog, CardWriter, RemoteError};
use crate::sync::merger::{replay, upsert_record, MergeOutcome};
use crate::sync::pending::PendingWrites;
use crate::types::*;

pub type WriteFuture<T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'static>>;
pub type ActivityFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MutationError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Board(#[from] BoardError),

    #[error("Card {0} is still being moved")]
    MoveInFlight(String),
}

/// A move applied locally and waiting for its write.
#[derive(Debug, Clone, PartialEq)]
pub struct MovePlan {
    pub card_id: String,
    pub from_list: String,
    /// Where the card landed locally.
    pub placement: Placement,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// Abandoned gesture or a drop that changes nothing. No write was made.
    Unchanged,
    Committed(Placement),
    RolledBack(RemoteError),
}

pub struct OptimisticMutator {
    writer: Arc<dyn CardWriter>,
    activity: Arc<dyn ActivityLog>,
    record_activity: bool,
}

impl OptimisticMutator {
    pub fn new(
        writer: Arc<dyn CardWriter>,
        activity: Arc<dyn ActivityLog>,
        record_activity: bool,
    ) -> Self {
        Self {
            writer,
            activity,
            record_activity,
        }
    }

    // ── Moves ───────────────────────────────────────────────────────────

    /// Resolve the drop and apply it locally.
    ///
    /// Returns `None` when there is nothing to write: the gesture was
    /// abandoned or the card would end up exactly where it is.
    pub fn begin_move(
        &self,
        board: &mut BoardState,
        pending: &mut PendingWrites,
        card_id: &str,
        target: Option<&DropTarget>,
    ) -> Result<Option<MovePlan>, MutationError> {
        if pending.is_pending(card_id) {
            return Err(MutationError::MoveInFlight(card_id.to_string()));
        }
        let Some(placement) = allocate(board, card_id, target)? else {
            return Ok(None);
        };
        let Some(card) = board.card(card_id) else {
            return Ok(None);
        };
        if card.list_id == placement.list_id && card.position == placement.position {
            return Ok(None);
        }

        let from_list = card.list_id.clone();
        let snapshot = board.snapshot_lists(&[from_list.as_str(), placement.list_id.as_str()]);
        board.move_card(card_id, &placement.list_id, placement.position)?;

        // Clamping may have put the card below the requested slot.
        let landed = board
            .card(card_id)
            .map(|c| Placement {
                list_id: c.list_id.clone(),
                position: c.position,
            })
            .unwrap_or(placement);
        pending.register(card_id, landed.clone(), snapshot);

        log::debug!(
            "[corkboard.mutator.move] Card {} moved locally {} -> {}:{}",
            card_id,
            from_list,
            landed.list_id,
            landed.position
        );
        Ok(Some(MovePlan {
            card_id: card_id.to_string(),
            from_list,
            placement: landed,
        }))
    }

    /// Write only the moved card's new list and position.
    pub fn persist_move(&self, plan: &MovePlan) -> WriteFuture<()> {
        let writer = Arc::clone(&self.writer);
        let card_id = plan.card_id.clone();
        let patch = CardPatch::placement(&plan.placement.list_id, plan.placement.position);
        Box::pin(async move { writer.write_card(&card_id, patch).await })
    }

    /// Settle a move once its write resolved, replaying held-back events.
    pub fn finish_move(
        &self,
        board: &mut BoardState,
        pending: &mut PendingWrites,
        plan: &MovePlan,
        result: Result<(), RemoteError>,
    ) -> (MoveOutcome, Vec<MergeOutcome>) {
        let Some(resolved) = pending.resolve(&plan.card_id) else {
            log::warn!(
                "[corkboard.mutator.move] No pending entry for card {}",
                plan.card_id
            );
            return (MoveOutcome::Unchanged, Vec::new());
        };

        match result {
            Ok(()) => {
                log::info!(
                    "[corkboard.mutator.move] Card {} saved to {}:{}",
                    plan.card_id,
                    resolved.placement.list_id,
                    resolved.placement.position
                );
                let merged = replay(board, resolved.buffered, true);
                (MoveOutcome::Committed(resolved.placement), merged)
            }
            Err(err) => {
                log::warn!(
                    "[corkboard.mutator.move] Write for card {} failed, rolling back: {}",
                    plan.card_id,
                    err
                );
                board.restore(resolved.snapshot, &plan.card_id);
                let merged = replay(board, resolved.buffered, false);
                (MoveOutcome::RolledBack(err), merged)
            }
        }
    }

    pub fn move_activity(&self, plan: &MovePlan) -> Option<ActivityFuture> {
        self.record(
            &plan.card_id,
            ActivityAction::MovedCard,
            json!({
                "from_list": plan.from_list,
                "to_list": plan.placement.list_id,
                "position": plan.placement.position,
            }),
        )
    }

    // ── Confirmed mutations ─────────────────────────────────────────────

    /// Validate a draft into an insert request at the end of its list.
    pub fn prepare_card(
        &self,
        board: &BoardState,
        board_id: &str,
        draft: CardDraft,
    ) -> Result<NewCard, MutationError> {
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(MutationError::Validation("Card title is required".to_string()));
        }
        let list_id = draft
            .list_id
            .ok_or_else(|| MutationError::Validation("A list must be selected".to_string()))?;
        if !board.has_list(&list_id) {
            return Err(BoardError::UnknownList(list_id).into());
        }
        Ok(NewCard {
            board_id: board_id.to_string(),
            position: board.next_position(&list_id),
            list_id,
            title: title.to_string(),
            due_date: draft.due_date,
            labels: draft.labels,
        })
    }

    pub fn insert_card(&self, card: NewCard) -> WriteFuture<CardRecord> {
        let writer = Arc::clone(&self.writer);
        Box::pin(async move { writer.insert_card(card).await })
    }

    /// Merge the stored row exactly as its echo would be merged.
    pub fn finish_insert(&self, board: &mut BoardState, record: CardRecord) -> MergeOutcome {
        upsert_record(board, record)
    }

    pub fn card_activity(&self, record: &CardRecord) -> Option<ActivityFuture> {
        self.record(
            &record.id,
            ActivityAction::CreatedCard,
            json!({ "title": record.title }),
        )
    }

    pub fn check_delete(&self, board: &BoardState, card_id: &str) -> Result<(), MutationError> {
        if board.card(card_id).is_none() {
            return Err(BoardError::CardNotFound(card_id.to_string()).into());
        }
        Ok(())
    }

    /// A card the store no longer has counts as deleted.
    pub fn delete_card(&self, card_id: &str) -> WriteFuture<()> {
        let writer = Arc::clone(&self.writer);
        let card_id = card_id.to_string();
        Box::pin(async move {
            match writer.delete_card(&card_id).await {
                Err(RemoteError::NotFound(what)) => {
                    log::info!(
                        "[corkboard.mutator.delete] {} already gone from the store",
                        what
                    );
                    Ok(())
                }
                other => other,
            }
        })
    }

    pub fn finish_delete(&self, board: &mut BoardState, card_id: &str) {
        board.remove(card_id);
    }

    pub fn delete_activity(&self, card_id: &str) -> Option<ActivityFuture> {
        self.record(card_id, ActivityAction::DeletedCard, json!({}))
    }

    pub fn check_update(
        &self,
        board: &BoardState,
        pending: &PendingWrites,
        card_id: &str,
        patch: &CardPatch,
    ) -> Result<(), MutationError> {
        if board.card(card_id).is_none() {
            return Err(BoardError::CardNotFound(card_id.to_string()).into());
        }
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(MutationError::Validation("Card title is required".to_string()));
            }
        }
        if let Some(list_id) = &patch.list_id {
            if !board.has_list(list_id) {
                return Err(BoardError::UnknownList(list_id.clone()).into());
            }
        }
        if patch.touches_placement() && pending.is_pending(card_id) {
            return Err(MutationError::MoveInFlight(card_id.to_string()));
        }
        Ok(())
    }

    pub fn update_card(&self, card_id: &str, patch: CardPatch) -> WriteFuture<()> {
        let writer = Arc::clone(&self.writer);
        let card_id = card_id.to_string();
        Box::pin(async move { writer.write_card(&card_id, patch).await })
    }

    pub fn finish_update(
        &self,
        board: &mut BoardState,
        card_id: &str,
        patch: &CardPatch,
    ) -> Result<(), MutationError> {
        let mut card = board
            .card(card_id)
            .cloned()
            .ok_or_else(|| BoardError::CardNotFound(card_id.to_string()))?;
        card.apply_patch(patch);
        board.upsert(card)?;
        Ok(())
    }

    // ── Checklists ──────────────────────────────────────────────────────

    /// Validate a new checklist item; returns its position.
    pub fn check_checklist_item(
        &self,
        board: &BoardState,
        card_id: &str,
        title: &str,
    ) -> Result<u32, MutationError> {
        let card = board
            .card(card_id)
            .ok_or_else(|| BoardError::CardNotFound(card_id.to_string()))?;
        if title.trim().is_empty() {
            return Err(MutationError::Validation(
                "Checklist item title is required".to_string(),
            ));
        }
        Ok(card.checklists.len() as u32)
    }

    pub fn insert_checklist_item(
        &self,
        card_id: &str,
        title: &str,
        position: u32,
    ) -> WriteFuture<ChecklistItem> {
        let writer = Arc::clone(&self.writer);
        let card_id = card_id.to_string();
        let title = title.trim().to_string();
        Box::pin(async move {
            writer
                .insert_checklist_item(&card_id, &title, position)
                .await
        })
    }

    pub fn finish_checklist_item(
        &self,
        board: &mut BoardState,
        card_id: &str,
        item: ChecklistItem,
    ) -> Result<(), MutationError> {
        let mut card = board
            .card(card_id)
            .cloned()
            .ok_or_else(|| BoardError::CardNotFound(card_id.to_string()))?;
        card.checklists.retain(|existing| existing.id != item.id);
        card.checklists.push(item);
        board.upsert(card)?;
        Ok(())
    }

    pub fn checklist_activity(&self, card_id: &str, title: &str) -> Option<ActivityFuture> {
        self.record(
            card_id,
            ActivityAction::AddedChecklist,
            json!({ "title": title.trim() }),
        )
    }

    /// Look up an item and return the completion state it should flip to.
    pub fn check_toggle(
        &self,
        board: &BoardState,
        card_id: &str,
        item_id: &str,
    ) -> Result<bool, MutationError> {
        let card = board
            .card(card_id)
            .ok_or_else(|| BoardError::CardNotFound(card_id.to_string()))?;
        card.checklists
            .iter()
            .find(|item| item.id == item_id)
            .map(|item| !item.is_completed)
            .ok_or_else(|| MutationError::Validation(format!("Unknown checklist item {}", item_id)))
    }

    pub fn set_checklist_item(&self, item_id: &str, completed: bool) -> WriteFuture<()> {
        let writer = Arc::clone(&self.writer);
        let item_id = item_id.to_string();
        Box::pin(async move {
            writer
                .set_checklist_item_completed(&item_id, completed)
                .await
        })
    }

    pub fn finish_toggle(
        &self,
        board: &mut BoardState,
        card_id: &str,
        item_id: &str,
        completed: bool,
    ) -> Result<(), MutationError> {
        let mut card = board
            .card(card_id)
            .cloned()
            .ok_or_else(|| BoardError::CardNotFound(card_id.to_string()))?;
        if let Some(item) = card.checklists.iter_mut().find(|item| item.id == item_id) {
            item.is_completed = completed;
        }
        board.upsert(card)?;
        Ok(())
    }

    // ── Attachments ─────────────────────────────────────────────────────

    pub fn check_attachment(
        &self,
        board: &BoardState,
        card_id: &str,
        attachment: &NewAttachment,
    ) -> Result<(), MutationError> {
        if board.card(card_id).is_none() {
            return Err(BoardError::CardNotFound(card_id.to_string()).into());
        }
        if attachment.file_name.trim().is_empty() || attachment.file_path.trim().is_empty() {
            return Err(MutationError::Validation(
                "Attachment needs a file name and path".to_string(),
            ));
        }
        Ok(())
    }

    pub fn insert_attachment(
        &self,
        card_id: &str,
        attachment: NewAttachment,
    ) -> WriteFuture<Attachment> {
        let writer = Arc::clone(&self.writer);
        let card_id = card_id.to_string();
        Box::pin(async move { writer.insert_attachment(&card_id, attachment).await })
    }

    pub fn finish_attachment(
        &self,
        board: &mut BoardState,
        card_id: &str,
        attachment: Attachment,
    ) -> Result<(), MutationError> {
        let mut card = board
            .card(card_id)
            .cloned()
            .ok_or_else(|| BoardError::CardNotFound(card_id.to_string()))?;
        card.attachments.retain(|existing| existing.id != attachment.id);
        card.attachments.push(attachment);
        board.upsert(card)?;
        Ok(())
    }

    pub fn attachment_activity(&self, card_id: &str, file_name: &str) -> Option<ActivityFuture> {
        self.record(
            card_id,
            ActivityAction::AttachedFile,
            json!({ "file_name": file_name }),
        )
    }

    /// Best-effort activity write. Failures are logged and swallowed.
    fn record(
        &self,
        card_id: &str,
        action: ActivityAction,
        details: serde_json::Value,
    ) -> Option<ActivityFuture> {
        if !self.record_activity {
            return None;
        }
        let activity = Arc::clone(&self.activity);
        let card_id = card_id.to_string();
        Some(Box::pin(async move {
            if let Err(e) = activity.record(&card_id, action, details).await {
                log::warn!(
                    "[corkboard.mutator.activity] Failed to record {} for card {}: {}",
                    action.as_str(),
                    card_id,
                    e
                );
            }
        }))
    }
}
