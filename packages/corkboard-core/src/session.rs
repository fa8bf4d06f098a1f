/// Board session controller.
///
/// Owns one board's local state for the lifetime of a screen:
/// `idle -> loading -> ready -> torn_down`, with `loading -> error` when the
/// board cannot be fetched or subscribed to. Everything runs on the caller's
/// task. While a write is awaited the session keeps merging change events,
/// which is how events for a card that is mid-move get held back instead of
/// undoing the move.
///
/// A drag is split in two: `begin_drag` places the card locally and returns
/// at once, `settle_drag` awaits the write. Between the two the caller can
/// render the optimistic order. Local placements and merged remote changes
/// are also announced as notices so a listener can redraw while the session
/// is busy awaiting a write.
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::mpsc::error::TryRecvError;

use crate::board::BoardState;
use crate::config::BoardConfig;
use crate::mutator::{
    ActivityFuture, MoveOutcome, MovePlan, MutationError, OptimisticMutator, WriteFuture,
};
use crate::notice::Notice;
use crate::position::DropTarget;
use crate::remote::{ActivityLog, CardWriter, ChangeStream, RemoteError, SnapshotLoader};
use crate::search::{CardFilter, FilterOptions};
use crate::sync::event::ChangeEvent;
use crate::sync::merger::{apply_event, MergeOutcome};
use crate::sync::pending::PendingWrites;
use crate::sync::subscription::Subscription;
use crate::types::{BoardLabel, Card, CardDraft, CardPatch, NewAttachment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Loading,
    Ready,
    Error,
    TornDown,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Board session is not ready ({0:?})")]
    NotReady(SessionState),

    #[error("Invalid session transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
}

/// The external services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub loader: Arc<dyn SnapshotLoader>,
    pub writer: Arc<dyn CardWriter>,
    pub stream: Arc<dyn ChangeStream>,
    pub activity: Arc<dyn ActivityLog>,
}

impl Collaborators {
    /// Use one backend for every role.
    pub fn from_remote<R>(remote: Arc<R>) -> Self
    where
        R: SnapshotLoader + CardWriter + ChangeStream + ActivityLog + 'static,
    {
        Self {
            loader: remote.clone(),
            writer: remote.clone(),
            stream: remote.clone(),
            activity: remote,
        }
    }
}

/// A move already applied to local state whose write is still out.
#[must_use = "the card stays pending until the move is settled"]
pub struct StartedMove {
    plan: MovePlan,
    write: WriteFuture<()>,
}

impl StartedMove {
    pub fn plan(&self) -> &MovePlan {
        &self.plan
    }
}

enum Step<T> {
    Done(T),
    Event(Option<ChangeEvent>),
}

pub struct BoardSession {
    board_id: String,
    config: BoardConfig,
    loader: Arc<dyn SnapshotLoader>,
    stream: Arc<dyn ChangeStream>,
    mutator: OptimisticMutator,
    state: SessionState,
    board: BoardState,
    title: String,
    labels: Vec<BoardLabel>,
    pending: PendingWrites,
    subscription: Option<Subscription>,
    notices: broadcast::Sender<Notice>,
}

impl BoardSession {
    pub fn new(board_id: &str, config: BoardConfig, collaborators: Collaborators) -> Self {
        let (notices, _) = broadcast::channel(config.notice_capacity.max(1));
        let mutator = OptimisticMutator::new(
            collaborators.writer,
            collaborators.activity,
            config.record_activity,
        );
        Self {
            board_id: board_id.to_string(),
            board: BoardState::new(&config.lists),
            config,
            loader: collaborators.loader,
            stream: collaborators.stream,
            mutator,
            state: SessionState::Idle,
            title: String::new(),
            labels: Vec::new(),
            pending: PendingWrites::new(),
            subscription: None,
            notices,
        }
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn labels(&self) -> &[BoardLabel] {
        &self.labels
    }

    pub fn board(&self) -> &BoardState {
        &self.board
    }

    pub fn is_pending(&self, card_id: &str) -> bool {
        self.pending.is_pending(card_id)
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Change events received but not merged yet.
    pub fn queued_events(&self) -> usize {
        self.subscription
            .as_ref()
            .map_or(0, |subscription| subscription.backlog())
    }

    /// Fetch the board and open its change stream.
    pub async fn load(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: SessionState::Loading,
            });
        }
        self.state = SessionState::Loading;

        let loaded = self.loader.load_board(&self.board_id).await;
        let snapshot = match loaded {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(self.fail_load(e)),
        };

        let (board, rejected) = BoardState::seed(&self.config.lists, snapshot.cards);
        for card in &rejected {
            log::warn!(
                "[corkboard.session.load] Skipping card {} in unknown list {}",
                card.id,
                card.list_id
            );
        }

        let subscription = match Subscription::open(Arc::clone(&self.stream), &self.board_id) {
            Ok(subscription) => subscription,
            Err(e) => return Err(self.fail_load(e)),
        };

        self.board = board;
        self.title = snapshot.title;
        self.labels = snapshot.labels;
        self.subscription = Some(subscription);
        self.state = SessionState::Ready;
        log::info!(
            "[corkboard.session.load] Board {} ready with {} cards",
            self.board_id,
            self.board.len()
        );
        Ok(())
    }

    fn fail_load(&mut self, err: RemoteError) -> SessionError {
        log::warn!(
            "[corkboard.session.load] Board {} unavailable: {}",
            self.board_id,
            err
        );
        self.state = SessionState::Error;
        self.notify(Notice::BoardUnavailable {
            board_id: self.board_id.clone(),
            message: err.to_string(),
        });
        err.into()
    }

    /// Release the change stream. Events not merged yet are dropped.
    pub fn teardown(&mut self) {
        if self.state == SessionState::TornDown {
            return;
        }
        self.subscription = None;
        self.state = SessionState::TornDown;
        log::info!("[corkboard.session.teardown] Board {} closed", self.board_id);
    }

    // ── Mutations ───────────────────────────────────────────────────────

    /// Entry point for the end of a drag gesture: place, then settle.
    pub async fn drag_end(
        &mut self,
        card_id: &str,
        target: Option<DropTarget>,
    ) -> Result<MoveOutcome, SessionError> {
        match self.begin_drag(card_id, target)? {
            Some(started) => self.settle_drag(started).await,
            None => Ok(MoveOutcome::Unchanged),
        }
    }

    /// Place the card locally without waiting on the store. `None` for an
    /// abandoned or no-op drop. Until the returned move is settled the card
    /// counts as pending and cannot be dragged again.
    pub fn begin_drag(
        &mut self,
        card_id: &str,
        target: Option<DropTarget>,
    ) -> Result<Option<StartedMove>, SessionError> {
        self.ensure_ready()?;
        let plan = match self.mutator.begin_move(
            &mut self.board,
            &mut self.pending,
            card_id,
            target.as_ref(),
        ) {
            Ok(Some(plan)) => plan,
            Ok(None) => return Ok(None),
            Err(e) => return Err(self.reject(e)),
        };

        self.notify(Notice::CardMovedLocally {
            card_id: plan.card_id.clone(),
            list_id: plan.placement.list_id.clone(),
            position: plan.placement.position,
        });
        let write = self.mutator.persist_move(&plan);
        Ok(Some(StartedMove { plan, write }))
    }

    /// Await the write of a started move, then commit or roll it back.
    pub async fn settle_drag(&mut self, started: StartedMove) -> Result<MoveOutcome, SessionError> {
        let StartedMove { plan, write } = started;
        let card_id = plan.card_id.clone();

        let result = self.drive(write).await;
        let (outcome, merged) =
            self.mutator
                .finish_move(&mut self.board, &mut self.pending, &plan, result);
        for outcome in merged {
            self.report_merge(&card_id, outcome);
        }

        match &outcome {
            MoveOutcome::Committed(_) => {
                self.notify(Notice::CardMoved {
                    card_id: card_id.clone(),
                });
                let activity = self.mutator.move_activity(&plan);
                self.run_activity(activity).await;
            }
            MoveOutcome::RolledBack(err) => self.notify(Notice::MoveFailed {
                card_id: card_id.clone(),
                message: err.to_string(),
            }),
            MoveOutcome::Unchanged => {}
        }
        Ok(outcome)
    }

    /// Create a card at the end of its list. Returns the stored id.
    pub async fn add_card(&mut self, draft: CardDraft) -> Result<String, SessionError> {
        self.ensure_ready()?;
        let new_card = self
            .mutator
            .prepare_card(&self.board, &self.board_id, draft)
            .map_err(|e| self.reject(e))?;

        let record = self
            .drive(self.mutator.insert_card(new_card))
            .await
            .map_err(|e| self.write_failed(e))?;
        let card_id = record.id.clone();
        let activity = self.mutator.card_activity(&record);
        let outcome = self.mutator.finish_insert(&mut self.board, record);
        self.report_merge(&card_id, outcome);

        self.notify(Notice::CardAdded {
            card_id: card_id.clone(),
        });
        self.run_activity(activity).await;
        Ok(card_id)
    }

    pub async fn delete_card(&mut self, card_id: &str) -> Result<(), SessionError> {
        self.ensure_ready()?;
        self.mutator
            .check_delete(&self.board, card_id)
            .map_err(|e| self.reject(e))?;

        self.drive(self.mutator.delete_card(card_id))
            .await
            .map_err(|e| self.write_failed(e))?;
        self.mutator.finish_delete(&mut self.board, card_id);

        self.notify(Notice::CardDeleted {
            card_id: card_id.to_string(),
        });
        let activity = self.mutator.delete_activity(card_id);
        self.run_activity(activity).await;
        Ok(())
    }

    pub async fn update_card(&mut self, card_id: &str, patch: CardPatch) -> Result<(), SessionError> {
        self.ensure_ready()?;
        self.mutator
            .check_update(&self.board, &self.pending, card_id, &patch)
            .map_err(|e| self.reject(e))?;

        self.drive(self.mutator.update_card(card_id, patch.clone()))
            .await
            .map_err(|e| self.write_failed(e))?;
        // The card may have been deleted remotely while the write was out.
        if let Err(e) = self.mutator.finish_update(&mut self.board, card_id, &patch) {
            log::warn!(
                "[corkboard.session.update] Card {} changed before the update landed: {}",
                card_id,
                e
            );
        }

        self.notify(Notice::CardUpdated {
            card_id: card_id.to_string(),
        });
        Ok(())
    }

    /// Returns the new item's id.
    pub async fn add_checklist_item(
        &mut self,
        card_id: &str,
        title: &str,
    ) -> Result<String, SessionError> {
        self.ensure_ready()?;
        let position = self
            .mutator
            .check_checklist_item(&self.board, card_id, title)
            .map_err(|e| self.reject(e))?;

        let item = self
            .drive(self.mutator.insert_checklist_item(card_id, title, position))
            .await
            .map_err(|e| self.write_failed(e))?;
        let item_id = item.id.clone();
        if let Err(e) = self.mutator.finish_checklist_item(&mut self.board, card_id, item) {
            log::warn!(
                "[corkboard.session.checklist] Card {} gone before item {} landed: {}",
                card_id,
                item_id,
                e
            );
        }

        self.notify(Notice::ChecklistUpdated {
            card_id: card_id.to_string(),
        });
        let activity = self.mutator.checklist_activity(card_id, title);
        self.run_activity(activity).await;
        Ok(item_id)
    }

    /// Flip an item's completed flag. Returns the new value.
    pub async fn toggle_checklist_item(
        &mut self,
        card_id: &str,
        item_id: &str,
    ) -> Result<bool, SessionError> {
        self.ensure_ready()?;
        let completed = self
            .mutator
            .check_toggle(&self.board, card_id, item_id)
            .map_err(|e| self.reject(e))?;

        self.drive(self.mutator.set_checklist_item(item_id, completed))
            .await
            .map_err(|e| self.write_failed(e))?;
        if let Err(e) = self
            .mutator
            .finish_toggle(&mut self.board, card_id, item_id, completed)
        {
            log::warn!(
                "[corkboard.session.checklist] Card {} gone before toggle landed: {}",
                card_id,
                e
            );
        }

        self.notify(Notice::ChecklistUpdated {
            card_id: card_id.to_string(),
        });
        Ok(completed)
    }

    /// Attach an already uploaded file. Returns the attachment id.
    pub async fn add_attachment(
        &mut self,
        card_id: &str,
        attachment: NewAttachment,
    ) -> Result<String, SessionError> {
        self.ensure_ready()?;
        self.mutator
            .check_attachment(&self.board, card_id, &attachment)
            .map_err(|e| self.reject(e))?;

        let file_name = attachment.file_name.clone();
        let stored = self
            .drive(self.mutator.insert_attachment(card_id, attachment))
            .await
            .map_err(|e| self.write_failed(e))?;
        let attachment_id = stored.id.clone();
        if let Err(e) = self.mutator.finish_attachment(&mut self.board, card_id, stored) {
            log::warn!(
                "[corkboard.session.attachment] Card {} gone before attachment {} landed: {}",
                card_id,
                attachment_id,
                e
            );
        }

        self.notify(Notice::CardUpdated {
            card_id: card_id.to_string(),
        });
        let activity = self.mutator.attachment_activity(card_id, &file_name);
        self.run_activity(activity).await;
        Ok(attachment_id)
    }

    // ── Change stream ───────────────────────────────────────────────────

    /// Wait for the next change event and merge it.
    /// `None` once the session has no open stream.
    pub async fn next_event(&mut self) -> Option<MergeOutcome> {
        if self.state != SessionState::Ready {
            return None;
        }
        let event = self.subscription.as_mut()?.recv().await;
        match event {
            Some(event) => Some(self.merge(event)),
            None => {
                self.stream_closed();
                None
            }
        }
    }

    /// Merge every event already queued, without waiting. Returns how many
    /// were merged.
    pub fn process_available_events(&mut self) -> usize {
        let mut merged = 0;
        while self.state == SessionState::Ready {
            let Some(subscription) = self.subscription.as_mut() else {
                break;
            };
            match subscription.try_recv() {
                Ok(event) => {
                    self.merge(event);
                    merged += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.stream_closed();
                    break;
                }
            }
        }
        merged
    }

    fn merge(&mut self, event: ChangeEvent) -> MergeOutcome {
        if self.state == SessionState::TornDown {
            return MergeOutcome::Ignored;
        }
        let card_id = event.card_id().to_string();
        log::debug!(
            "[corkboard.session.event] {} card {}",
            event.kind(),
            card_id
        );
        let before = self.board.card(&card_id).cloned();
        let outcome = apply_event(&mut self.board, &mut self.pending, event);
        // Echoes of our own writes leave the card as it was.
        if outcome == MergeOutcome::Applied && self.board.card(&card_id) != before.as_ref() {
            self.notify(Notice::BoardChanged {
                card_id: card_id.clone(),
            });
        }
        self.report_merge(&card_id, outcome.clone());
        outcome
    }

    fn stream_closed(&mut self) {
        log::warn!(
            "[corkboard.session.event] Change stream for board {} closed",
            self.board_id
        );
        self.subscription = None;
        self.notify(Notice::StreamClosed {
            board_id: self.board_id.clone(),
        });
    }

    // ── Rendering ───────────────────────────────────────────────────────

    /// Cards of a list matching a search query, in display order.
    pub fn visible_cards(&self, list_id: &str, query: &str) -> Vec<&Card> {
        self.filter_cards(list_id, &CardFilter::compile(query, FilterOptions::default()))
    }

    pub fn filter_cards(&self, list_id: &str, filter: &CardFilter) -> Vec<&Card> {
        self.board
            .cards_in_list(list_id)
            .iter()
            .filter(|card| filter.matches(card, &self.labels))
            .collect()
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn ensure_ready(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Ready => Ok(()),
            other => Err(SessionError::NotReady(other)),
        }
    }

    /// Await a write while merging change events that arrive meanwhile.
    async fn drive<F>(&mut self, mut fut: F) -> F::Output
    where
        F: Future + Unpin,
    {
        loop {
            let step = match self.subscription.as_mut() {
                Some(subscription) => tokio::select! {
                    biased;
                    event = subscription.recv() => Step::Event(event),
                    out = &mut fut => Step::Done(out),
                },
                None => Step::Done((&mut fut).await),
            };
            match step {
                Step::Done(out) => return out,
                Step::Event(Some(event)) => {
                    self.merge(event);
                }
                Step::Event(None) => self.stream_closed(),
            }
        }
    }

    async fn run_activity(&mut self, activity: Option<ActivityFuture>) {
        if let Some(activity) = activity {
            self.drive(activity).await;
        }
    }

    fn report_merge(&self, card_id: &str, outcome: MergeOutcome) {
        if let MergeOutcome::Rejected(e) = outcome {
            self.notify(Notice::EventRejected {
                card_id: card_id.to_string(),
                message: e.to_string(),
            });
        }
    }

    fn reject(&self, err: MutationError) -> SessionError {
        log::warn!("[corkboard.session.validate] {}", err);
        self.notify(Notice::ValidationFailed {
            message: err.to_string(),
        });
        err.into()
    }

    fn write_failed(&self, err: RemoteError) -> SessionError {
        log::warn!("[corkboard.session.write] {}", err);
        self.notify(Notice::WriteFailed {
            message: err.to_string(),
        });
        err.into()
    }

    fn notify(&self, notice: Notice) {
        // No receivers is fine.
        let _ = self.notices.send(notice);
    }
}
