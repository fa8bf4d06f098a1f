/// Scoped change-stream subscription.
///
/// Opening subscribes the board on the stream; dropping the guard
/// unsubscribes and discards anything still queued, on every exit path.
///
/// The queue is unbounded so the stream never drops or blocks on a change.
/// The owner must keep draining it; `backlog` reports what is waiting.
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::event::ChangeEvent;
use crate::remote::{ChangeStream, RemoteError, SubscriptionHandle};

pub struct Subscription {
    board_id: String,
    handle: SubscriptionHandle,
    stream: Arc<dyn ChangeStream>,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    pub fn open(stream: Arc<dyn ChangeStream>, board_id: &str) -> Result<Self, RemoteError> {
        let (sink, events) = mpsc::unbounded_channel();
        let handle = stream.subscribe(board_id, sink)?;
        log::info!(
            "[corkboard.stream.subscribe] Subscribed to board {} ({:?})",
            board_id,
            handle
        );
        Ok(Self {
            board_id: board_id.to_string(),
            handle,
            stream,
            events,
        })
    }

    pub fn backlog(&self) -> usize {
        self.events.len()
    }

    /// Wait for the next event. `None` once the stream side hung up.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Result<ChangeEvent, TryRecvError> {
        self.events.try_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.events.close();
        self.stream.unsubscribe(self.handle);
        log::info!(
            "[corkboard.stream.unsubscribe] Unsubscribed from board {} ({:?})",
            self.board_id,
            self.handle
        );
    }
}
