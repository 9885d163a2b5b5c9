use crate::room::RoomCommand;
use parley_core::RoomId;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Lifecycle state a room publishes after every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomStatus {
    pub peer_count: usize,
    /// When the room last became empty; `None` while it has peers.
    pub empty_since: Option<Instant>,
    pub closed: bool,
}

/// Cloneable reference to a running room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    created_at: Instant,
    tx: mpsc::Sender<RoomCommand>,
    status: watch::Receiver<RoomStatus>,
}

impl RoomHandle {
    pub(crate) fn new(
        room_id: RoomId,
        created_at: Instant,
        tx: mpsc::Sender<RoomCommand>,
        status: watch::Receiver<RoomStatus>,
    ) -> Self {
        Self {
            room_id,
            created_at,
            tx,
            status,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn status(&self) -> RoomStatus {
        *self.status.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || self.status.borrow().closed
    }

    /// Whether both handles point at the same room session.
    pub fn same_session(&self, other: &RoomHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Closed, or empty for at least `grace`.
    pub fn is_idle(&self, now: Instant, grace: Duration) -> bool {
        let status = self.status();
        if status.closed {
            return true;
        }
        status.peer_count == 0
            && status
                .empty_since
                .is_some_and(|since| now.saturating_duration_since(since) >= grace)
    }

    /// Hand a command to the room; gives the command back if the room has stopped.
    pub async fn send(&self, cmd: RoomCommand) -> Result<(), RoomCommand> {
        self.tx.send(cmd).await.map_err(|e| e.0)
    }

    /// Wait until the published status satisfies `pred`, or the room stops.
    pub async fn wait_for<F>(&self, pred: F) -> RoomStatus
    where
        F: Fn(&RoomStatus) -> bool,
    {
        let mut rx = self.status.clone();
        let matched = rx.wait_for(|s| pred(s)).await.ok().map(|s| *s);
        matched.unwrap_or_else(|| *rx.borrow())
    }
}
