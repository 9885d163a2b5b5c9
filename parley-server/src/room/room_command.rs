use crate::negotiation::RemoteSignal;
use crate::room::{Member, RoomSnapshot};
use parley_core::PeerId;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Commands a room accepts from the registry.
#[derive(Debug)]
pub enum RoomCommand {
    PeerJoined {
        peer_id: PeerId,
        display_name: Option<String>,
        at: Instant,
    },

    PeerLeft { peer_id: PeerId, at: Instant },

    /// Reconcile against the membership snapshot captured at `taken_at`.
    Sync {
        members: Vec<Member>,
        taken_at: Instant,
    },

    /// SDP or ICE from a peer, delivered in arrival order.
    Signal { peer_id: PeerId, signal: RemoteSignal },

    Inspect { reply: oneshot::Sender<RoomSnapshot> },

    /// Stop if the room has been empty for `grace` as of `now`. The reply is `None` when
    /// the room stays up, otherwise the commands that arrived too late to be handled.
    ShutdownIfIdle {
        now: Instant,
        grace: Duration,
        reply: oneshot::Sender<Option<Vec<RoomCommand>>>,
    },

    Shutdown,
}

impl RoomCommand {
    /// Whether the command implies someone is in the room.
    pub fn keeps_room_alive(&self) -> bool {
        match self {
            RoomCommand::PeerJoined { .. } | RoomCommand::Signal { .. } => true,
            RoomCommand::Sync { members, .. } => !members.is_empty(),
            _ => false,
        }
    }
}
