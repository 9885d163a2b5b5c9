use crate::error::MembershipError;
use async_trait::async_trait;
use parley_core::{PeerId, RoomId};
use std::collections::HashMap;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub peer_id: PeerId,
    pub display_name: Option<String>,
}

impl Member {
    pub fn new(peer_id: impl Into<PeerId>, display_name: Option<&str>) -> Self {
        Self {
            peer_id: peer_id.into(),
            display_name: display_name.map(str::to_owned),
        }
    }
}

/// Authoritative room membership at one instant. The instant doubles as the snapshot
/// version: a direct event stamped later than `taken_at` wins over the snapshot.
#[derive(Debug, Clone)]
pub struct MembershipSnapshot {
    pub taken_at: Instant,
    pub rooms: HashMap<RoomId, Vec<Member>>,
}

/// The external membership transport.
#[async_trait]
pub trait MembershipFeed: Send + Sync {
    /// Subscribe the agent to a room before its session is published.
    async fn join_room(&self, room_id: &RoomId) -> Result<(), MembershipError>;

    async fn snapshot(&self) -> Result<MembershipSnapshot, MembershipError>;
}
