use async_trait::async_trait;
use parley_core::RoomId;
use parley_server::{Member, MembershipError, MembershipFeed, MembershipSnapshot};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

#[derive(Default)]
struct FeedState {
    rooms: HashMap<RoomId, Vec<Member>>,
    // Snapshot capture time; `None` means "now" at each call.
    taken_at: Option<Instant>,
    failing_rooms: HashSet<RoomId>,
    joined: Vec<RoomId>,
    snapshot_unavailable: bool,
}

/// Membership transport whose snapshots are whatever the test last set.
#[derive(Clone, Default)]
pub struct MockMembershipFeed {
    state: Arc<Mutex<FeedState>>,
}

impl MockMembershipFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_members(&self, room: &str, members: Vec<Member>) {
        let room_id = RoomId::parse(room).unwrap();
        self.state.lock().unwrap().rooms.insert(room_id, members);
    }

    pub fn clear_room(&self, room: &str) {
        let room_id = RoomId::parse(room).unwrap();
        self.state.lock().unwrap().rooms.remove(&room_id);
    }

    /// Pin the capture time reported by later snapshots.
    pub fn set_taken_at(&self, at: Instant) {
        self.state.lock().unwrap().taken_at = Some(at);
    }

    pub fn fail_joins_for(&self, room: &str) {
        let room_id = RoomId::parse(room).unwrap();
        self.state.lock().unwrap().failing_rooms.insert(room_id);
    }

    pub fn set_snapshot_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().snapshot_unavailable = unavailable;
    }

    /// Every successful `join_room`, in call order.
    pub fn joined(&self) -> Vec<RoomId> {
        self.state.lock().unwrap().joined.clone()
    }
}

#[async_trait]
impl MembershipFeed for MockMembershipFeed {
    async fn join_room(&self, room_id: &RoomId) -> Result<(), MembershipError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_rooms.contains(room_id) {
            return Err(MembershipError::JoinFailed {
                room: room_id.clone(),
                reason: "scripted failure".into(),
            });
        }
        state.joined.push(room_id.clone());
        Ok(())
    }

    async fn snapshot(&self) -> Result<MembershipSnapshot, MembershipError> {
        let state = self.state.lock().unwrap();
        if state.snapshot_unavailable {
            return Err(MembershipError::SnapshotUnavailable("scripted".into()));
        }
        Ok(MembershipSnapshot {
            taken_at: state.taken_at.unwrap_or_else(Instant::now),
            rooms: state.rooms.clone(),
        })
    }
}
