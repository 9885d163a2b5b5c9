use crate::error::MembershipError;
use crate::room::{Member, MembershipFeed, MembershipSnapshot};
use crate::signaling::SignalingOutput;
use async_trait::async_trait;
use axum::extract::ws::Message;
use dashmap::DashMap;
use parley_core::{IceServerConfig, PeerId, RoomId, SignalMessage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Identifies one socket among the connections a peer id has had.
pub type ConnectionId = u64;

struct PeerLink {
    connection: ConnectionId,
    tx: mpsc::UnboundedSender<Message>,
    room: Option<RoomId>,
    name: Option<String>,
}

struct SignalingInner {
    peers: DashMap<PeerId, PeerLink>,
    next_connection: AtomicU64,
    ice_servers: Vec<IceServerConfig>,
}

/// WebSocket-backed signaling: routes SDP and ICE to connected peers and doubles as the
/// membership feed, with room membership taken from each socket's last `Join`.
#[derive(Clone)]
pub struct SignalingService {
    inner: Arc<SignalingInner>,
}

impl SignalingService {
    pub fn new(ice_servers: Vec<IceServerConfig>) -> Self {
        Self {
            inner: Arc::new(SignalingInner {
                peers: DashMap::new(),
                next_connection: AtomicU64::new(1),
                ice_servers,
            }),
        }
    }

    pub fn get_ice_servers(&self) -> Vec<IceServerConfig> {
        self.inner.ice_servers.clone()
    }

    /// Register a socket for `peer_id`, replacing any earlier one.
    pub fn add_peer(&self, peer_id: PeerId, tx: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let connection = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        let replaced = self.inner.peers.insert(
            peer_id.clone(),
            PeerLink {
                connection,
                tx,
                room: None,
                name: None,
            },
        );
        if replaced.is_some() {
            debug!("Peer {} reconnected", peer_id);
        }
        connection
    }

    /// Forget a socket if it is still the peer's current one; returns the room it was in.
    pub fn remove_peer(&self, peer_id: &PeerId, connection: ConnectionId) -> Option<RoomId> {
        self.inner
            .peers
            .remove_if(peer_id, |_, link| link.connection == connection)
            .and_then(|(_, link)| link.room)
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.inner.peers.contains_key(peer_id)
    }

    /// Record that a peer joined `room`; returns the room it was in before, if any.
    pub fn join(&self, peer_id: &PeerId, room: RoomId, name: Option<String>) -> Option<RoomId> {
        let mut link = self.inner.peers.get_mut(peer_id)?;
        link.name = name;
        link.room.replace(room)
    }

    pub fn leave(&self, peer_id: &PeerId) -> Option<RoomId> {
        self.inner.peers.get_mut(peer_id)?.room.take()
    }

    pub fn room_of(&self, peer_id: &PeerId) -> Option<RoomId> {
        self.inner.peers.get(peer_id)?.room.clone()
    }

    pub fn send_signal(&self, peer_id: PeerId, msg: SignalMessage) {
        if let Some(peer) = self.inner.peers.get(&peer_id) {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if let Err(e) = peer.tx.send(Message::Text(json.into())) {
                        error!("Failed to send WS message to {}: {:?}", peer_id, e);
                    }
                }
                Err(e) => error!("Failed to serialize signal message: {}", e),
            }
        } else {
            warn!("Attempted to send signal to disconnected peer {}", peer_id);
        }
    }
}

#[async_trait]
impl SignalingOutput for SignalingService {
    async fn send_offer(&self, peer_id: PeerId, sdp: String) {
        self.send_signal(peer_id, SignalMessage::Offer { sdp });
    }

    async fn send_answer(&self, peer_id: PeerId, sdp: String) {
        self.send_signal(peer_id, SignalMessage::Answer { sdp });
    }

    async fn send_ice(&self, peer_id: PeerId, candidate: String) {
        match candidate_to_signal(&candidate) {
            Some(msg) => self.send_signal(peer_id, msg),
            None => warn!("Unparseable local ICE candidate for {}: {}", peer_id, candidate),
        }
    }
}

#[async_trait]
impl MembershipFeed for SignalingService {
    async fn join_room(&self, room_id: &RoomId) -> Result<(), MembershipError> {
        // Sockets join rooms themselves; there is no upstream subscription to open.
        debug!("Agent bound to room {}", room_id);
        Ok(())
    }

    async fn snapshot(&self) -> Result<MembershipSnapshot, MembershipError> {
        let taken_at = Instant::now();
        let mut rooms: HashMap<RoomId, Vec<Member>> = HashMap::new();
        for peer in self.inner.peers.iter() {
            if let Some(room) = &peer.room {
                rooms.entry(room.clone()).or_default().push(Member {
                    peer_id: peer.key().clone(),
                    display_name: peer.name.clone(),
                });
            }
        }
        Ok(MembershipSnapshot { taken_at, rooms })
    }
}

/// Wire shape of `RTCIceCandidateInit`.
#[derive(Debug, Serialize, Deserialize)]
struct CandidateInit {
    candidate: String,
    #[serde(rename = "sdpMid", default)]
    sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    sdp_m_line_index: Option<u16>,
}

/// Turn a local candidate (`RTCIceCandidateInit` JSON) into a signaling message.
pub fn candidate_to_signal(candidate_json: &str) -> Option<SignalMessage> {
    let init: CandidateInit = serde_json::from_str(candidate_json).ok()?;
    Some(SignalMessage::IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_m_line_index,
    })
}

/// Turn a remote candidate from signaling into `RTCIceCandidateInit` JSON.
pub fn candidate_to_init_json(
    candidate: String,
    sdp_mid: Option<String>,
    sdp_m_line_index: Option<u16>,
) -> String {
    let init = CandidateInit {
        candidate,
        sdp_mid,
        sdp_m_line_index,
    };
    serde_json::to_string(&init).unwrap_or_default()
}
