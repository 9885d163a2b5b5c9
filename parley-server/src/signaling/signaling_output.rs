use async_trait::async_trait;
use parley_core::PeerId;

/// Outbound half of the signaling transport, used by rooms to reach their peers.
#[async_trait]
pub trait SignalingOutput: Send + Sync {
    async fn send_offer(&self, peer_id: PeerId, sdp: String);

    async fn send_answer(&self, peer_id: PeerId, sdp: String);

    /// Send a local ICE candidate (`RTCIceCandidateInit` JSON) to a peer.
    async fn send_ice(&self, peer_id: PeerId, candidate: String);
}
