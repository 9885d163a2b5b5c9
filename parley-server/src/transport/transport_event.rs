use crate::audio::AudioFrame;
use parley_core::PeerId;

/// Events a peer's media transport reports back to its room.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A local ICE candidate, serialized as `RTCIceCandidateInit` JSON.
    CandidateGenerated(PeerId, String),
    Audio(PeerId, AudioFrame),
    /// The outbound data channel is open.
    ChannelReady(PeerId),
    IceFailed(PeerId),
    Disconnected(PeerId),
}

impl TransportEvent {
    pub fn peer_id(&self) -> &PeerId {
        match self {
            TransportEvent::CandidateGenerated(peer_id, _)
            | TransportEvent::Audio(peer_id, _)
            | TransportEvent::ChannelReady(peer_id)
            | TransportEvent::IceFailed(peer_id)
            | TransportEvent::Disconnected(peer_id) => peer_id,
        }
    }
}
