use crate::audio::AudioSegmenter;
use crate::negotiation::{NegotiationStatus, NegotiatorHandle};
use crate::router::PeerDirectory;
use parley_core::PeerId;
use serde::Serialize;
use std::collections::HashMap;

/// Everything a room keeps for one participant.
pub struct PeerSession {
    pub peer_id: PeerId,
    pub display_name: Option<String>,
    pub negotiator: NegotiatorHandle,
    pub segmenter: AudioSegmenter,
}

impl PeerSession {
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.peer_id.as_str())
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            peer_id: self.peer_id.clone(),
            display_name: self.display_name.clone(),
            speaking: self.segmenter.is_speaking(),
            negotiation: self.negotiator.status(),
        }
    }
}

impl PeerDirectory for HashMap<PeerId, PeerSession> {
    fn display_name(&self, peer_id: &PeerId) -> Option<String> {
        self.get(peer_id).map(|p| p.name().to_owned())
    }

    fn resolve(&self, target: &str) -> Option<PeerId> {
        let by_id = PeerId::from(target);
        if self.contains_key(&by_id) {
            return Some(by_id);
        }
        self.values()
            .find(|p| p.display_name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(target)))
            .map(|p| p.peer_id.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSnapshot {
    pub peer_id: PeerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub speaking: bool,
    pub negotiation: NegotiationStatus,
}
