use serde::Serialize;

/// Perfect-negotiation state of one peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum NegotiationState {
    Stable,
    /// A local offer is being created and applied.
    MakingOffer,
    /// A remote offer is being applied; `pending_answer` is set once the answer exists.
    HaveRemoteOffer {
        #[serde(skip_serializing_if = "Option::is_none")]
        pending_answer: Option<String>,
    },
    SettingRemoteAnswer,
}

impl NegotiationState {
    pub fn is_stable(&self) -> bool {
        matches!(self, NegotiationState::Stable)
    }
}

/// Signaling received from the remote side of a peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSignal {
    Offer(String),
    Answer(String),
    /// `RTCIceCandidateInit` JSON.
    Candidate(String),
}

/// Observable snapshot of a negotiator, published after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationStatus {
    pub state: NegotiationState,
    pub polite: bool,
    pub ice_restarts: u32,
    /// The one-time follow-up offer after the first answer has been issued.
    pub renegotiated: bool,
    /// A local offer has been sent and its answer has not arrived.
    pub awaiting_answer: bool,
    pub has_remote_description: bool,
    pub buffered_candidates: usize,
}

impl NegotiationStatus {
    pub fn new(polite: bool) -> Self {
        Self {
            state: NegotiationState::Stable,
            polite,
            ice_restarts: 0,
            renegotiated: false,
            awaiting_answer: false,
            has_remote_description: false,
            buffered_candidates: 0,
        }
    }
}
