use crate::model::peer::PeerId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "d")]
pub enum SignalMessage {
    IceConfig {
        ice_servers: Vec<IceServerConfig>,
    },
    Join {
        room: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        token: Option<String>,
    },
    Leave,
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    IceCandidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u16>,
    },
    Welcome {
        peer_id: PeerId,
    },
    /// Operational introspection request, e.g. `rooms` or `room`.
    Debug {
        command: String,
    },
    DebugResult {
        payload: serde_json::Value,
    },
    Error {
        message: String,
    },
}
