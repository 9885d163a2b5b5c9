use serde::{Deserialize, Serialize};

/// WebRTC settings shared by every peer connection of the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub ice_servers: Vec<String>,

    /// Sample rate assumed for raw s16le PCM received over the data channel.
    pub data_channel_sample_rate: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_owned()],
            data_channel_sample_rate: 48_000,
        }
    }
}
