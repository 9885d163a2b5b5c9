use crate::model::peer::PeerId;
use serde::{Deserialize, Serialize};

/// Control message sent ahead of the binary chunks of a synthesized reply.
///
/// `length` is the total number of bytes that follow. A missing `target_peer` means the
/// reply is broadcast to every peer of the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "AudioInfo", rename_all = "camelCase")]
pub struct AudioInfo {
    pub format: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_peer: Option<PeerId>,
}
