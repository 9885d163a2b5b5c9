mod audio;
mod peer;
mod room;
mod signaling;

pub use audio::AudioInfo;
pub use peer::PeerId;
pub use room::{InvalidRoomId, RoomId};
pub use signaling::{IceServerConfig, SignalMessage};
