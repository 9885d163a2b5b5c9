mod agent_deps;
mod membership;
mod peer_session;
mod room;
mod room_command;
mod room_handle;
mod room_registry;

pub use agent_deps::*;
pub use membership::*;
pub use peer_session::*;
pub use room::*;
pub use room_command::*;
pub use room_handle::*;
pub use room_registry::*;
