pub mod audio;
pub mod config;
pub mod error;
pub mod negotiation;
pub mod pipeline;
pub mod room;
pub mod router;
pub mod signaling;
pub mod transport;

pub use audio::*;
pub use config::*;
pub use error::*;
pub use negotiation::*;
pub use pipeline::*;
pub use room::*;
pub use router::*;
pub use signaling::*;
pub use transport::*;
