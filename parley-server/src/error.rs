use parley_core::{InvalidRoomId, RoomId};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid wake-word term {term:?}: {source}")]
    WakeTerm {
        term: String,
        #[source]
        source: regex::Error,
    },
}

/// Failures of the external membership transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MembershipError {
    #[error("membership transport is not connected")]
    NotConnected,

    #[error("failed to join room {room}: {reason}")]
    JoinFailed { room: RoomId, reason: String },

    #[error("membership snapshot unavailable: {0}")]
    SnapshotUnavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    InvalidRoomId(#[from] InvalidRoomId),

    #[error(transparent)]
    Membership(#[from] MembershipError),

    #[error("room {0} is shutting down")]
    RoomClosed(RoomId),

    #[error("room {0} does not exist")]
    UnknownRoom(RoomId),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to spawn {stage} worker `{program}`: {source}")]
    Spawn {
        stage: &'static str,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} worker for {identifier} is gone")]
    WorkerGone {
        stage: &'static str,
        identifier: String,
    },

    #[error("{stage} worker for {identifier} is not keeping up")]
    Backlogged {
        stage: &'static str,
        identifier: String,
    },

    #[error("{stage} worker for {identifier} has no {pipe} pipe")]
    MissingPipe {
        stage: &'static str,
        identifier: String,
        pipe: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("generation reply does not match `-> <name>:: <message>`: {raw:?}")]
    MalformedReply { raw: String },
}
