use crate::transport::TransportEvent;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parley_core::PeerId;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => f.write_str("offer"),
            SdpKind::Answer => f.write_str("answer"),
        }
    }
}

/// One peer's media link as seen by the negotiator.
///
/// Creating a description never applies it; the caller decides when to call
/// `set_local_description`. Applying a remote offer while a local offer is pending
/// rolls the local offer back first.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn create_offer(&self, ice_restart: bool) -> Result<String>;

    async fn create_answer(&self) -> Result<String>;

    async fn set_local_description(&self, kind: SdpKind, sdp: String) -> Result<()>;

    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: String) -> Result<()>;

    /// Send a text frame on the peer's outbound data channel.
    async fn send_text(&self, text: String) -> Result<()>;

    /// Send a binary frame on the peer's outbound data channel.
    async fn send_binary(&self, data: Bytes) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Builds a media transport for a newly observed peer. Events for that peer are
/// reported on `events`.
#[async_trait]
pub trait MediaTransportFactory: Send + Sync {
    async fn connect(
        &self,
        peer_id: PeerId,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn MediaTransport>>;
}
