use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parley_core::PeerId;
use parley_server::{AudioFrame, MediaTransport, MediaTransportFactory, SdpKind, TransportEvent};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

/// Every call the negotiator or room made on a [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    CreateOffer { ice_restart: bool },
    CreateAnswer,
    SetLocal { kind: SdpKind, sdp: String },
    SetRemote { kind: SdpKind, sdp: String },
    AddCandidate(String),
    SendText(String),
    SendBinary(Bytes),
    Close,
}

/// Scriptable stand-in for a peer connection. Offers are numbered per transport
/// (`offer-<peer>-<n>`), with a `-restart` suffix for ICE restarts.
pub struct MockTransport {
    peer_id: PeerId,
    calls: Mutex<Vec<TransportCall>>,
    offers: AtomicUsize,
    answers: AtomicUsize,
    has_remote: AtomicBool,
    fail_create_offer: AtomicBool,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            calls: Mutex::new(Vec::new()),
            offers: AtomicUsize::new(0),
            answers: AtomicUsize::new(0),
            has_remote: AtomicBool::new(false),
            fail_create_offer: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn fail_create_offer(&self, fail: bool) {
        self.fail_create_offer.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().await.clone()
    }

    pub async fn candidates(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                TransportCall::AddCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    /// Text frames followed by binary frames, in send order.
    pub async fn sent(&self) -> Vec<TransportCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| matches!(c, TransportCall::SendText(_) | TransportCall::SendBinary(_)))
            .cloned()
            .collect()
    }

    pub async fn wait_for_calls<F>(&self, pred: F, timeout_ms: u64) -> bool
    where
        F: Fn(&[TransportCall]) -> bool,
    {
        let start = tokio::time::Instant::now();
        let timeout = Duration::from_millis(timeout_ms);

        loop {
            if pred(&self.calls.lock().await) {
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn record(&self, call: TransportCall) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn create_offer(&self, ice_restart: bool) -> Result<String> {
        self.record(TransportCall::CreateOffer { ice_restart }).await;
        if self.fail_create_offer.load(Ordering::SeqCst) {
            bail!("scripted offer failure");
        }
        let n = self.offers.fetch_add(1, Ordering::SeqCst) + 1;
        let suffix = if ice_restart { "-restart" } else { "" };
        Ok(format!("offer-{}-{}{}", self.peer_id, n, suffix))
    }

    async fn create_answer(&self) -> Result<String> {
        self.record(TransportCall::CreateAnswer).await;
        let n = self.answers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("answer-{}-{}", self.peer_id, n))
    }

    async fn set_local_description(&self, kind: SdpKind, sdp: String) -> Result<()> {
        self.record(TransportCall::SetLocal { kind, sdp }).await;
        Ok(())
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<()> {
        self.record(TransportCall::SetRemote { kind, sdp }).await;
        self.has_remote.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: String) -> Result<()> {
        if !self.has_remote.load(Ordering::SeqCst) {
            bail!("remote description not set");
        }
        self.record(TransportCall::AddCandidate(candidate)).await;
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.record(TransportCall::SendText(text)).await;
        Ok(())
    }

    async fn send_binary(&self, data: Bytes) -> Result<()> {
        self.record(TransportCall::SendBinary(data)).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.record(TransportCall::Close).await;
        Ok(())
    }
}

struct ConnectedPeer {
    transport: Arc<MockTransport>,
    events: mpsc::Sender<TransportEvent>,
}

/// Hands out [`MockTransport`]s and keeps each peer's event channel so tests can play
/// the media side.
#[derive(Clone, Default)]
pub struct MockTransportFactory {
    peers: Arc<DashMap<PeerId, ConnectedPeer>>,
    connects: Arc<AtomicUsize>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The most recent transport created for `peer_id`.
    pub fn transport(&self, peer_id: &PeerId) -> Option<Arc<MockTransport>> {
        self.peers.get(peer_id).map(|p| p.transport.clone())
    }

    pub async fn emit(&self, event: TransportEvent) {
        let events = self.peers.get(event.peer_id()).map(|p| p.events.clone());
        match events {
            Some(events) => {
                let _ = events.send(event).await;
            }
            None => panic!("no transport for {}", event.peer_id()),
        }
    }

    /// Feed `duration_ms` of constant-amplitude 8 kHz audio starting at `start_ms`, in
    /// 20 ms frames.
    pub async fn play(&self, peer_id: &PeerId, start_ms: u64, duration_ms: u64, amplitude: i16) {
        for offset in (0..duration_ms).step_by(20) {
            let frame = AudioFrame::new(
                vec![amplitude; 160],
                8000,
                Duration::from_millis(start_ms + offset),
            );
            self.emit(TransportEvent::Audio(peer_id.clone(), frame)).await;
        }
    }
}

#[async_trait]
impl MediaTransportFactory for MockTransportFactory {
    async fn connect(
        &self,
        peer_id: PeerId,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn MediaTransport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let transport = Arc::new(MockTransport::new(peer_id.clone()));
        self.peers.insert(
            peer_id,
            ConnectedPeer {
                transport: transport.clone(),
                events,
            },
        );
        Ok(transport)
    }
}
