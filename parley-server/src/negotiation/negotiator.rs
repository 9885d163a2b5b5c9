use crate::config::NegotiationConfig;
use crate::negotiation::{NegotiationState, NegotiationStatus, RemoteSignal};
use crate::signaling::SignalingOutput;
use crate::transport::{MediaTransport, SdpKind};
use bytes::Bytes;
use parley_core::PeerId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PendingOffer {
    Renegotiate,
    IceRestart,
}

enum NegotiatorInput {
    Remote(RemoteSignal),
    Renegotiate,
    FollowUp,
    IceFailed,
    OfferCreated {
        generation: u64,
        result: anyhow::Result<String>,
    },
    Deliver {
        preamble: String,
        chunks: Vec<Bytes>,
    },
    Close,
}

/// One peer's perfect-negotiation state machine, run as its own task.
///
/// Inputs are processed strictly in arrival order. Offer creation runs off-task and
/// posts its result back tagged with a generation; any later offer, remote offer or
/// shutdown bumps the generation so stale completions are dropped.
pub struct Negotiator {
    peer_id: PeerId,
    polite: bool,
    transport: Arc<dyn MediaTransport>,
    signaling: Arc<dyn SignalingOutput>,
    config: NegotiationConfig,

    state: NegotiationState,
    generation: u64,
    offer_purpose: Option<PendingOffer>,
    awaiting_answer: bool,
    deferred: Option<PendingOffer>,
    pending_candidates: Vec<String>,
    has_remote_description: bool,
    follow_up_scheduled: bool,
    renegotiated: bool,
    ice_restarts: u32,

    alive: Arc<AtomicBool>,
    self_tx: mpsc::WeakSender<NegotiatorInput>,
    input_rx: mpsc::Receiver<NegotiatorInput>,
    status_tx: watch::Sender<NegotiationStatus>,
}

impl Negotiator {
    pub fn spawn(
        peer_id: PeerId,
        polite: bool,
        transport: Arc<dyn MediaTransport>,
        signaling: Arc<dyn SignalingOutput>,
        config: NegotiationConfig,
    ) -> NegotiatorHandle {
        let (tx, input_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(NegotiationStatus::new(polite));
        let alive = Arc::new(AtomicBool::new(true));

        let negotiator = Self {
            peer_id: peer_id.clone(),
            polite,
            transport,
            signaling,
            config,
            state: NegotiationState::Stable,
            generation: 0,
            offer_purpose: None,
            awaiting_answer: false,
            deferred: None,
            pending_candidates: Vec::new(),
            has_remote_description: false,
            follow_up_scheduled: false,
            renegotiated: false,
            ice_restarts: 0,
            alive: alive.clone(),
            self_tx: tx.downgrade(),
            input_rx,
            status_tx,
        };
        tokio::spawn(negotiator.run());

        NegotiatorHandle {
            peer_id,
            tx,
            status: status_rx,
            alive,
        }
    }

    async fn run(mut self) {
        debug!("Negotiator for {} started (polite: {})", self.peer_id, self.polite);

        while let Some(input) = self.input_rx.recv().await {
            match input {
                NegotiatorInput::Remote(RemoteSignal::Offer(sdp)) => self.on_remote_offer(sdp).await,
                NegotiatorInput::Remote(RemoteSignal::Answer(sdp)) => {
                    self.on_remote_answer(sdp).await
                }
                NegotiatorInput::Remote(RemoteSignal::Candidate(candidate)) => {
                    self.on_remote_candidate(candidate).await
                }
                NegotiatorInput::Renegotiate => self.request_offer(PendingOffer::Renegotiate),
                NegotiatorInput::FollowUp => {
                    info!("Follow-up renegotiation for {}", self.peer_id);
                    self.renegotiated = true;
                    self.request_offer(PendingOffer::Renegotiate);
                }
                NegotiatorInput::IceFailed => {
                    self.ice_restarts += 1;
                    warn!(
                        "ICE failed for {}, restart #{}",
                        self.peer_id, self.ice_restarts
                    );
                    self.request_offer(PendingOffer::IceRestart);
                }
                NegotiatorInput::OfferCreated { generation, result } => {
                    self.on_offer_created(generation, result).await
                }
                NegotiatorInput::Deliver { preamble, chunks } => {
                    self.deliver(preamble, chunks).await
                }
                NegotiatorInput::Close => break,
            }
            self.publish();
        }

        self.alive.store(false, Ordering::Release);
        self.generation += 1;
        if let Err(e) = self.transport.close().await {
            debug!("Closing transport for {} failed: {:?}", self.peer_id, e);
        }
        debug!("Negotiator for {} stopped", self.peer_id);
    }

    fn publish(&self) {
        self.status_tx.send_replace(NegotiationStatus {
            state: self.state.clone(),
            polite: self.polite,
            ice_restarts: self.ice_restarts,
            renegotiated: self.renegotiated,
            awaiting_answer: self.awaiting_answer,
            has_remote_description: self.has_remote_description,
            buffered_candidates: self.pending_candidates.len(),
        });
    }

    /// A sent offer whose answer never arrives must not block an ICE restart, so only
    /// plain renegotiation waits for the outstanding answer.
    fn can_offer(&self, kind: PendingOffer) -> bool {
        self.state.is_stable() && (!self.awaiting_answer || kind == PendingOffer::IceRestart)
    }

    fn request_offer(&mut self, kind: PendingOffer) {
        if self.can_offer(kind) {
            self.start_offer(kind);
        } else {
            debug!(
                "Deferring {:?} for {} while {:?}",
                kind, self.peer_id, self.state
            );
            self.deferred = self.deferred.max(Some(kind));
        }
    }

    fn start_offer(&mut self, kind: PendingOffer) {
        let Some(tx) = self.self_tx.upgrade() else {
            return;
        };
        self.generation += 1;
        self.state = NegotiationState::MakingOffer;
        self.offer_purpose = Some(kind);

        let generation = self.generation;
        let transport = self.transport.clone();
        let alive = self.alive.clone();
        let ice_restart = kind == PendingOffer::IceRestart;
        tokio::spawn(async move {
            let result = transport.create_offer(ice_restart).await;
            if alive.load(Ordering::Acquire) {
                let _ = tx
                    .send(NegotiatorInput::OfferCreated { generation, result })
                    .await;
            }
        });
    }

    fn run_deferred(&mut self) {
        match self.deferred {
            Some(kind) if self.can_offer(kind) => {
                self.deferred = None;
                self.start_offer(kind);
            }
            _ => {}
        }
    }

    fn fail(&mut self, step: &str, err: anyhow::Error) {
        error!("Negotiation with {} failed to {}: {:?}", self.peer_id, step, err);
        self.state = NegotiationState::Stable;
        self.offer_purpose = None;
        self.run_deferred();
    }

    async fn on_offer_created(&mut self, generation: u64, result: anyhow::Result<String>) {
        if generation != self.generation || self.state != NegotiationState::MakingOffer {
            debug!("Dropping stale offer for {}", self.peer_id);
            return;
        }

        let sdp = match result {
            Ok(sdp) => sdp,
            Err(e) => return self.fail("create offer", e),
        };
        if let Err(e) = self
            .transport
            .set_local_description(SdpKind::Offer, sdp.clone())
            .await
        {
            return self.fail("apply local offer", e);
        }
        self.signaling.send_offer(self.peer_id.clone(), sdp).await;

        self.state = NegotiationState::Stable;
        self.awaiting_answer = true;
        self.run_deferred();
    }

    async fn on_remote_offer(&mut self, sdp: String) {
        let collision = !self.state.is_stable() || self.awaiting_answer;
        if collision && !self.polite {
            info!("Ignoring colliding offer from {}", self.peer_id);
            return;
        }
        if collision {
            info!(
                "Offer collision with {} while {:?}, yielding",
                self.peer_id, self.state
            );
            // An interrupted ICE restart is still needed once the remote offer settles.
            if self.offer_purpose == Some(PendingOffer::IceRestart) {
                self.deferred = self.deferred.max(Some(PendingOffer::IceRestart));
            }
        }

        self.generation += 1;
        self.offer_purpose = None;
        self.awaiting_answer = false;
        self.state = NegotiationState::HaveRemoteOffer {
            pending_answer: None,
        };
        self.publish();

        if let Err(e) = self
            .transport
            .set_remote_description(SdpKind::Offer, sdp)
            .await
        {
            return self.fail("apply remote offer", e);
        }
        self.has_remote_description = true;
        self.flush_candidates().await;

        let answer = match self.transport.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return self.fail("create answer", e),
        };
        self.state = NegotiationState::HaveRemoteOffer {
            pending_answer: Some(answer.clone()),
        };
        self.publish();

        if let Err(e) = self
            .transport
            .set_local_description(SdpKind::Answer, answer.clone())
            .await
        {
            return self.fail("apply local answer", e);
        }
        self.signaling.send_answer(self.peer_id.clone(), answer).await;

        self.state = NegotiationState::Stable;
        self.answer_settled();
    }

    async fn on_remote_answer(&mut self, sdp: String) {
        if !self.awaiting_answer || !self.state.is_stable() {
            warn!(
                "Ignoring answer from {} while {:?}",
                self.peer_id, self.state
            );
            return;
        }

        self.state = NegotiationState::SettingRemoteAnswer;
        self.awaiting_answer = false;
        self.publish();

        if let Err(e) = self
            .transport
            .set_remote_description(SdpKind::Answer, sdp)
            .await
        {
            return self.fail("apply remote answer", e);
        }
        self.has_remote_description = true;
        self.flush_candidates().await;

        self.state = NegotiationState::Stable;
        self.offer_purpose = None;
        self.answer_settled();
    }

    async fn on_remote_candidate(&mut self, candidate: String) {
        if !self.has_remote_description {
            debug!("Buffering ICE candidate from {}", self.peer_id);
            self.pending_candidates.push(candidate);
            return;
        }
        if let Err(e) = self.transport.add_ice_candidate(candidate).await {
            warn!("Failed to add ICE candidate for {}: {:?}", self.peer_id, e);
        }
    }

    async fn flush_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                warn!("Failed to add ICE candidate for {}: {:?}", self.peer_id, e);
            }
        }
    }

    /// Called whenever an exchange completes with an answer in place.
    fn answer_settled(&mut self) {
        if !self.follow_up_scheduled {
            self.follow_up_scheduled = true;
            self.schedule_follow_up();
        }
        self.run_deferred();
    }

    fn schedule_follow_up(&self) {
        let Some(tx) = self.self_tx.upgrade() else {
            return;
        };
        let delay = self.config.renegotiate_delay();
        let alive = self.alive.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if alive.load(Ordering::Acquire) {
                let _ = tx.send(NegotiatorInput::FollowUp).await;
            }
        });
    }

    async fn deliver(&self, preamble: String, chunks: Vec<Bytes>) {
        if let Err(e) = self.transport.send_text(preamble).await {
            warn!("Dropping reply for {}: {:?}", self.peer_id, e);
            return;
        }
        for chunk in chunks {
            if let Err(e) = self.transport.send_binary(chunk).await {
                warn!("Reply to {} cut short: {:?}", self.peer_id, e);
                return;
            }
        }
    }
}

/// Cloneable handle to a running [`Negotiator`].
#[derive(Clone)]
pub struct NegotiatorHandle {
    peer_id: PeerId,
    tx: mpsc::Sender<NegotiatorInput>,
    status: watch::Receiver<NegotiationStatus>,
    alive: Arc<AtomicBool>,
}

impl NegotiatorHandle {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub async fn remote(&self, signal: RemoteSignal) {
        self.send(NegotiatorInput::Remote(signal)).await;
    }

    pub async fn renegotiate(&self) {
        self.send(NegotiatorInput::Renegotiate).await;
    }

    pub async fn ice_failed(&self) {
        self.send(NegotiatorInput::IceFailed).await;
    }

    /// Queue a reply for the peer: the JSON preamble, then its binary chunks in order.
    pub async fn deliver(&self, preamble: String, chunks: Vec<Bytes>) {
        self.send(NegotiatorInput::Deliver { preamble, chunks }).await;
    }

    pub async fn close(&self) {
        self.alive.store(false, Ordering::Release);
        self.send(NegotiatorInput::Close).await;
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn status(&self) -> NegotiationStatus {
        self.status.borrow().clone()
    }

    /// Wait until the published status satisfies `pred`, or the negotiator stops.
    pub async fn wait_for<F>(&self, pred: F) -> NegotiationStatus
    where
        F: Fn(&NegotiationStatus) -> bool,
    {
        let mut rx = self.status.clone();
        let matched = rx.wait_for(|s| pred(s)).await.ok().map(|s| (*s).clone());
        matched.unwrap_or_else(|| rx.borrow().clone())
    }

    async fn send(&self, input: NegotiatorInput) {
        if self.tx.send(input).await.is_err() {
            debug!("Negotiator for {} is gone", self.peer_id);
        }
    }
}
