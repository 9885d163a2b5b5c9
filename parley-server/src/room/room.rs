use crate::audio::AudioSegmenter;
use crate::negotiation::{Negotiator, RemoteSignal};
use crate::pipeline::StageEvent;
use crate::room::{
    AgentDeps, Member, PeerSession, PeerSnapshot, RoomCommand, RoomHandle, RoomStatus,
};
use crate::router::{Delivery, UtteranceRouter};
use crate::transport::TransportEvent;
use parley_core::{PeerId, RoomId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Serializable view of a room for the debug channel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub age_ms: u64,
    pub peers: Vec<PeerSnapshot>,
    pub pending_syntheses: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_dispatch: Option<String>,
}

/// One room's agent session: its peers and their negotiators and segmenters, plus the
/// room's router. Runs as a single task; all of its state is mutated only here.
pub struct RoomSession {
    room_id: RoomId,
    created_at: Instant,
    deps: AgentDeps,
    peers: HashMap<PeerId, PeerSession>,
    // Last direct join/leave per peer, so older snapshots cannot undo it.
    touched: HashMap<PeerId, Instant>,
    router: UtteranceRouter,
    empty_since: Option<Instant>,
    command_rx: mpsc::Receiver<RoomCommand>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    transport_tx: mpsc::Sender<TransportEvent>,
    stage_rx: mpsc::Receiver<StageEvent>,
    status_tx: watch::Sender<RoomStatus>,
}

impl RoomSession {
    pub fn spawn(room_id: RoomId, deps: AgentDeps) -> RoomHandle {
        let created_at = Instant::now();
        let (command_tx, command_rx) = mpsc::channel(100);
        let (transport_tx, transport_rx) = mpsc::channel(256);
        let (stage_tx, stage_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(RoomStatus {
            peer_count: 0,
            empty_since: Some(created_at),
            closed: false,
        });

        let pipeline = deps.pipelines.build(&room_id, stage_tx);
        let router = UtteranceRouter::new(
            room_id.clone(),
            deps.config.router.clone(),
            deps.wake_gate.clone(),
            pipeline,
        );

        let session = Self {
            room_id: room_id.clone(),
            created_at,
            deps,
            peers: HashMap::new(),
            touched: HashMap::new(),
            router,
            empty_since: Some(created_at),
            command_rx,
            transport_rx,
            transport_tx,
            stage_rx,
            status_tx,
        };
        tokio::spawn(session.run());

        RoomHandle::new(room_id, created_at, command_tx, status_rx)
    }

    async fn run(mut self) {
        info!("Room {} event loop started", self.room_id);

        loop {
            let synthesis_deadline = self.router.synthesis_deadline();

            // Membership first: a reply must see the peers whose joins were queued before it.
            tokio::select! {
                biased;

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(RoomCommand::Shutdown) | None => break,
                        Some(RoomCommand::ShutdownIfIdle { now, grace, reply }) => {
                            if self.is_idle(now, grace) {
                                self.command_rx.close();
                                let late = self.drain_commands();
                                let _ = reply.send(Some(late));
                                break;
                            }
                            let _ = reply.send(None);
                        }
                        Some(c) => self.handle_command(c).await,
                    }
                }

                Some(evt) = self.transport_rx.recv() => {
                    self.handle_transport_event(evt).await;
                }

                Some(evt) = self.stage_rx.recv() => {
                    if let Some(delivery) = self.router.on_stage_event(evt, &self.peers).await {
                        self.deliver(delivery).await;
                    }
                }

                _ = tokio::time::sleep_until(synthesis_deadline.unwrap_or_else(Instant::now)),
                    if synthesis_deadline.is_some() =>
                {
                    self.router.on_synthesis_timeout(Instant::now()).await;
                }
            }
            self.publish(false);
        }

        self.teardown().await;
        info!("Room {} event loop finished", self.room_id);
    }

    fn is_idle(&self, now: Instant, grace: Duration) -> bool {
        self.peers.is_empty()
            && self
                .empty_since
                .is_some_and(|since| now.saturating_duration_since(since) >= grace)
    }

    /// Commands that were queued behind an accepted idle shutdown. Membership and
    /// signaling are handed back so the registry can replay them on a fresh room.
    fn drain_commands(&mut self) -> Vec<RoomCommand> {
        let mut late = Vec::new();
        while let Ok(cmd) = self.command_rx.try_recv() {
            match cmd {
                RoomCommand::PeerJoined { .. }
                | RoomCommand::PeerLeft { .. }
                | RoomCommand::Sync { .. }
                | RoomCommand::Signal { .. } => late.push(cmd),
                other => debug!("Dropping {:?} for closing room {}", other, self.room_id),
            }
        }
        late
    }

    fn publish(&self, closed: bool) {
        self.status_tx.send_replace(RoomStatus {
            peer_count: self.peers.len(),
            empty_since: self.empty_since,
            closed,
        });
    }

    async fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::PeerJoined {
                peer_id,
                display_name,
                at,
            } => {
                self.touched.insert(peer_id.clone(), at);
                self.add_peer(peer_id, display_name).await;
            }

            RoomCommand::PeerLeft { peer_id, at } => {
                self.touched.insert(peer_id.clone(), at);
                self.remove_peer(&peer_id).await;
            }

            RoomCommand::Sync { members, taken_at } => self.sync(members, taken_at).await,

            RoomCommand::Signal { peer_id, signal } => self.signal(peer_id, signal).await,

            RoomCommand::Inspect { reply } => {
                let _ = reply.send(self.snapshot());
            }

            RoomCommand::Shutdown | RoomCommand::ShutdownIfIdle { .. } => {}
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::CandidateGenerated(peer_id, candidate) => {
                self.deps.signaling.send_ice(peer_id, candidate).await;
            }

            TransportEvent::Audio(peer_id, frame) => {
                let Some(peer) = self.peers.get_mut(&peer_id) else {
                    return;
                };
                if let Some(utterance) = peer.segmenter.push(&frame) {
                    self.router.on_utterance(&utterance).await;
                }
            }

            TransportEvent::ChannelReady(peer_id) => {
                info!("Reply channel to {} ready in room {}", peer_id, self.room_id);
            }

            TransportEvent::IceFailed(peer_id) => {
                if let Some(peer) = self.peers.get(&peer_id) {
                    peer.negotiator.ice_failed().await;
                }
            }

            TransportEvent::Disconnected(peer_id) => {
                // Membership decides when the peer is gone; only drop partial speech.
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    info!("Media link to {} closed", peer_id);
                    peer.segmenter.reset();
                }
            }
        }
    }

    async fn add_peer(&mut self, peer_id: PeerId, display_name: Option<String>) {
        if let Some(peer) = self.peers.get_mut(&peer_id) {
            if display_name.is_some() {
                peer.display_name = display_name;
            }
            return;
        }

        let transport = match self
            .deps
            .media
            .connect(peer_id.clone(), self.transport_tx.clone())
            .await
        {
            Ok(transport) => transport,
            Err(e) => {
                error!("Failed to create transport for {}: {:?}", peer_id, e);
                return;
            }
        };

        let negotiator = Negotiator::spawn(
            peer_id.clone(),
            true,
            transport,
            self.deps.signaling.clone(),
            self.deps.config.negotiation.clone(),
        );
        let segmenter = AudioSegmenter::new(peer_id.clone(), self.deps.config.segmenter.clone());

        info!("Peer {} joined room {}", peer_id, self.room_id);
        self.router.peer_joined(&peer_id).await;
        self.peers.insert(
            peer_id.clone(),
            PeerSession {
                peer_id,
                display_name,
                negotiator,
                segmenter,
            },
        );
        self.empty_since = None;
    }

    async fn remove_peer(&mut self, peer_id: &PeerId) {
        let Some(peer) = self.peers.remove(peer_id) else {
            return;
        };
        info!("Peer {} left room {}", peer_id, self.room_id);
        peer.negotiator.close().await;
        self.router.peer_left(peer_id).await;

        if self.peers.is_empty() {
            self.empty_since = Some(Instant::now());
        }
    }

    async fn sync(&mut self, members: Vec<Member>, taken_at: Instant) {
        let newer_event = |touched: &HashMap<PeerId, Instant>, peer_id: &PeerId| {
            touched.get(peer_id).is_some_and(|at| *at > taken_at)
        };

        let present: HashSet<PeerId> = members.iter().map(|m| m.peer_id.clone()).collect();
        let stale: Vec<PeerId> = self
            .peers
            .keys()
            .filter(|id| !present.contains(*id) && !newer_event(&self.touched, *id))
            .cloned()
            .collect();

        for member in members {
            if newer_event(&self.touched, &member.peer_id) {
                continue;
            }
            if !self.peers.contains_key(&member.peer_id) {
                debug!("Reconcile adds {} to room {}", member.peer_id, self.room_id);
            }
            self.add_peer(member.peer_id, member.display_name).await;
        }
        for peer_id in stale {
            debug!("Reconcile removes {} from room {}", peer_id, self.room_id);
            self.remove_peer(&peer_id).await;
        }

        self.touched.retain(|_, at| *at > taken_at);
    }

    async fn signal(&mut self, peer_id: PeerId, signal: RemoteSignal) {
        if !self.peers.contains_key(&peer_id) {
            if !matches!(signal, RemoteSignal::Offer(_)) {
                warn!(
                    "Dropping signal from {} which is not in room {}",
                    peer_id, self.room_id
                );
                return;
            }
            // An offer means the peer is here even if its join was never seen.
            self.touched.insert(peer_id.clone(), Instant::now());
            self.add_peer(peer_id.clone(), None).await;
        }

        if let Some(peer) = self.peers.get(&peer_id) {
            peer.negotiator.remote(signal).await;
        }
    }

    async fn deliver(&self, delivery: Delivery) {
        let preamble = match serde_json::to_string(&delivery.info) {
            Ok(preamble) => preamble,
            Err(e) => {
                error!("Failed to serialize reply preamble: {}", e);
                return;
            }
        };

        let target = delivery.target.as_ref().and_then(|id| self.peers.get(id));
        match target {
            Some(peer) => {
                debug!("Reply of {} bytes to {}", delivery.info.length, peer.peer_id);
                peer.negotiator.deliver(preamble, delivery.chunks).await;
            }
            None => {
                debug!(
                    "Broadcasting reply of {} bytes in room {}",
                    delivery.info.length, self.room_id
                );
                for peer in self.peers.values() {
                    peer.negotiator
                        .deliver(preamble.clone(), delivery.chunks.clone())
                        .await;
                }
            }
        }
    }

    fn snapshot(&self) -> RoomSnapshot {
        let mut peers: Vec<PeerSnapshot> = self.peers.values().map(PeerSession::snapshot).collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));

        RoomSnapshot {
            room_id: self.room_id.clone(),
            age_ms: self.created_at.elapsed().as_millis() as u64,
            peers,
            pending_syntheses: self.router.pending_syntheses(),
            last_dispatch: self.router.last_dispatch().map(|d| d.text.clone()),
        }
    }

    async fn teardown(&mut self) {
        for (_, peer) in self.peers.drain() {
            peer.negotiator.close().await;
        }
        self.router.shutdown().await;
        self.empty_since = Some(Instant::now());
        self.publish(true);
    }
}
