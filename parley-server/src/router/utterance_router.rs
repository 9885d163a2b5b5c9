use crate::audio::Utterance;
use crate::config::RouterConfig;
use crate::pipeline::{AgentPipeline, Stage, StageEvent, StageEventKind};
use crate::router::{DispatchRecord, WakeGate, chunk_audio, parse_reply};
use bytes::Bytes;
use parley_core::{AudioInfo, PeerId, RoomId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Identifier of the room-wide generation and synthesis workers.
pub const SHARED_WORKER: &str = "default";

/// Lookup of the room's participants, as seen by the router.
pub trait PeerDirectory {
    fn display_name(&self, peer_id: &PeerId) -> Option<String>;

    /// Resolve a reply target written by the generator: a peer id or a display name.
    fn resolve(&self, target: &str) -> Option<PeerId>;
}

impl PeerDirectory for HashMap<PeerId, String> {
    fn display_name(&self, peer_id: &PeerId) -> Option<String> {
        self.get(peer_id).cloned()
    }

    fn resolve(&self, target: &str) -> Option<PeerId> {
        let by_id = PeerId::from(target);
        if self.contains_key(&by_id) {
            return Some(by_id);
        }
        self.iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(target))
            .map(|(id, _)| id.clone())
    }
}

/// A synthesized reply ready to be sent: the preamble, then the chunks in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub target: Option<PeerId>,
    pub info: AudioInfo,
    pub chunks: Vec<Bytes>,
}

struct Synthesis {
    target: Option<PeerId>,
    text: String,
}

struct InFlight {
    target: Option<PeerId>,
    deadline: Instant,
}

/// Moves one room's utterances through transcription, the wake gate, generation and
/// synthesis, and turns synthesized audio into [`Delivery`]s.
///
/// Generation requests are not serialized. Concurrent utterances race and the last
/// [`DispatchRecord`] is the only guard against speaking the same reply twice.
///
/// Synthesis is serialized: one request is in flight per room, so each synthesized buffer belongs
/// to exactly one reply. A request that produces nothing before its deadline is
/// abandoned and its worker stopped; output from that worker is discarded until it has
/// exited.
pub struct UtteranceRouter {
    room_id: RoomId,
    config: RouterConfig,
    gate: Arc<WakeGate>,
    pipeline: AgentPipeline,
    last_dispatch: Option<DispatchRecord>,
    last_requester: Option<PeerId>,
    queued: VecDeque<Synthesis>,
    in_flight: Option<InFlight>,
    discarding: bool,
}

impl UtteranceRouter {
    pub fn new(
        room_id: RoomId,
        config: RouterConfig,
        gate: Arc<WakeGate>,
        pipeline: AgentPipeline,
    ) -> Self {
        Self {
            room_id,
            config,
            gate,
            pipeline,
            last_dispatch: None,
            last_requester: None,
            queued: VecDeque::new(),
            in_flight: None,
            discarding: false,
        }
    }

    pub fn last_dispatch(&self) -> Option<&DispatchRecord> {
        self.last_dispatch.as_ref()
    }

    pub fn pending_syntheses(&self) -> usize {
        self.queued.len() + usize::from(self.in_flight.is_some())
    }

    /// When the synthesis in flight is abandoned, if there is one.
    pub fn synthesis_deadline(&self) -> Option<Instant> {
        self.in_flight.as_ref().map(|f| f.deadline)
    }

    pub async fn peer_joined(&self, peer_id: &PeerId) {
        if let Err(e) = self.pipeline.transcribe.start(peer_id.as_str()).await {
            warn!("No transcriber for {} in room {}: {}", peer_id, self.room_id, e);
        }
    }

    pub async fn peer_left(&self, peer_id: &PeerId) {
        self.pipeline.transcribe.stop(peer_id.as_str()).await;
    }

    pub async fn on_utterance(&self, utterance: &Utterance) {
        debug!(
            "Utterance from {} ({:?}, {} bytes)",
            utterance.peer_id,
            utterance.speech_duration(),
            utterance.audio.len()
        );
        if let Err(e) = self
            .pipeline
            .transcribe
            .send(utterance.peer_id.as_str(), utterance.audio.clone())
            .await
        {
            warn!("Utterance from {} lost: {}", utterance.peer_id, e);
        }
    }

    pub async fn on_stage_event(
        &mut self,
        event: StageEvent,
        peers: &impl PeerDirectory,
    ) -> Option<Delivery> {
        match (event.stage, event.kind) {
            (Stage::Transcribe, StageEventKind::Data(text)) => {
                let speaker = PeerId::from(event.identifier);
                self.on_transcript(&speaker, &String::from_utf8_lossy(&text), peers)
                    .await;
                None
            }
            (Stage::Generate, StageEventKind::Data(reply)) => {
                self.on_reply(&String::from_utf8_lossy(&reply), peers).await;
                None
            }
            (Stage::Synthesize, StageEventKind::Data(audio)) => self.on_synthesized(audio).await,
            (Stage::Synthesize, StageEventKind::Exit(code)) => {
                if self.in_flight.take().is_some() {
                    warn!("Synthesizer exited ({:?}) with a reply in flight", code);
                }
                self.discarding = false;
                self.next_synthesis().await;
                None
            }
            (stage, StageEventKind::Exit(code)) => {
                info!("{} worker {} exited ({:?})", stage, event.identifier, code);
                None
            }
            (stage, StageEventKind::Error(e)) => {
                warn!("{} worker {} failed: {}", stage, event.identifier, e);
                None
            }
        }
    }

    async fn on_transcript(
        &mut self,
        speaker: &PeerId,
        transcript: &str,
        peers: &impl PeerDirectory,
    ) {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return;
        }
        info!("[{}] {}: {}", self.room_id, speaker, transcript);

        let decision = self.gate.evaluate(transcript);
        if !decision.named {
            debug!("No wake word from {}", speaker);
            return;
        }
        if decision.message.is_empty() {
            debug!("Wake word from {} without a request", speaker);
            return;
        }

        let name = peers
            .display_name(speaker)
            .unwrap_or_else(|| speaker.to_string());
        self.last_requester = Some(speaker.clone());
        let request = serde_json::json!({
            "content": format!("{} -> {}:: {}", name, self.config.agent_name, decision.message),
            "peerName": name,
        });
        if let Err(e) = self
            .pipeline
            .generate
            .send(SHARED_WORKER, Bytes::from(request.to_string()))
            .await
        {
            warn!("Request from {} lost: {}", speaker, e);
        }
    }

    async fn on_reply(&mut self, raw: &str, peers: &impl PeerDirectory) {
        let reply = match parse_reply(raw) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Dropping reply in room {}: {}", self.room_id, e);
                return;
            }
        };

        let now = Instant::now();
        let cooldown = self.config.dedup_cooldown();
        if let Some(last) = &self.last_dispatch {
            if last.is_duplicate(&reply.message, now, cooldown) {
                info!("Suppressing duplicate reply {:?}", reply.message);
                return;
            }
        }

        let target = self.resolve_target(&reply.target, peers);
        if target.is_none() {
            debug!("Reply target {:?} unknown, broadcasting", reply.target);
        }
        self.last_dispatch = Some(DispatchRecord::new(reply.message.clone(), target.clone(), now));

        self.queued.push_back(Synthesis {
            target,
            text: reply.message,
        });
        self.next_synthesis().await;
    }

    fn resolve_target(&self, target: &str, peers: &impl PeerDirectory) -> Option<PeerId> {
        let alias = self
            .config
            .requester_aliases
            .iter()
            .any(|a| a.eq_ignore_ascii_case(target));
        if alias && peers.resolve(target).is_none() {
            return self.last_requester.clone();
        }
        peers.resolve(target)
    }

    /// Send the next queued reply to the synthesizer if none is in flight.
    async fn next_synthesis(&mut self) {
        if self.in_flight.is_some() || self.discarding {
            return;
        }
        while let Some(next) = self.queued.pop_front() {
            match self
                .pipeline
                .synthesize
                .send(SHARED_WORKER, Bytes::from(next.text))
                .await
            {
                Ok(()) => {
                    self.in_flight = Some(InFlight {
                        target: next.target,
                        deadline: Instant::now() + self.config.synthesis_timeout(),
                    });
                    return;
                }
                Err(e) => warn!("Reply lost before synthesis: {}", e),
            }
        }
    }

    /// Abandon the synthesis in flight if its deadline has passed.
    pub async fn on_synthesis_timeout(&mut self, now: Instant) {
        if !self.in_flight.as_ref().is_some_and(|f| now >= f.deadline) {
            return;
        }
        warn!("Synthesis in room {} timed out, stopping the worker", self.room_id);
        self.in_flight = None;
        self.discarding = true;
        self.pipeline.synthesize.stop(SHARED_WORKER).await;
    }

    async fn on_synthesized(&mut self, audio: Bytes) -> Option<Delivery> {
        if self.discarding {
            debug!("Discarding {} bytes from an abandoned synthesis", audio.len());
            return None;
        }
        let Some(InFlight { target, .. }) = self.in_flight.take() else {
            warn!("Unrequested synthesis output ({} bytes) dropped", audio.len());
            return None;
        };
        self.next_synthesis().await;

        let info = AudioInfo {
            format: self.config.output_format.clone(),
            sample_rate: self.config.output_sample_rate,
            channels: self.config.output_channels,
            bits_per_sample: self.config.output_bits_per_sample,
            length: audio.len(),
            target_peer: target.clone(),
        };
        Some(Delivery {
            target,
            info,
            chunks: chunk_audio(&audio, self.config.max_chunk_bytes),
        })
    }

    pub async fn shutdown(&mut self) {
        self.queued.clear();
        self.in_flight = None;
        self.pipeline.shutdown().await;
    }
}
