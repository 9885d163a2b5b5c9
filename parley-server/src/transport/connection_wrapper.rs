use crate::audio::AudioFrame;
use crate::transport::{
    MediaTransport, MediaTransportFactory, SdpKind, TransportConfig, TransportEvent,
    decode_ulaw_payload,
};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use parley_core::PeerId;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_PCMU, MediaEngine};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::track::track_remote::TrackRemote;

const PCMU_CLOCK_RATE: u32 = 8000;

/// webrtc-rs peer connection for one peer.
///
/// Inbound audio arrives either as a PCMU track or as raw s16le PCM on a data channel
/// opened by the peer; replies go out on that same data channel.
pub struct ConnectionWrapper {
    pub peer_id: PeerId,
    pub peer_connection: Arc<RTCPeerConnection>,
    data_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
}

impl ConnectionWrapper {
    pub async fn new(
        peer_id: PeerId,
        config: TransportConfig,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<Self> {
        let mut m = MediaEngine::default();
        m.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_PCMU.to_owned(),
                    clock_rate: PCMU_CLOCK_RATE,
                    channels: 1,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                payload_type: 0,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;
        let registry = register_default_interceptors(Registry::new(), &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.ice_servers,
                credential: String::new(),
                username: String::new(),
            }],
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await?);
        let data_channel = Arc::new(Mutex::new(None));

        let state_tx = event_tx.clone();
        let uid_state = peer_id.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let tx = state_tx.clone();
                let uid = uid_state.clone();

                Box::pin(async move {
                    info!("Peer connection state for {}: {:?}", uid, s);
                    if s == RTCPeerConnectionState::Closed {
                        let _ = tx.send(TransportEvent::Disconnected(uid)).await;
                    }
                })
            },
        ));

        let ice_state_tx = event_tx.clone();
        let uid_ice_state = peer_id.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |s: RTCIceConnectionState| {
                let tx = ice_state_tx.clone();
                let uid = uid_ice_state.clone();

                Box::pin(async move {
                    debug!("ICE connection state for {}: {:?}", uid, s);
                    if s == RTCIceConnectionState::Failed {
                        let _ = tx.send(TransportEvent::IceFailed(uid)).await;
                    }
                })
            },
        ));

        let ice_tx = event_tx.clone();
        let uid_ice = peer_id.clone();
        peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();
            let uid = uid_ice.clone();

            Box::pin(async move {
                let Some(candidate) = c else { return };
                let Ok(json_candidate) = candidate.to_json() else {
                    return;
                };
                let Ok(str_candidate) = serde_json::to_string(&json_candidate) else {
                    return;
                };
                let _ = tx
                    .send(TransportEvent::CandidateGenerated(uid, str_candidate))
                    .await;
            })
        }));

        let track_tx = event_tx.clone();
        let uid_track = peer_id.clone();
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = track_tx.clone();
            let uid = uid_track.clone();

            Box::pin(async move {
                if track.kind() != RTPCodecType::Audio {
                    return;
                }
                info!(
                    "Audio track {} from {} ({})",
                    track.id(),
                    uid,
                    track.codec().capability.mime_type
                );
                tokio::spawn(read_audio_track(track, uid, tx));
            })
        }));

        let dc_tx = event_tx.clone();
        let uid_dc = peer_id.clone();
        let dc_slot = data_channel.clone();
        let dc_sample_rate = config.data_channel_sample_rate;
        peer_connection.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = dc_tx.clone();
            let uid = uid_dc.clone();
            let slot = dc_slot.clone();

            Box::pin(async move {
                debug!("DataChannel '{}' opened by {}", dc.label(), uid);

                let dc_on_open = dc.clone();
                let tx_open = tx.clone();
                let uid_open = uid.clone();
                dc.on_open(Box::new(move || {
                    let tx = tx_open.clone();
                    let uid = uid_open.clone();
                    let slot = slot.clone();
                    let channel = dc_on_open.clone();

                    Box::pin(async move {
                        info!("DataChannel ready for {}", uid);
                        *slot.lock().await = Some(channel);
                        let _ = tx.send(TransportEvent::ChannelReady(uid)).await;
                    })
                }));

                let received_samples = Arc::new(AtomicU64::new(0));
                let tx_msg = tx.clone();
                let uid_msg = uid.clone();
                dc.on_message(Box::new(move |msg: DataChannelMessage| {
                    let tx = tx_msg.clone();
                    let uid = uid_msg.clone();
                    let received = received_samples.clone();

                    Box::pin(async move {
                        if msg.is_string || dc_sample_rate == 0 {
                            return;
                        }
                        let count = (msg.data.len() / 2) as u64;
                        let offset = received.fetch_add(count, Ordering::Relaxed);
                        let timestamp = samples_to_duration(offset, dc_sample_rate);
                        let frame = AudioFrame::from_pcm_le(&msg.data, dc_sample_rate, timestamp);
                        let _ = tx.send(TransportEvent::Audio(uid, frame)).await;
                    })
                }));
            })
        }));

        Ok(Self {
            peer_id,
            peer_connection,
            data_channel,
        })
    }

    async fn open_channel(&self) -> Result<Arc<RTCDataChannel>> {
        match self.data_channel.lock().await.as_ref() {
            Some(channel) => Ok(channel.clone()),
            None => bail!("no open data channel for {}", self.peer_id),
        }
    }

    async fn rollback_local_offer(&self) -> Result<()> {
        // webrtc-rs has no rollback constructor; the serde form is the public path.
        let rollback: RTCSessionDescription =
            serde_json::from_value(serde_json::json!({ "type": "rollback", "sdp": "" }))
                .context("Failed to build rollback description")?;
        self.peer_connection.set_local_description(rollback).await?;
        debug!("Rolled back local offer for {}", self.peer_id);
        Ok(())
    }
}

#[async_trait]
impl MediaTransport for ConnectionWrapper {
    async fn create_offer(&self, ice_restart: bool) -> Result<String> {
        let options = RTCOfferOptions {
            ice_restart,
            ..Default::default()
        };
        let offer = self.peer_connection.create_offer(Some(options)).await?;
        Ok(offer.sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self.peer_connection.create_answer(None).await?;
        Ok(answer.sdp)
    }

    async fn set_local_description(&self, kind: SdpKind, sdp: String) -> Result<()> {
        let desc = description(kind, sdp)?;
        self.peer_connection.set_local_description(desc).await?;
        Ok(())
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: String) -> Result<()> {
        if kind == SdpKind::Offer
            && self.peer_connection.signaling_state() == RTCSignalingState::HaveLocalOffer
        {
            self.rollback_local_offer().await?;
        }
        let desc = description(kind, sdp)?;
        self.peer_connection.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate_json: String) -> Result<()> {
        let candidate: RTCIceCandidateInit =
            serde_json::from_str(&candidate_json).context("Failed to parse ICE candidate JSON")?;
        self.peer_connection.add_ice_candidate(candidate).await?;
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.open_channel().await?.send_text(text).await?;
        Ok(())
    }

    async fn send_binary(&self, data: Bytes) -> Result<()> {
        self.open_channel().await?.send(&data).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.data_channel.lock().await.take();
        self.peer_connection.close().await?;
        Ok(())
    }
}

/// Creates a [`ConnectionWrapper`] per peer from a shared [`TransportConfig`].
pub struct WebRtcTransportFactory {
    config: TransportConfig,
}

impl WebRtcTransportFactory {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MediaTransportFactory for WebRtcTransportFactory {
    async fn connect(
        &self,
        peer_id: PeerId,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn MediaTransport>> {
        let wrapper = ConnectionWrapper::new(peer_id, self.config.clone(), events).await?;
        Ok(Arc::new(wrapper))
    }
}

fn description(kind: SdpKind, sdp: String) -> Result<RTCSessionDescription> {
    let desc = match kind {
        SdpKind::Offer => RTCSessionDescription::offer(sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(sdp)?,
    };
    Ok(desc)
}

fn samples_to_duration(samples: u64, sample_rate: u32) -> Duration {
    Duration::from_nanos(samples.saturating_mul(1_000_000_000) / sample_rate.max(1) as u64)
}

async fn read_audio_track(
    track: Arc<TrackRemote>,
    peer_id: PeerId,
    tx: mpsc::Sender<TransportEvent>,
) {
    let mut first_timestamp = None;

    loop {
        let packet = match track.read_rtp().await {
            Ok((packet, _attributes)) => packet,
            Err(e) => {
                debug!("Audio track for {} ended: {}", peer_id, e);
                break;
            }
        };
        if packet.payload.is_empty() {
            continue;
        }

        let base = *first_timestamp.get_or_insert(packet.header.timestamp);
        let offset = packet.header.timestamp.wrapping_sub(base) as u64;
        let frame = AudioFrame::new(
            decode_ulaw_payload(&packet.payload),
            PCMU_CLOCK_RATE,
            samples_to_duration(offset, PCMU_CLOCK_RATE),
        );

        if tx
            .send(TransportEvent::Audio(peer_id.clone(), frame))
            .await
            .is_err()
        {
            warn!("Room stopped listening to audio from {}", peer_id);
            break;
        }
    }
}
