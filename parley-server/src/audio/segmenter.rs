use crate::audio::AudioFrame;
use crate::config::SegmenterConfig;
use bytes::{Bytes, BytesMut};
use parley_core::PeerId;
use std::time::Duration;
use tracing::debug;

/// A contiguous span of speech from one peer, as little-endian s16 PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub peer_id: PeerId,
    pub audio: Bytes,
    pub sample_rate: u32,
    pub start_time: Duration,
    pub last_voice_time: Duration,
}

impl Utterance {
    pub fn speech_duration(&self) -> Duration {
        self.last_voice_time.saturating_sub(self.start_time)
    }
}

/// Amplitude-gated speech segmenter for a single peer.
///
/// The segmenter is idle until a frame reaches the amplitude threshold. From then on
/// every frame is accumulated; the utterance ends once the trailing silence reaches
/// `silence_ms`, or when it grows past `max_utterance_ms`. Utterances whose voiced span
/// (first voiced sample to last voiced sample) is shorter than `min_duration_ms` are
/// dropped as noise.
pub struct AudioSegmenter {
    peer_id: PeerId,
    config: SegmenterConfig,
    is_speaking: bool,
    speech_start: Duration,
    last_voice_time: Duration,
    sample_rate: u32,
    buffer: BytesMut,
}

impl AudioSegmenter {
    pub fn new(peer_id: PeerId, config: SegmenterConfig) -> Self {
        Self {
            peer_id,
            config,
            is_speaking: false,
            speech_start: Duration::ZERO,
            last_voice_time: Duration::ZERO,
            sample_rate: 0,
            buffer: BytesMut::new(),
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    /// Feed one frame; returns an utterance when this frame closes one.
    pub fn push(&mut self, frame: &AudioFrame) -> Option<Utterance> {
        let voiced = frame.mean_abs_amplitude() >= self.config.amplitude_threshold;

        if !self.is_speaking {
            if !voiced {
                return None;
            }
            debug!("Speech started for {} at {:?}", self.peer_id, frame.timestamp);
            self.is_speaking = true;
            self.speech_start = frame.timestamp;
            self.sample_rate = frame.sample_rate;
            self.buffer.clear();
        }

        frame.write_pcm_le(&mut self.buffer);

        if voiced {
            self.last_voice_time = frame.end();
            if self.last_voice_time.saturating_sub(self.speech_start) >= self.config.max_utterance()
            {
                debug!("Utterance for {} hit the length cap", self.peer_id);
                return self.finish();
            }
            return None;
        }

        if frame.end().saturating_sub(self.last_voice_time) >= self.config.silence() {
            return self.finish();
        }

        None
    }

    /// Drop any partially accumulated utterance.
    pub fn reset(&mut self) {
        self.is_speaking = false;
        self.buffer.clear();
    }

    fn finish(&mut self) -> Option<Utterance> {
        self.is_speaking = false;
        let audio = self.buffer.split().freeze();
        let spoken = self.last_voice_time.saturating_sub(self.speech_start);

        if spoken < self.config.min_duration() {
            debug!(
                "Discarding {:?} of sound from {} as noise",
                spoken, self.peer_id
            );
            return None;
        }

        Some(Utterance {
            peer_id: self.peer_id.clone(),
            audio,
            sample_rate: self.sample_rate,
            start_time: self.speech_start,
            last_voice_time: self.last_voice_time,
        })
    }
}
