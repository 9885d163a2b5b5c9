use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

/// A block of decoded mono 16-bit PCM with its position in the peer's media timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    /// Media time of the first sample, relative to the start of the peer's stream.
    pub timestamp: Duration,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, timestamp: Duration) -> Self {
        Self {
            samples,
            sample_rate,
            timestamp,
        }
    }

    /// Decode little-endian s16 PCM. A trailing odd byte is ignored.
    pub fn from_pcm_le(data: &[u8], sample_rate: u32, timestamp: Duration) -> Self {
        let samples = data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(samples, sample_rate, timestamp)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = self.samples.len() as u128 * 1_000_000_000 / self.sample_rate as u128;
        Duration::from_nanos(nanos as u64)
    }

    pub fn end(&self) -> Duration {
        self.timestamp + self.duration()
    }

    pub fn mean_abs_amplitude(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: u64 = self
            .samples
            .iter()
            .map(|s| (*s as i32).unsigned_abs() as u64)
            .sum();
        total as f32 / self.samples.len() as f32
    }

    pub fn write_pcm_le(&self, out: &mut BytesMut) {
        out.reserve(self.samples.len() * 2);
        for sample in &self.samples {
            out.put_i16_le(*sample);
        }
    }

    pub fn to_pcm_le(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.write_pcm_le(&mut out);
        out.freeze()
    }
}
