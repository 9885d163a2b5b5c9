use crate::error::ConfigError;
use crate::pipeline::Framing;
use crate::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Top-level agent configuration. Every section falls back to its defaults, so an
/// empty TOML file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub negotiation: NegotiationConfig,
    pub segmenter: SegmenterConfig,
    pub router: RouterConfig,
    pub transport: TransportConfig,
    pub pipeline: PipelineConfig,
}

impl AgentConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Period of the membership reconciliation pass.
    pub reconcile_interval_ms: u64,
    /// How long a room may stay empty before it is torn down.
    pub empty_room_grace_ms: u64,
}

impl RegistryConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms.max(1))
    }

    pub fn empty_room_grace(&self) -> Duration {
        Duration::from_millis(self.empty_room_grace_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: 5_000,
            empty_room_grace_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Delay before the single follow-up offer after the first accepted answer.
    pub renegotiate_delay_ms: u64,
}

impl NegotiationConfig {
    pub fn renegotiate_delay(&self) -> Duration {
        Duration::from_millis(self.renegotiate_delay_ms)
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            renegotiate_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Mean absolute sample value (linear 16-bit PCM) at or above which a frame is voiced.
    pub amplitude_threshold: f32,
    pub min_duration_ms: u64,
    pub silence_ms: u64,
    pub max_utterance_ms: u64,
}

impl SegmenterConfig {
    pub fn min_duration(&self) -> Duration {
        Duration::from_millis(self.min_duration_ms)
    }

    pub fn silence(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }

    pub fn max_utterance(&self) -> Duration {
        Duration::from_millis(self.max_utterance_ms)
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            amplitude_threshold: 50.0,
            min_duration_ms: 200,
            silence_ms: 1_000,
            max_utterance_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Name the agent uses in the generation protocol (`<peer> -> <agent_name>:: ...`).
    pub agent_name: String,
    /// Spellings of the agent's name a transcript must contain to be dispatched.
    pub name_variants: Vec<String>,
    /// Greeting words that are stripped from the message but never required.
    pub attention_phrases: Vec<String>,
    pub dedup_cooldown_ms: u64,
    /// Reply targets that mean "whoever asked last", for generators that cannot name
    /// the speaker.
    pub requester_aliases: Vec<String>,
    /// How long one synthesis may run before it is abandoned and its worker stopped.
    pub synthesis_timeout_ms: u64,
    pub max_chunk_bytes: usize,
    pub output_format: String,
    pub output_sample_rate: u32,
    pub output_channels: u16,
    pub output_bits_per_sample: u16,
}

impl RouterConfig {
    pub fn dedup_cooldown(&self) -> Duration {
        Duration::from_millis(self.dedup_cooldown_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms.max(1))
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            agent_name: "Agent".to_owned(),
            name_variants: ["genie", "jeannie", "jeanie", "jenny", "gini", "agent"]
                .into_iter()
                .map(String::from)
                .collect(),
            attention_phrases: ["hey", "hi", "hello", "okay", "ok", "excuse me"]
                .into_iter()
                .map(String::from)
                .collect(),
            dedup_cooldown_ms: 1_000,
            requester_aliases: vec!["User".to_owned()],
            synthesis_timeout_ms: 20_000,
            max_chunk_bytes: 16 * 1024,
            output_format: "pcm_s16le".to_owned(),
            output_sample_rate: 48_000,
            output_channels: 1,
            output_bits_per_sample: 16,
        }
    }
}

/// External command backing one pipeline stage.
///
/// `{identifier}` and `{room}` in `args` are substituted per worker. Framings left
/// unset fall back to the stage's own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_framing: Option<Framing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_framing: Option<Framing>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
            request_framing: None,
            response_framing: None,
        }
    }

    pub fn with_framing(mut self, request: Framing, response: Framing) -> Self {
        self.request_framing = Some(request);
        self.response_framing = Some(response);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Prefix marking payload lines on a text worker's stdout; other lines are logs.
    pub response_prefix: String,
    /// Quiet period that ends one unframed response.
    pub response_gap_ms: u64,
    pub transcribe: WorkerCommand,
    pub generate: WorkerCommand,
    pub synthesize: WorkerCommand,
}

impl PipelineConfig {
    pub fn response_gap(&self) -> Duration {
        Duration::from_millis(self.response_gap_ms.max(1))
    }
}

impl Default for PipelineConfig {
    // The stock speech and RAG services: raw PCM in and `>` lines out for
    // transcription, JSON lines for generation, raw l16 audio out for synthesis.
    fn default() -> Self {
        Self {
            response_prefix: ">".to_owned(),
            response_gap_ms: 250,
            transcribe: WorkerCommand::new(
                "python3",
                &[
                    "-u",
                    "services/speech_to_text/transcribe_local.py",
                    "--peer",
                    "{identifier}",
                    "--activity_id",
                    "{room}",
                ],
            )
            .with_framing(Framing::Raw, Framing::Lines),
            generate: WorkerCommand::new(
                "python3",
                &[
                    "-u",
                    "services/text_generation/rag_service.py",
                    "--activity_id",
                    "{room}",
                    "--api_base_url",
                    "http://localhost:3000",
                    "--preprompt",
                    "You are Agent, a voice assistant in a group call. Answer in one or two short spoken sentences.",
                ],
            )
            .with_framing(Framing::Lines, Framing::Lines),
            synthesize: WorkerCommand::new(
                "python3",
                &["-u", "services/text_to_speech/text_to_speech_ibm.py"],
            )
            .with_framing(Framing::Lines, Framing::Raw),
        }
    }
}
