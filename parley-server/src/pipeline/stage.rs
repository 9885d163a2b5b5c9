use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Transcribe,
    Generate,
    Synthesize,
}

/// How a payload is framed on a worker's pipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Newline-delimited UTF-8 text.
    Lines,
    /// 4-byte big-endian length followed by that many bytes.
    LengthPrefixed,
    /// Unframed bytes. A response ends when the worker goes quiet.
    Raw,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcribe => "transcribe",
            Stage::Generate => "generate",
            Stage::Synthesize => "synthesize",
        }
    }

    /// Request framing used when the worker command does not set one.
    pub fn request_framing(&self) -> Framing {
        match self {
            Stage::Transcribe => Framing::LengthPrefixed,
            Stage::Generate | Stage::Synthesize => Framing::Lines,
        }
    }

    /// Response framing used when the worker command does not set one.
    pub fn response_framing(&self) -> Framing {
        match self {
            Stage::Transcribe | Stage::Generate => Framing::Lines,
            Stage::Synthesize => Framing::LengthPrefixed,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEventKind {
    /// One response: a prefixed text line with the prefix removed, or one PCM buffer.
    Data(Bytes),
    Exit(Option<i32>),
    Error(String),
}

/// Output of a pipeline worker, tagged with the stage and worker identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageEvent {
    pub stage: Stage,
    pub identifier: String,
    pub kind: StageEventKind,
}

impl StageEvent {
    pub fn data(stage: Stage, identifier: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            stage,
            identifier: identifier.into(),
            kind: StageEventKind::Data(payload.into()),
        }
    }

    pub fn exit(stage: Stage, identifier: impl Into<String>, code: Option<i32>) -> Self {
        Self {
            stage,
            identifier: identifier.into(),
            kind: StageEventKind::Exit(code),
        }
    }
}
