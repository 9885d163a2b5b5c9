use crate::error::PipelineError;
use crate::pipeline::{Stage, StageEvent};
use async_trait::async_trait;
use bytes::Bytes;
use parley_core::RoomId;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Asynchronous request channel to one external pipeline stage.
///
/// Each identifier maps to at most one worker. Responses come back as [`StageEvent`]s on
/// the channel the stage was built with. Workers are never restarted on their own: a
/// crash loses in-flight requests and the next `send` or `start` spawns a fresh one.
#[async_trait]
pub trait PipelineStageClient: Send + Sync {
    fn stage(&self) -> Stage;

    /// Ensure a worker is running for `identifier`.
    async fn start(&self, identifier: &str) -> Result<(), PipelineError>;

    /// Queue one request, spawning the worker first if needed.
    async fn send(&self, identifier: &str, payload: Bytes) -> Result<(), PipelineError>;

    async fn stop(&self, identifier: &str);

    async fn shutdown(&self);
}

/// The three stages serving one room.
#[derive(Clone)]
pub struct AgentPipeline {
    pub transcribe: Arc<dyn PipelineStageClient>,
    pub generate: Arc<dyn PipelineStageClient>,
    pub synthesize: Arc<dyn PipelineStageClient>,
}

impl AgentPipeline {
    pub async fn shutdown(&self) {
        self.transcribe.shutdown().await;
        self.generate.shutdown().await;
        self.synthesize.shutdown().await;
    }
}

pub trait PipelineFactory: Send + Sync {
    fn build(&self, room_id: &RoomId, events: mpsc::Sender<StageEvent>) -> AgentPipeline;
}
