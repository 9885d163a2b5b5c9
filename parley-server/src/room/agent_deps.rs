use crate::config::AgentConfig;
use crate::error::ConfigError;
use crate::pipeline::PipelineFactory;
use crate::router::WakeGate;
use crate::signaling::SignalingOutput;
use crate::transport::MediaTransportFactory;
use std::sync::Arc;

/// Collaborators shared by every room of the agent.
#[derive(Clone)]
pub struct AgentDeps {
    pub config: Arc<AgentConfig>,
    pub media: Arc<dyn MediaTransportFactory>,
    pub signaling: Arc<dyn SignalingOutput>,
    pub pipelines: Arc<dyn PipelineFactory>,
    pub wake_gate: Arc<WakeGate>,
}

impl AgentDeps {
    pub fn new(
        config: AgentConfig,
        media: Arc<dyn MediaTransportFactory>,
        signaling: Arc<dyn SignalingOutput>,
        pipelines: Arc<dyn PipelineFactory>,
    ) -> Result<Self, ConfigError> {
        let wake_gate = Arc::new(WakeGate::new(&config.router)?);
        Ok(Self {
            config: Arc::new(config),
            media,
            signaling,
            pipelines,
            wake_gate,
        })
    }
}
