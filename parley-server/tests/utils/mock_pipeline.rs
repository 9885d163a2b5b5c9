use async_trait::async_trait;
use bytes::Bytes;
use parley_core::RoomId;
use parley_server::{
    AgentPipeline, PipelineError, PipelineFactory, PipelineStageClient, Stage, StageEvent,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// A pipeline stage that records requests and never answers on its own. Tests answer
/// for it with [`MockPipeline::reply`].
pub struct MockStage {
    stage: Stage,
    started: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, Bytes)>>,
    shut_down: AtomicBool,
}

impl MockStage {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(String, Bytes)> {
        self.sent.lock().unwrap().clone()
    }

    /// Requests decoded as UTF-8, for the text stages.
    pub fn sent_text(&self) -> Vec<(String, String)> {
        self.sent()
            .into_iter()
            .map(|(id, p)| (id, String::from_utf8_lossy(&p).into_owned()))
            .collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub async fn wait_for_sent(&self, count: usize, timeout_ms: u64) -> bool {
        let start = tokio::time::Instant::now();
        let timeout = Duration::from_millis(timeout_ms);

        loop {
            if self.sent.lock().unwrap().len() >= count {
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl PipelineStageClient for MockStage {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn start(&self, identifier: &str) -> Result<(), PipelineError> {
        self.started.lock().unwrap().push(identifier.to_owned());
        Ok(())
    }

    async fn send(&self, identifier: &str, payload: Bytes) -> Result<(), PipelineError> {
        self.sent
            .lock()
            .unwrap()
            .push((identifier.to_owned(), payload));
        Ok(())
    }

    async fn stop(&self, identifier: &str) {
        self.stopped.lock().unwrap().push(identifier.to_owned());
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

/// The three mock stages of one room plus the room's stage event channel.
#[derive(Clone)]
pub struct MockPipeline {
    pub transcribe: Arc<MockStage>,
    pub generate: Arc<MockStage>,
    pub synthesize: Arc<MockStage>,
    events: mpsc::Sender<StageEvent>,
}

impl MockPipeline {
    /// Answer as a worker would: one payload from `identifier` of `stage`.
    pub async fn reply(&self, stage: Stage, identifier: &str, payload: impl Into<Bytes>) {
        let _ = self
            .events
            .send(StageEvent::data(stage, identifier, payload))
            .await;
    }

    pub async fn emit(&self, event: StageEvent) {
        let _ = self.events.send(event).await;
    }
}

#[derive(Clone, Default)]
pub struct MockPipelineFactory {
    pipelines: Arc<Mutex<HashMap<RoomId, MockPipeline>>>,
    builds: Arc<AtomicUsize>,
}

impl MockPipelineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// The pipeline most recently built for `room`.
    pub fn pipeline(&self, room: &str) -> Option<MockPipeline> {
        let room_id = RoomId::parse(room).ok()?;
        self.pipelines.lock().unwrap().get(&room_id).cloned()
    }
}

impl PipelineFactory for MockPipelineFactory {
    fn build(&self, room_id: &RoomId, events: mpsc::Sender<StageEvent>) -> AgentPipeline {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let mock = MockPipeline {
            transcribe: Arc::new(MockStage::new(Stage::Transcribe)),
            generate: Arc::new(MockStage::new(Stage::Generate)),
            synthesize: Arc::new(MockStage::new(Stage::Synthesize)),
            events,
        };
        let pipeline = AgentPipeline {
            transcribe: mock.transcribe.clone(),
            generate: mock.generate.clone(),
            synthesize: mock.synthesize.clone(),
        };
        self.pipelines.lock().unwrap().insert(room_id.clone(), mock);
        pipeline
    }
}
