use crate::config::{PipelineConfig, WorkerCommand};
use crate::error::PipelineError;
use crate::pipeline::{
    AgentPipeline, Framing, PipelineFactory, PipelineStageClient, Stage, StageEvent,
    StageEventKind,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parley_core::RoomId;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite, LengthDelimitedCodec, LinesCodec};
use tracing::{debug, info, warn};

struct Worker {
    id: u64,
    input: mpsc::Sender<Bytes>,
    // Dropping the worker drops this and stops the process.
    _stop: oneshot::Sender<()>,
}

/// A pipeline stage backed by one child process per identifier.
pub struct ProcessStage {
    stage: Stage,
    command: WorkerCommand,
    room_id: RoomId,
    response_prefix: String,
    response_gap: Duration,
    events: mpsc::Sender<StageEvent>,
    workers: Arc<DashMap<String, Worker>>,
    next_worker_id: AtomicU64,
}

impl ProcessStage {
    pub fn new(
        stage: Stage,
        command: WorkerCommand,
        room_id: RoomId,
        response_prefix: String,
        events: mpsc::Sender<StageEvent>,
    ) -> Self {
        Self {
            stage,
            command,
            room_id,
            response_prefix,
            response_gap: Duration::from_millis(250),
            events,
            workers: Arc::new(DashMap::new()),
            next_worker_id: AtomicU64::new(1),
        }
    }

    pub fn with_response_gap(mut self, gap: Duration) -> Self {
        self.response_gap = gap;
        self
    }

    fn request_framing(&self) -> Framing {
        self.command
            .request_framing
            .unwrap_or_else(|| self.stage.request_framing())
    }

    fn response_framing(&self) -> Framing {
        self.command
            .response_framing
            .unwrap_or_else(|| self.stage.response_framing())
    }

    pub fn running_workers(&self) -> usize {
        self.workers.len()
    }

    fn worker_input(&self, identifier: &str) -> Result<mpsc::Sender<Bytes>, PipelineError> {
        let worker = self
            .workers
            .entry(identifier.to_owned())
            .or_try_insert_with(|| self.spawn_worker(identifier))?;
        Ok(worker.input.clone())
    }

    fn spawn_worker(&self, identifier: &str) -> Result<Worker, PipelineError> {
        let stage = self.stage.as_str();
        let args = self.command.args.iter().map(|arg| {
            arg.replace("{identifier}", identifier)
                .replace("{room}", self.room_id.as_str())
        });

        let mut child = Command::new(&self.command.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PipelineError::Spawn {
                stage,
                program: self.command.program.clone(),
                source,
            })?;

        let missing = |pipe| PipelineError::MissingPipe {
            stage,
            identifier: identifier.to_owned(),
            pipe,
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let (input_tx, input_rx) = mpsc::channel(32);
        let (stop_tx, stop_rx) = oneshot::channel();

        info!(
            "Started {} worker for {} in room {} (pid {:?})",
            stage,
            identifier,
            self.room_id,
            child.id()
        );

        tokio::spawn(write_requests(
            self.request_framing(),
            stdin,
            input_rx,
        ));
        tokio::spawn(
            WorkerOutput {
                stage: self.stage,
                identifier: identifier.to_owned(),
                worker_id: id,
                framing: self.response_framing(),
                response_prefix: self.response_prefix.clone(),
                response_gap: self.response_gap,
                events: self.events.clone(),
                workers: self.workers.clone(),
            }
            .run(child, stdout, stop_rx),
        );

        Ok(Worker {
            id,
            input: input_tx,
            _stop: stop_tx,
        })
    }
}

#[async_trait]
impl PipelineStageClient for ProcessStage {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn start(&self, identifier: &str) -> Result<(), PipelineError> {
        self.worker_input(identifier).map(|_| ())
    }

    /// Never waits on the worker: a full input queue rejects the request.
    async fn send(&self, identifier: &str, payload: Bytes) -> Result<(), PipelineError> {
        let input = self.worker_input(identifier)?;
        let stage = self.stage.as_str();
        input.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => PipelineError::Backlogged {
                stage,
                identifier: identifier.to_owned(),
            },
            TrySendError::Closed(_) => PipelineError::WorkerGone {
                stage,
                identifier: identifier.to_owned(),
            },
        })
    }

    async fn stop(&self, identifier: &str) {
        if self.workers.remove(identifier).is_some() {
            debug!("Stopping {} worker for {}", self.stage, identifier);
        }
    }

    async fn shutdown(&self) {
        self.workers.clear();
    }
}

async fn write_requests(framing: Framing, stdin: ChildStdin, mut input: mpsc::Receiver<Bytes>) {
    match framing {
        Framing::Lines => {
            let mut sink = FramedWrite::new(stdin, LinesCodec::new());
            while let Some(payload) = input.recv().await {
                let line = String::from_utf8_lossy(&payload).into_owned();
                if let Err(e) = sink.send(line).await {
                    debug!("Worker stdin closed: {}", e);
                    break;
                }
            }
        }
        Framing::LengthPrefixed => {
            let mut sink = FramedWrite::new(stdin, LengthDelimitedCodec::new());
            while let Some(payload) = input.recv().await {
                if let Err(e) = sink.send(payload).await {
                    debug!("Worker stdin closed: {}", e);
                    break;
                }
            }
        }
        Framing::Raw => {
            let mut sink = FramedWrite::new(stdin, BytesCodec::new());
            while let Some(payload) = input.recv().await {
                if let Err(e) = sink.send(payload).await {
                    debug!("Worker stdin closed: {}", e);
                    break;
                }
            }
        }
    }
}

struct WorkerOutput {
    stage: Stage,
    identifier: String,
    worker_id: u64,
    framing: Framing,
    response_prefix: String,
    response_gap: Duration,
    events: mpsc::Sender<StageEvent>,
    workers: Arc<DashMap<String, Worker>>,
}

impl WorkerOutput {
    async fn run(self, mut child: Child, stdout: ChildStdout, stop: oneshot::Receiver<()>) {
        let stopped = tokio::select! {
            _ = self.read_responses(stdout) => false,
            _ = stop => true,
        };

        if stopped {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {} worker for {}: {}", self.stage, self.identifier, e);
            }
        }
        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("Failed to reap {} worker for {}: {}", self.stage, self.identifier, e);
                None
            }
        };

        self.workers
            .remove_if(&self.identifier, |_, worker| worker.id == self.worker_id);
        info!(
            "{} worker for {} exited with {:?}",
            self.stage, self.identifier, code
        );
        self.emit(StageEventKind::Exit(code)).await;
    }

    async fn read_responses(&self, stdout: ChildStdout) {
        match self.framing {
            Framing::Lines => {
                let mut lines = FramedRead::new(stdout, LinesCodec::new());
                while let Some(line) = lines.next().await {
                    match line {
                        Ok(line) => match line.strip_prefix(self.response_prefix.as_str()) {
                            Some(payload) => {
                                let payload = payload.trim().to_owned();
                                self.emit(StageEventKind::Data(Bytes::from(payload))).await;
                            }
                            None => debug!("[{} {}] {}", self.stage, self.identifier, line),
                        },
                        Err(e) => {
                            self.emit(StageEventKind::Error(e.to_string())).await;
                            break;
                        }
                    }
                }
            }
            Framing::LengthPrefixed => {
                let mut frames = FramedRead::new(stdout, LengthDelimitedCodec::new());
                while let Some(frame) = frames.next().await {
                    match frame {
                        Ok(frame) => self.emit(StageEventKind::Data(frame.freeze())).await,
                        Err(e) => {
                            self.emit(StageEventKind::Error(e.to_string())).await;
                            break;
                        }
                    }
                }
            }
            Framing::Raw => self.read_unframed(stdout).await,
        }
    }

    /// Collect bytes until the worker has been quiet for `response_gap`, then emit them
    /// as one response.
    async fn read_unframed(&self, stdout: ChildStdout) {
        let mut chunks = FramedRead::new(stdout, BytesCodec::new());
        let mut pending = BytesMut::new();

        loop {
            let next = if pending.is_empty() {
                chunks.next().await
            } else {
                match tokio::time::timeout(self.response_gap, chunks.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        self.emit(StageEventKind::Data(pending.split().freeze())).await;
                        continue;
                    }
                }
            };

            match next {
                Some(Ok(chunk)) => pending.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    self.emit(StageEventKind::Error(e.to_string())).await;
                    break;
                }
                None => break,
            }
        }
        if !pending.is_empty() {
            self.emit(StageEventKind::Data(pending.freeze())).await;
        }
    }

    async fn emit(&self, kind: StageEventKind) {
        let event = StageEvent {
            stage: self.stage,
            identifier: self.identifier.clone(),
            kind,
        };
        if self.events.send(event).await.is_err() {
            debug!("Room no longer listens to {} events", self.stage);
        }
    }
}

/// Builds [`ProcessStage`]s from the worker commands in [`PipelineConfig`].
pub struct ProcessPipelineFactory {
    config: PipelineConfig,
}

impl ProcessPipelineFactory {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }
}

impl PipelineFactory for ProcessPipelineFactory {
    fn build(&self, room_id: &RoomId, events: mpsc::Sender<StageEvent>) -> AgentPipeline {
        let stage = |stage: Stage, command: &WorkerCommand| -> Arc<dyn PipelineStageClient> {
            Arc::new(
                ProcessStage::new(
                    stage,
                    command.clone(),
                    room_id.clone(),
                    self.config.response_prefix.clone(),
                    events.clone(),
                )
                .with_response_gap(self.config.response_gap()),
            )
        };

        AgentPipeline {
            transcribe: stage(Stage::Transcribe, &self.config.transcribe),
            generate: stage(Stage::Generate, &self.config.generate),
            synthesize: stage(Stage::Synthesize, &self.config.synthesize),
        }
    }
}
