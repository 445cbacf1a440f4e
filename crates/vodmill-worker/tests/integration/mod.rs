//! Shared harness for the pipeline integration tests.

mod pipeline_tests;
mod scheduler_tests;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use vodmill_media::MediaError;
use vodmill_models::{MediaId, ProfileCatalog, SetStatus, SourceInfo};
use vodmill_queue::{JobScheduler, SchedulerConfig};
use vodmill_state::{init_memory_pool, StateTracker};
use vodmill_worker::{
    Assembler, EncodeRequest, EncodingEngine, OutputLayout, TaskExecutor, WorkerConfig,
    WorkerError, WorkerResult,
};

/// What the scripted engine does for each invocation.
#[derive(Debug, Clone, Copy)]
pub enum EngineScript {
    /// Write a small placeholder output file and succeed.
    Succeed,
    /// Fail with an engine error every time.
    AlwaysFail,
    /// Fail the first N invocations, then succeed.
    FailTimes(u32),
    /// Block until the cancel signal arrives.
    WaitForCancel,
}

/// Deterministic stand-in for the ffmpeg engine.
pub struct ScriptedEngine {
    script: EngineScript,
    invocations: AtomicU32,
}

impl ScriptedEngine {
    pub fn new(script: EngineScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            invocations: AtomicU32::new(0),
        })
    }

    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }

    async fn write_output(&self, path: &PathBuf) -> WorkerResult<String> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkerError::Media(MediaError::Io(e)))?;
        }
        tokio::fs::write(path, b"scripted output")
            .await
            .map_err(|e| WorkerError::Media(MediaError::Io(e)))?;
        Ok(path.to_string_lossy().to_string())
    }
}

#[async_trait]
impl EncodingEngine for ScriptedEngine {
    async fn encode(
        &self,
        request: &EncodeRequest,
        progress: vodmill_worker::engine::ProgressSink<'_>,
        mut cancel: watch::Receiver<bool>,
    ) -> WorkerResult<String> {
        let call = self.invocations.fetch_add(1, Ordering::SeqCst);
        progress(50);

        match self.script {
            EngineScript::Succeed => self.write_output(&request.output_path).await,
            EngineScript::AlwaysFail => Err(WorkerError::Media(MediaError::ffmpeg_failed(
                "scripted failure",
                None,
                Some(1),
            ))),
            EngineScript::FailTimes(n) if call < n => Err(WorkerError::Media(
                MediaError::ffmpeg_failed("scripted transient failure", None, Some(1)),
            )),
            EngineScript::FailTimes(_) => self.write_output(&request.output_path).await,
            EngineScript::WaitForCancel => loop {
                if *cancel.borrow() {
                    return Err(WorkerError::Media(MediaError::Cancelled));
                }
                if cancel.changed().await.is_err() {
                    return Err(WorkerError::Media(MediaError::Cancelled));
                }
            },
        }
    }
}

pub struct Harness {
    pub scheduler: Arc<JobScheduler>,
    pub tracker: Arc<StateTracker>,
    pub executor: Arc<TaskExecutor>,
    pub shutdown: watch::Sender<bool>,
    _output_dir: tempfile::TempDir,
}

impl Harness {
    /// Wire a full worker stack around the given engine, with fast lease
    /// and sweep intervals so expiry paths are testable in wall time.
    pub fn new(engine: Arc<dyn EncodingEngine>) -> Self {
        let pool = init_memory_pool().unwrap();
        let tracker = Arc::new(StateTracker::new(pool));
        let scheduler_config = SchedulerConfig {
            lease_ttl: Duration::from_secs(2),
            claim_poll: Duration::from_millis(50),
        };
        let scheduler = Arc::new(JobScheduler::new(tracker.clone(), scheduler_config));

        let output_dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(output_dir.path());
        let assembler = Arc::new(Assembler::new(
            tracker.clone(),
            ProfileCatalog::standard(),
            layout,
        ));

        let config = WorkerConfig {
            long_slots: 2,
            short_slots: 1,
            heartbeat_interval: Duration::from_millis(500),
            sweep_interval: Duration::from_millis(200),
            shutdown_timeout: Duration::from_secs(5),
            output_dir: output_dir.path().to_string_lossy().to_string(),
            ..WorkerConfig::default()
        };

        let executor = Arc::new(TaskExecutor::new(
            config,
            scheduler.clone(),
            engine,
            None,
            assembler,
            ProfileCatalog::standard(),
        ));

        let (shutdown, _) = watch::channel(false);

        Self {
            scheduler,
            tracker,
            executor,
            shutdown,
            _output_dir: output_dir,
        }
    }

    /// Spawn the worker loops.
    pub fn start(&self) {
        tokio::spawn(self.executor.clone().run(self.shutdown.subscribe()));
    }

    /// Poll the tracker until the set reaches a finalized terminal status
    /// (for successful sets, that includes the assembly outcome).
    pub async fn wait_for_terminal(&self, media_id: &MediaId, timeout: Duration) -> SetStatus {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let set = self.tracker.load_set(media_id).unwrap();
            let tasks = self.tracker.load_tasks(media_id).unwrap();
            let status = set.derive_status(&tasks);
            if status.is_terminal() {
                let finalized = match status {
                    SetStatus::Success | SetStatus::PartialSuccess => set.artifacts.is_some(),
                    _ => true,
                };
                if finalized {
                    return status;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("set {media_id} did not reach a terminal status, last seen {status:?}");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Poll until every task of the set is terminal, returning the tasks.
    pub async fn wait_for_tasks_terminal(
        &self,
        media_id: &MediaId,
        timeout: Duration,
    ) -> Vec<vodmill_models::EncodeTask> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let tasks = self.tracker.load_tasks(media_id).unwrap();
            if !tasks.is_empty() && tasks.iter().all(|t| t.status.is_terminal()) {
                return tasks;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("tasks of {media_id} did not all reach terminal status");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub fn probed_720p(duration: f64) -> SourceInfo {
    SourceInfo {
        width: 1280,
        height: 720,
        duration,
        has_audio: true,
        codec: "h264".to_string(),
        size: 20_000_000,
        fps: 30.0,
        keyframe_interval: Some(2.0),
    }
}
