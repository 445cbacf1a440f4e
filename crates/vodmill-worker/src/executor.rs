//! Worker pool: bounded execution slots pulling from the shared queues.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vodmill_media::{generate_poster, generate_sprite};
use vodmill_models::{
    EncodeTask, MediaEncodingSet, ProfileCatalog, QueueClass, TaskError, TaskId, WorkerId,
};
use vodmill_queue::{JobScheduler, QueueError};

use crate::assembler::Assembler;
use crate::config::WorkerConfig;
use crate::engine::{EncodeRequest, EncodingEngine, RemoteEngine};
use crate::error::{WorkerError, WorkerResult};
use crate::logging::TaskLogger;
use crate::orchestrator::PREVIEW_PROFILE;
use crate::retry::{FailureTracker, RetryPolicy};

/// Drives a fixed number of worker loops per queue class, plus the lease
/// expiry sweeper. Each loop claims, executes, reports and repeats until
/// shutdown is signalled; in-flight tasks drain within the configured
/// timeout before their engines are told to abort.
pub struct TaskExecutor {
    config: WorkerConfig,
    scheduler: Arc<JobScheduler>,
    local: Arc<dyn EncodingEngine>,
    remote: Option<Arc<RemoteEngine>>,
    assembler: Arc<Assembler>,
    catalog: ProfileCatalog,
    retry: RetryPolicy,
    cancellations: Mutex<HashMap<TaskId, watch::Sender<bool>>>,
}

impl TaskExecutor {
    pub fn new(
        config: WorkerConfig,
        scheduler: Arc<JobScheduler>,
        local: Arc<dyn EncodingEngine>,
        remote: Option<Arc<RemoteEngine>>,
        assembler: Arc<Assembler>,
        catalog: ProfileCatalog,
    ) -> Self {
        Self {
            config,
            scheduler,
            local,
            remote,
            assembler,
            catalog,
            retry: RetryPolicy::default(),
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    /// Signal the engines of the given in-flight tasks to abort. Used by
    /// set cancellation and by forced shutdown.
    pub fn signal_cancel(&self, task_ids: &[TaskId]) {
        let registry = self.cancellations.lock().unwrap_or_else(|e| e.into_inner());
        for id in task_ids {
            if let Some(tx) = registry.get(id) {
                let _ = tx.send(true);
            }
        }
    }

    fn signal_cancel_all(&self) {
        let registry = self.cancellations.lock().unwrap_or_else(|e| e.into_inner());
        for tx in registry.values() {
            let _ = tx.send(true);
        }
    }

    fn register_cancel(&self, task_id: &TaskId) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        self.cancellations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_id.clone(), tx);
        rx
    }

    fn deregister_cancel(&self, task_id: &TaskId) {
        self.cancellations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(task_id);
    }

    /// Run all worker loops until `shutdown` flips to true, then drain.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        for _ in 0..self.config.long_slots {
            handles.push(tokio::spawn(
                self.clone().worker_loop(QueueClass::Long, shutdown.clone()),
            ));
        }
        for _ in 0..self.config.short_slots {
            handles.push(tokio::spawn(
                self.clone().worker_loop(QueueClass::Short, shutdown.clone()),
            ));
        }
        handles.push(tokio::spawn(self.clone().sweep_loop(shutdown.clone())));

        let mut shutdown = shutdown;
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        info!("Draining worker pool");
        let drain = async {
            for handle in &mut handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout, drain)
            .await
            .is_err()
        {
            warn!("Drain timeout exceeded, aborting in-flight encodes");
            self.signal_cancel_all();
            for handle in &mut handles {
                let _ = handle.await;
            }
        }
        info!("Worker pool stopped");
    }

    async fn worker_loop(self: Arc<Self>, class: QueueClass, mut shutdown: watch::Receiver<bool>) {
        let worker = WorkerId::new();
        let mut failures = FailureTracker::new(3);
        debug!(worker_id = %worker, class = class.as_str(), "Worker loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let claimed = tokio::select! {
                _ = shutdown.changed() => break,
                claimed = self.scheduler.claim(class, &worker) => claimed,
            };
            match claimed {
                Ok((task, _lease)) => {
                    failures.record_success();
                    self.process(task, &worker).await;
                }
                Err(e) => {
                    if failures.record_failure() {
                        error!(worker_id = %worker, error = %e, "Claim failed");
                    }
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
        debug!(worker_id = %worker, class = class.as_str(), "Worker loop stopped");
    }

    async fn sweep_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            match self.scheduler.sweep_expired(Utc::now()) {
                Ok(expired) => {
                    for task in expired.iter().filter(|t| t.status.is_terminal()) {
                        if let Err(e) = self.assembler.maybe_finalize(&task.media_id).await {
                            warn!(media_id = %task.media_id, error = %e, "Finalize after sweep failed");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Lease sweep failed"),
            }
        }
    }

    /// Execute one claimed task end to end and report the outcome.
    async fn process(&self, task: EncodeTask, worker: &WorkerId) {
        let logger = TaskLogger::new(&task.id, "encode");
        logger.log_start(&format!(
            "attempt {}/{} for {} profile {}",
            task.attempts, task.max_attempts, task.media_id, task.profile
        ));

        let cancel_rx = self.register_cancel(&task.id);
        let heartbeat = self.spawn_heartbeat(&task.id, worker);

        let outcome = if task.profile == PREVIEW_PROFILE {
            self.run_preview(&task, cancel_rx).await
        } else {
            self.run_encode(&task, cancel_rx).await
        };

        heartbeat.abort();
        self.deregister_cancel(&task.id);

        match outcome {
            Ok(output_path) => {
                match self.scheduler.complete(&task.id, worker, &output_path) {
                    Ok(_) => logger.log_completion(&format!("output at {output_path}")),
                    // Cancelled while the engine was finishing
                    Err(QueueError::NotRunning(_)) => {
                        self.discard_partial(&output_path).await;
                        return;
                    }
                    Err(e) => {
                        error!(task_id = %task.id, error = %e, "Failed to record completion");
                        return;
                    }
                }
                self.finalize(&task).await;
            }
            Err(e) => self.handle_failure(&task, worker, &logger, e).await,
        }
    }

    async fn run_encode(
        &self,
        task: &EncodeTask,
        cancel_rx: watch::Receiver<bool>,
    ) -> WorkerResult<String> {
        let request = self.build_request(task)?;
        let scheduler = self.scheduler.clone();
        let task_id = task.id.clone();
        let progress = move |pct: u8| {
            if let Err(e) = scheduler.report_progress(&task_id, pct) {
                debug!(task_id = %task_id, error = %e, "Progress report dropped");
            }
        };

        // Remote capacity is additive: long-queue work is offloaded when an
        // agent has free slots, and any capacity miss falls back to the
        // local engine.
        if task.class == QueueClass::Long {
            if let Some(remote) = &self.remote {
                if remote.has_capacity(&request).await {
                    match remote.encode(&request, &progress, cancel_rx.clone()).await {
                        Err(WorkerError::Remote(vodmill_remote::RemoteError::NoCapacity)) => {
                            debug!(task_id = %task.id, "Remote capacity lost, encoding locally");
                        }
                        other => return other,
                    }
                }
            }
        }

        self.local.encode(&request, &progress, cancel_rx).await
    }

    /// Regenerate the sprite sheet and poster from the best existing
    /// variant of an already-assembled set.
    async fn run_preview(
        &self,
        task: &EncodeTask,
        cancel_rx: watch::Receiver<bool>,
    ) -> WorkerResult<String> {
        let tracker = self.scheduler.tracker();
        let set = tracker.load_set(&task.media_id)?;
        let artifacts = set.artifacts.as_ref().ok_or_else(|| {
            WorkerError::task_failed(format!("set {} has no assembled variants", task.media_id))
        })?;
        let best = artifacts
            .variants
            .iter()
            .max_by_key(|v| (v.height, v.bandwidth))
            .ok_or_else(|| WorkerError::task_failed("no variant to sample preview frames from"))?;

        let layout = self.assembler.layout();
        let sprite_path = layout.sprite_path(&task.media_id);
        generate_sprite(
            &best.path,
            set.source.duration,
            &sprite_path,
            layout.sprite_index_path(&task.media_id),
            Some(cancel_rx.clone()),
        )
        .await?;
        generate_poster(
            &best.path,
            set.source.duration,
            layout.poster_path(&task.media_id),
            Some(cancel_rx),
        )
        .await?;

        Ok(sprite_path.to_string_lossy().to_string())
    }

    fn build_request(&self, task: &EncodeTask) -> WorkerResult<EncodeRequest> {
        let set = self.scheduler.tracker().load_set(&task.media_id)?;
        let profile = self
            .catalog
            .get(&task.profile)
            .ok_or_else(|| WorkerError::task_failed(format!("unknown profile {}", task.profile)))?
            .clone();

        let layout = self.assembler.layout();
        let (chunk, output_path) = match task.chunk_index {
            Some(index) => {
                let spec = set
                    .chunk_plan
                    .as_ref()
                    .and_then(|plan| plan.chunks.iter().find(|c| c.index == index))
                    .cloned()
                    .ok_or_else(|| {
                        WorkerError::task_failed(format!(
                            "chunk {} missing from plan for {}",
                            index, task.media_id
                        ))
                    })?;
                let path = layout.chunk_path(&task.media_id, &profile, index);
                (Some(spec), path)
            }
            None => (None, layout.variant_path(&task.media_id, &profile)),
        };

        Ok(EncodeRequest {
            task_id: task.id.clone(),
            source_location: set.source_location,
            output_path,
            profile,
            source: set.source,
            chunk,
        })
    }

    async fn handle_failure(
        &self,
        task: &EncodeTask,
        worker: &WorkerId,
        logger: &TaskLogger,
        error: WorkerError,
    ) {
        let kind = error.failure_kind();
        if kind == vodmill_models::FailureKind::Cancelled {
            logger.log_warning("encode cancelled, discarding partial output");
            return;
        }

        let task_error = error.to_task_error();
        logger.log_error(&format!("{task_error}"));

        // Attempts were consumed at claim time, so the backoff for this
        // attempt is computed from the count already on the task.
        let retry_after = kind
            .is_retryable()
            .then(|| self.retry.retry_at(task.attempts));

        let updated = match self
            .scheduler
            .fail(&task.id, worker, task_error.clone(), retry_after)
        {
            Ok(updated) => updated,
            // Cancelled out from under us while the engine was failing
            Err(QueueError::NotRunning(_)) => return,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Failed to record failure");
                return;
            }
        };

        if kind.fails_set() {
            self.fail_set(task, task_error).await;
            return;
        }

        if updated.status.is_terminal() {
            self.finalize(task).await;
        }
    }

    /// Input and assembly failures sink the whole set: cancel the sibling
    /// tasks, record the failure and emit the terminal event.
    async fn fail_set(&self, task: &EncodeTask, error: TaskError) {
        match self.scheduler.cancel_media(&task.media_id) {
            Ok(in_flight) => self.signal_cancel(&in_flight),
            Err(e) => warn!(media_id = %task.media_id, error = %e, "Sibling cancellation failed"),
        }

        let tracker = self.scheduler.tracker();
        let result = tracker
            .load_set(&task.media_id)
            .map(|set| set.fail(error))
            .and_then(|failed: MediaEncodingSet| {
                tracker.save_set(&failed)?;
                tracker.notify_if_terminal(&task.media_id)?;
                Ok(())
            });
        if let Err(e) = result {
            error!(media_id = %task.media_id, error = %e, "Failed to record set failure");
        }
    }

    async fn finalize(&self, task: &EncodeTask) {
        if task.profile == PREVIEW_PROFILE {
            return;
        }
        if let Err(e) = self.assembler.maybe_finalize(&task.media_id).await {
            error!(media_id = %task.media_id, error = %e, "Assembly failed");
        }
    }

    fn spawn_heartbeat(&self, task_id: &TaskId, worker: &WorkerId) -> JoinHandle<()> {
        let scheduler = self.scheduler.clone();
        let task_id = task_id.clone();
        let worker = worker.clone();
        let interval = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match scheduler.renew(&task_id, &worker) {
                    Ok(expires) => {
                        debug!(task_id = %task_id, expires_at = %expires, "Lease renewed")
                    }
                    // Task finished or was taken over; stop renewing
                    Err(_) => break,
                }
            }
        })
    }

    async fn discard_partial(&self, output_path: &str) {
        if let Err(e) = tokio::fs::remove_file(output_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = output_path, error = %e, "Failed to discard partial output");
            }
        }
    }
}
