//! Ingest entry point: probe, select profiles, plan chunks, enqueue.

use std::sync::Arc;

use tracing::{info, warn};

use vodmill_media::probe_source;
use vodmill_models::{
    ChunkPolicy, EncodeTask, MediaEncodingSet, MediaId, PriorityTier, ProfileCatalog, QueueClass,
    SourceInfo, TaskError, plan_chunks, select_profiles,
};
use vodmill_queue::JobScheduler;

use crate::error::WorkerResult;

/// Reserved profile name for short-queue preview refresh tasks. Never part
/// of the catalog; the executor routes it to sprite/poster regeneration
/// instead of the encoding engine.
pub const PREVIEW_PROFILE: &str = "_preview";

/// Summary of a submission: the persisted set plus how many tasks were
/// actually enqueued (duplicates excluded).
#[derive(Debug, serde::Serialize)]
pub struct SubmitReceipt {
    pub media_id: MediaId,
    pub profiles: Vec<String>,
    pub chunk_count: Option<u32>,
    pub enqueued: usize,
}

/// Front door of the pipeline. `submit` returns as soon as the set is
/// persisted and its tasks are enqueued; all further status flows through
/// the state tracker.
pub struct Orchestrator {
    scheduler: Arc<JobScheduler>,
    catalog: ProfileCatalog,
    chunk_policy: ChunkPolicy,
}

impl Orchestrator {
    pub fn new(
        scheduler: Arc<JobScheduler>,
        catalog: ProfileCatalog,
        chunk_policy: ChunkPolicy,
    ) -> Self {
        Self {
            scheduler,
            catalog,
            chunk_policy,
        }
    }

    pub fn catalog(&self) -> &ProfileCatalog {
        &self.catalog
    }

    /// Submit one media item for encoding. `probed` short-circuits the
    /// ffprobe pass when the caller already has source metadata.
    ///
    /// A probe failure fails the whole set immediately with zero tasks
    /// enqueued.
    pub async fn submit(
        &self,
        media_id: MediaId,
        source_location: impl Into<String>,
        probed: Option<SourceInfo>,
        tier: PriorityTier,
    ) -> WorkerResult<SubmitReceipt> {
        let source_location = source_location.into();
        let tracker = self.scheduler.tracker();

        let source = match probed {
            Some(source) => source,
            None => match probe_source(&source_location).await {
                Ok(source) => source,
                Err(e) => {
                    warn!(media_id = %media_id, error = %e, "Source probe failed");
                    let set = MediaEncodingSet::new(
                        media_id.clone(),
                        source_location,
                        SourceInfo::default(),
                        Vec::new(),
                        None,
                    )
                    .fail(TaskError::input(e.to_string()));
                    tracker.save_set(&set)?;
                    tracker.notify_if_terminal(&media_id)?;
                    return Ok(SubmitReceipt {
                        media_id,
                        profiles: Vec::new(),
                        chunk_count: None,
                        enqueued: 0,
                    });
                }
            },
        };

        let profiles = select_profiles(&self.catalog, &source);
        let chunk_plan = plan_chunks(&media_id, &source, &self.chunk_policy);
        let chunk_count = chunk_plan.as_ref().map(|p| p.chunk_count());

        let profile_names: Vec<String> = profiles.iter().map(|p| p.name.clone()).collect();
        let set = MediaEncodingSet::new(
            media_id.clone(),
            source_location,
            source,
            profile_names.clone(),
            chunk_plan.clone(),
        );
        tracker.save_set(&set)?;

        let mut enqueued = 0usize;
        for profile in &profiles {
            let chunk_indexes: Vec<Option<u32>> = match &chunk_plan {
                Some(plan) => plan.chunks.iter().map(|c| Some(c.index)).collect(),
                None => vec![None],
            };
            for chunk_index in chunk_indexes {
                let task = EncodeTask::new(
                    media_id.clone(),
                    profile.name.clone(),
                    chunk_index,
                    QueueClass::Long,
                    tier,
                    profile.required,
                );
                if self.scheduler.enqueue(task)?.is_enqueued() {
                    enqueued += 1;
                }
            }
        }

        info!(
            media_id = %media_id,
            profiles = profile_names.len(),
            chunks = chunk_count.unwrap_or(0),
            enqueued,
            "Media submitted"
        );
        Ok(SubmitReceipt {
            media_id,
            profiles: profile_names,
            chunk_count,
            enqueued,
        })
    }

    /// Regenerate the sprite sheet and poster for an already-encoded set.
    /// Near-instant, so it rides the short queue at interactive priority
    /// and never waits behind transcodes.
    pub fn refresh_preview(&self, media_id: &MediaId) -> WorkerResult<bool> {
        // Task rows are keyed by set, so the set must exist first
        self.scheduler.tracker().load_set(media_id)?;
        let task = EncodeTask::new(
            media_id.clone(),
            PREVIEW_PROFILE,
            None,
            QueueClass::Short,
            PriorityTier::Interactive,
            false,
        );
        Ok(self.scheduler.enqueue(task)?.is_enqueued())
    }

    /// Cancel a set: mark it cancelled, drop its pending tasks and return
    /// the ids of in-flight tasks so the executor can signal their engines.
    pub fn cancel(&self, media_id: &MediaId) -> WorkerResult<Vec<vodmill_models::TaskId>> {
        let in_flight = self.scheduler.cancel_media(media_id)?;

        let tracker = self.scheduler.tracker();
        let set = tracker.load_set(media_id)?.cancel();
        tracker.save_set(&set)?;
        tracker.notify_if_terminal(media_id)?;

        info!(media_id = %media_id, in_flight = in_flight.len(), "Media cancelled");
        Ok(in_flight)
    }

    /// Drop a finished set and its task history from the store. Refuses
    /// while any of its work is still live, so task rows only disappear
    /// after the set reaches a terminal state.
    pub fn archive(&self, media_id: &MediaId) -> WorkerResult<bool> {
        let tracker = self.scheduler.tracker();
        let set = tracker.load_set(media_id)?;
        let tasks = tracker.load_tasks(media_id)?;
        if !set.derive_status(&tasks).is_terminal() {
            return Ok(false);
        }
        tracker.archive_set(media_id)?;
        info!(media_id = %media_id, "Media archived");
        Ok(true)
    }
}
