//! Output assembly: chunk reassembly, master manifest, sprite, poster.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use vodmill_media::{concat_chunks, generate_poster, generate_sprite, MasterManifest, VariantStream};
use vodmill_models::{
    EncodeProfile, EncodeTask, MediaEncodingSet, MediaId, ProfileCatalog, SetArtifacts, SetStatus,
    TaskError, TaskStatus, VariantRef,
};
use vodmill_state::StateTracker;

use crate::error::{WorkerError, WorkerResult};

/// Filesystem layout for one media item's outputs.
///
/// Every path is namespaced by media id (and chunk paths by profile and
/// index) so concurrent tasks of the same item never collide.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn media_dir(&self, media_id: &MediaId) -> PathBuf {
        self.root.join(media_id.as_str())
    }

    pub fn variant_path(&self, media_id: &MediaId, profile: &EncodeProfile) -> PathBuf {
        self.media_dir(media_id)
            .join(format!("{}.{}", profile.name, profile.container.extension()))
    }

    pub fn chunk_path(
        &self,
        media_id: &MediaId,
        profile: &EncodeProfile,
        chunk_index: u32,
    ) -> PathBuf {
        self.media_dir(media_id).join("chunks").join(format!(
            "{}.c{:04}.{}",
            profile.name,
            chunk_index,
            profile.container.extension()
        ))
    }

    pub fn manifest_path(&self, media_id: &MediaId) -> PathBuf {
        self.media_dir(media_id).join("master.m3u8")
    }

    pub fn sprite_path(&self, media_id: &MediaId) -> PathBuf {
        self.media_dir(media_id).join("sprite.jpg")
    }

    pub fn sprite_index_path(&self, media_id: &MediaId) -> PathBuf {
        self.media_dir(media_id).join("sprite.json")
    }

    pub fn poster_path(&self, media_id: &MediaId) -> PathBuf {
        self.media_dir(media_id).join("poster.jpg")
    }
}

/// Drives final assembly once a set's tasks have all reached a terminal
/// state: reassemble chunks per profile, write the master manifest over
/// the successful variants, sample the sprite sheet and poster, then
/// record artifacts and emit the terminal event.
pub struct Assembler {
    tracker: Arc<StateTracker>,
    catalog: ProfileCatalog,
    layout: OutputLayout,
}

impl Assembler {
    pub fn new(tracker: Arc<StateTracker>, catalog: ProfileCatalog, layout: OutputLayout) -> Self {
        Self {
            tracker,
            catalog,
            layout,
        }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Called after every task reaches a terminal state. Assembles when
    /// the set is complete, otherwise does nothing. Returns the terminal
    /// status when one was reached.
    pub async fn maybe_finalize(&self, media_id: &MediaId) -> WorkerResult<Option<SetStatus>> {
        let set = self.tracker.load_set(media_id)?;
        let tasks = self.tracker.load_tasks(media_id)?;
        let status = set.derive_status(&tasks);

        match status {
            SetStatus::Fail | SetStatus::Cancelled => {
                // Terminal without artifacts; just emit the event
                let notified = self.tracker.notify_if_terminal(media_id)?;
                return Ok(notified);
            }
            SetStatus::Success | SetStatus::PartialSuccess => {}
            _ => return Ok(None),
        }

        if set.artifacts.is_some() {
            // Already assembled (duplicate completion report)
            return Ok(Some(status));
        }

        match self.assemble(&set, &tasks).await {
            Ok(artifacts) => {
                let updated = set.with_artifacts(artifacts);
                self.tracker.save_set(&updated)?;
                let notified = self.tracker.notify_if_terminal(media_id)?;
                info!(media_id = %media_id, status = status.as_str(), "Set assembled");
                Ok(notified)
            }
            Err(e) => {
                warn!(media_id = %media_id, error = %e, "Assembly failed");
                // No partial manifest may survive a failed assembly
                let _ = tokio::fs::remove_file(self.layout.manifest_path(media_id)).await;
                let failed = set.fail(TaskError::assembly(e.to_string()));
                self.tracker.save_set(&failed)?;
                let notified = self.tracker.notify_if_terminal(media_id)?;
                Ok(notified)
            }
        }
    }

    async fn assemble(
        &self,
        set: &MediaEncodingSet,
        tasks: &[EncodeTask],
    ) -> WorkerResult<SetArtifacts> {
        let media_id = &set.media_id;
        let variants = self.collect_variants(set, tasks).await?;
        if variants.is_empty() {
            return Err(WorkerError::Media(vodmill_media::MediaError::assembly(
                "zero successful variants",
            )));
        }

        let mut manifest = MasterManifest::new();
        for variant in &variants {
            let profile = self.catalog.get(&variant.profile).ok_or_else(|| {
                WorkerError::task_failed(format!("unknown profile {}", variant.profile))
            })?;
            let file_name = PathBuf::from(&variant.path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| variant.path.clone());
            manifest = manifest.add_variant(VariantStream::from_profile(
                profile,
                file_name,
                variant.width,
                variant.height,
            ));
        }
        let manifest_path = self.layout.manifest_path(media_id);
        manifest.write_to(&manifest_path).await.map_err(WorkerError::Media)?;

        // Sprite and poster come from the sharpest successful variant
        let best = variants
            .iter()
            .max_by_key(|v| (v.height, v.bandwidth))
            .ok_or_else(|| {
                WorkerError::Media(vodmill_media::MediaError::assembly("no variant for sprite"))
            })?;

        let sprite_path = self.layout.sprite_path(media_id);
        let sprite_index_path = self.layout.sprite_index_path(media_id);
        generate_sprite(
            &best.path,
            set.source.duration,
            &sprite_path,
            &sprite_index_path,
            None,
        )
        .await
        .map_err(WorkerError::Media)?;

        let poster_path = self.layout.poster_path(media_id);
        generate_poster(&best.path, set.source.duration, &poster_path, None)
            .await
            .map_err(WorkerError::Media)?;

        let mut variants = variants;
        variants.sort_by_key(|v| v.bandwidth);

        Ok(SetArtifacts {
            manifest_path: manifest_path.to_string_lossy().to_string(),
            sprite_path: sprite_path.to_string_lossy().to_string(),
            sprite_index_path: sprite_index_path.to_string_lossy().to_string(),
            poster_path: poster_path.to_string_lossy().to_string(),
            variants,
        })
    }

    /// Resolve the successful variants, reassembling chunked profiles.
    async fn collect_variants(
        &self,
        set: &MediaEncodingSet,
        tasks: &[EncodeTask],
    ) -> WorkerResult<Vec<VariantRef>> {
        let mut by_profile: HashMap<&str, Vec<&EncodeTask>> = HashMap::new();
        for task in tasks {
            by_profile.entry(task.profile.as_str()).or_default().push(task);
        }

        let mut variants = Vec::new();
        for (profile_name, mut profile_tasks) in by_profile {
            if !profile_tasks.iter().all(|t| t.status == TaskStatus::Success) {
                // A failed optional profile simply drops out of the list
                continue;
            }
            let Some(profile) = self.catalog.get(profile_name) else {
                continue;
            };

            let variant_path = match &set.chunk_plan {
                Some(plan) => {
                    profile_tasks.sort_by_key(|t| t.chunk_index.unwrap_or(0));
                    let outputs: Vec<PathBuf> = profile_tasks
                        .iter()
                        .filter_map(|t| t.output_path.as_deref().map(PathBuf::from))
                        .collect();
                    if outputs.len() != plan.chunks.len() {
                        return Err(WorkerError::Media(vodmill_media::MediaError::assembly(
                            format!(
                                "profile {} has {} chunk outputs, plan expects {}",
                                profile_name,
                                outputs.len(),
                                plan.chunks.len()
                            ),
                        )));
                    }
                    let merged = self.layout.variant_path(&set.media_id, profile);
                    concat_chunks(&outputs, plan, &merged)
                        .await
                        .map_err(WorkerError::Media)?;
                    merged.to_string_lossy().to_string()
                }
                None => match profile_tasks[0].output_path.clone() {
                    Some(path) => path,
                    None => continue,
                },
            };

            let (width, height) = profile.output_dimensions(&set.source);
            variants.push(VariantRef {
                profile: profile.name.clone(),
                path: variant_path,
                bandwidth: profile.bandwidth(),
                width,
                height,
            });
        }

        variants.sort_by_key(|v| v.bandwidth);
        Ok(variants)
    }
}
