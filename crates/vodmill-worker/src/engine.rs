//! The execution backend seam: local ffmpeg and remote agents behind one
//! trait, so the worker loop does not care where an encode runs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use vodmill_media::{validate_output, FfmpegCommand, FfmpegRunner};
use vodmill_models::{ChunkSpec, EncodeProfile, SourceInfo, TaskId};
use vodmill_remote::{RemoteEncodeRequest, RemoteError, RemoteGateway};

use crate::error::{WorkerError, WorkerResult};

/// Everything an engine needs to produce one variant (or one chunk of one).
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub task_id: TaskId,
    /// Local path (or fetchable URL, for remote engines) of the source
    pub source_location: String,
    /// Where the encoded output must land
    pub output_path: PathBuf,
    pub profile: EncodeProfile,
    pub source: SourceInfo,
    /// Time range for chunked encodes; `None` encodes the whole source
    pub chunk: Option<ChunkSpec>,
}

impl EncodeRequest {
    /// Duration of the range being encoded, for progress math.
    pub fn encode_duration(&self) -> f64 {
        self.chunk
            .as_ref()
            .map(|c| c.duration_secs)
            .unwrap_or(self.source.duration)
    }
}

/// Progress sink passed into engines. Values are 0-100.
pub type ProgressSink<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// An execution backend that can produce one encoded output.
///
/// Implementations return the location of the validated output.
#[async_trait]
pub trait EncodingEngine: Send + Sync {
    async fn encode(
        &self,
        request: &EncodeRequest,
        progress: ProgressSink<'_>,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<String>;
}

/// Local ffmpeg subprocess backend.
pub struct FfmpegEngine {
    /// Hard wall-clock limit per invocation
    timeout: Duration,
}

impl FfmpegEngine {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn build_command(&self, request: &EncodeRequest) -> FfmpegCommand {
        let profile = &request.profile;
        let (width, height) = profile.output_dimensions(&request.source);

        let mut cmd = FfmpegCommand::new(&request.source_location, &request.output_path);

        if let Some(chunk) = &request.chunk {
            cmd = cmd.seek(chunk.start_secs).duration(chunk.duration_secs);
        }

        cmd = cmd
            .video_filter(format!("scale={width}:{height}"))
            .video_codec(profile.codec.encoder())
            .video_bitrate(profile.video_bitrate_kbps)
            .max_bitrate(profile.max_bitrate_kbps)
            .preset("medium");

        // Pin GOP length so chunk boundaries stay independently decodable
        let kf_secs = request.source.keyframe_interval.unwrap_or(2.0);
        let gop_frames = (kf_secs * request.source.fps).round().max(1.0) as u32;
        cmd = cmd.keyframe_interval(gop_frames);

        if request.source.has_audio {
            cmd = cmd
                .audio_codec("aac")
                .audio_bitrate(profile.audio_bitrate_kbps);
        } else {
            cmd = cmd.no_audio();
        }

        if profile.container == vodmill_models::Container::Mp4 {
            cmd = cmd.output_arg("-movflags").output_arg("+faststart");
        }

        cmd
    }
}

#[async_trait]
impl EncodingEngine for FfmpegEngine {
    async fn encode(
        &self,
        request: &EncodeRequest,
        progress: ProgressSink<'_>,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<String> {
        if let Some(parent) = request.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let cmd = self.build_command(request);
        debug!(task_id = %request.task_id, output = %request.output_path.display(), "Starting local encode");

        // The runner wants a 'static callback; bridge through a channel
        // back to the borrowed sink.
        let total = request.encode_duration();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<u8>();
        let forward = async {
            while let Some(pct) = rx.recv().await {
                progress(pct);
            }
        };

        let runner = FfmpegRunner::new()
            .with_timeout(self.timeout.as_secs())
            .with_cancel(cancel);
        let run = runner.run_with_progress(&cmd, move |p| {
            let pct = p.percentage(total).round() as u8;
            let _ = tx.send(pct.min(100));
        });

        let (run_result, ()) = tokio::join!(run, forward);
        run_result?;

        validate_output(&request.output_path, request.profile.container).await?;

        Ok(request.output_path.to_string_lossy().to_string())
    }
}

/// Remote agent backend. Dispatch failures for lack of capacity are
/// surfaced as `NoCapacity` so the caller can fall back to local.
pub struct RemoteEngine {
    gateway: Arc<RemoteGateway>,
}

impl RemoteEngine {
    pub fn new(gateway: Arc<RemoteGateway>) -> Self {
        Self { gateway }
    }

    /// Whether any agent could take this request right now.
    pub async fn has_capacity(&self, request: &EncodeRequest) -> bool {
        self.gateway.has_capacity(request.profile.codec).await
    }
}

#[async_trait]
impl EncodingEngine for RemoteEngine {
    async fn encode(
        &self,
        request: &EncodeRequest,
        progress: ProgressSink<'_>,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<String> {
        let remote_request = RemoteEncodeRequest {
            task_id: request.task_id.clone(),
            source_url: request.source_location.clone(),
            profile: request.profile.clone(),
            chunk: request.chunk.clone(),
        };

        let outcome = self
            .gateway
            .execute(remote_request, |pct| progress(pct), cancel)
            .await
            .map_err(|e| match e {
                RemoteError::Cancelled => WorkerError::Media(vodmill_media::MediaError::Cancelled),
                other => WorkerError::Remote(other),
            })?;

        Ok(outcome.output_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vodmill_models::ProfileCatalog;

    fn request(chunk: Option<ChunkSpec>) -> EncodeRequest {
        EncodeRequest {
            task_id: TaskId::from_string("t1"),
            source_location: "/srv/media/m1.mp4".to_string(),
            output_path: PathBuf::from("/tmp/out/720p.mp4"),
            profile: ProfileCatalog::standard().get("720p").unwrap().clone(),
            source: SourceInfo {
                width: 1920,
                height: 1080,
                duration: 600.0,
                has_audio: true,
                codec: "h264".to_string(),
                size: 0,
                fps: 30.0,
                keyframe_interval: Some(2.0),
            },
            chunk,
        }
    }

    #[test]
    fn test_command_carries_profile_parameters() {
        let engine = FfmpegEngine::new(Duration::from_secs(3600));
        let args = engine.build_command(&request(None)).build_args();

        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"2800k".to_string()));
        assert!(args.contains(&"scale=1280:720".to_string()));
        assert!(args.contains(&"aac".to_string()));
        // 2s GOP at 30fps
        assert!(args.contains(&"60".to_string()));
        assert!(args.contains(&"+faststart".to_string()));
    }

    #[test]
    fn test_chunk_range_becomes_seek_and_duration() {
        let engine = FfmpegEngine::new(Duration::from_secs(3600));
        let chunk = ChunkSpec {
            index: 2,
            start_secs: 120.0,
            duration_secs: 60.0,
        };
        let args = engine.build_command(&request(Some(chunk))).build_args();

        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "120.000");
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "60.000");
    }

    #[test]
    fn test_silent_source_drops_audio() {
        let engine = FfmpegEngine::new(Duration::from_secs(3600));
        let mut req = request(None);
        req.source.has_audio = false;
        let args = engine.build_command(&req).build_args();

        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"aac".to_string()));
    }

    #[test]
    fn test_encode_duration_uses_chunk_range() {
        let chunk = ChunkSpec {
            index: 0,
            start_secs: 0.0,
            duration_secs: 60.0,
        };
        assert_eq!(request(Some(chunk)).encode_duration(), 60.0);
        assert_eq!(request(None).encode_duration(), 600.0);
    }
}
