//! Poster frame extraction.

use std::path::Path;

use tokio::sync::watch;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Poster scale width; height follows the aspect ratio.
const POSTER_SCALE_WIDTH: u32 = 1280;

/// Fraction of the duration at which the poster frame is taken. Early
/// enough to load fast, late enough to skip fade-in black frames.
const POSTER_POSITION: f64 = 0.1;

/// Extract a single poster frame from a variant.
pub async fn generate_poster(
    video_path: impl AsRef<Path>,
    duration_secs: f64,
    output_path: impl AsRef<Path>,
    cancel: Option<watch::Receiver<bool>>,
) -> MediaResult<()> {
    let seek = poster_timestamp(duration_secs);
    let filter = format!("scale={}:-2", POSTER_SCALE_WIDTH);

    let cmd = FfmpegCommand::new(video_path.as_ref(), output_path.as_ref())
        .seek(seek)
        .single_frame()
        .video_filter(filter)
        .no_audio();

    let runner = match cancel {
        Some(rx) => FfmpegRunner::new().with_cancel(rx),
        None => FfmpegRunner::new(),
    };
    runner.run(&cmd).await
}

fn poster_timestamp(duration_secs: f64) -> f64 {
    if duration_secs <= 0.0 {
        return 0.0;
    }
    duration_secs * POSTER_POSITION
}
