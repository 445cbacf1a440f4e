//! Probed source metadata.

use serde::{Deserialize, Serialize};

/// Metadata probed from an uploaded source file.
///
/// Produced by the ingest trigger (or by `vodmill-media`'s ffprobe wrapper)
/// and consumed by profile selection and chunk planning.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Duration in seconds
    pub duration: f64,
    /// Whether the source carries an audio stream
    pub has_audio: bool,
    /// Source video codec name (as reported by the prober)
    pub codec: String,
    /// File size in bytes
    pub size: u64,
    /// Frame rate (fps)
    pub fps: f64,
    /// Keyframe interval in seconds, when the prober could determine it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyframe_interval: Option<f64>,
}

impl SourceInfo {
    /// The smaller of width/height, used for ladder comparisons so
    /// portrait sources are not treated as taller than they are wide.
    pub fn vertical_resolution(&self) -> u32 {
        self.width.min(self.height)
    }

    /// Aspect ratio (width / height). Falls back to 16:9 for degenerate
    /// dimensions so downstream math stays finite.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 16.0 / 9.0;
        }
        f64::from(self.width) / f64::from(self.height)
    }
}
