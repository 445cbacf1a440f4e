//! FFmpeg progress reports.

use serde::{Deserialize, Serialize};

/// Progress information parsed from ffmpeg's `-progress` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineProgress {
    /// Current frame number
    pub frame: u64,
    /// Current encoding FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed relative to realtime (1.5 = 1.5x)
    pub speed: f64,
    /// Whether the encode has finished
    pub is_complete: bool,
}

impl EngineProgress {
    /// Progress percentage given the total duration being encoded.
    pub fn percentage(&self, total_duration_secs: f64) -> f64 {
        if total_duration_secs <= 0.0 {
            return 0.0;
        }
        let total_ms = total_duration_secs * 1000.0;
        ((self.out_time_ms as f64 / total_ms) * 100.0).min(100.0)
    }

    /// Estimated seconds remaining, when the speed is known.
    pub fn eta_seconds(&self, total_duration_secs: f64) -> Option<f64> {
        if self.speed <= 0.0 || self.out_time_ms <= 0 {
            return None;
        }
        let remaining_ms = total_duration_secs * 1000.0 - self.out_time_ms as f64;
        if remaining_ms <= 0.0 {
            return Some(0.0);
        }
        Some((remaining_ms / 1000.0) / self.speed)
    }
}
