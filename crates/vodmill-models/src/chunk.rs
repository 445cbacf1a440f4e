//! Chunk planning for parallel encodes.

use serde::{Deserialize, Serialize};

use crate::ids::MediaId;
use crate::source::SourceInfo;

/// Thresholds and sizing knobs for the chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPolicy {
    /// Split only when the source runs longer than this many seconds
    pub min_duration_secs: f64,
    /// ...or is larger than this many bytes
    pub min_size_bytes: u64,
    /// Target chunk length in seconds before keyframe snapping
    pub target_chunk_secs: f64,
    /// Assumed keyframe interval when the prober could not determine one
    pub default_keyframe_interval: f64,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            min_duration_secs: 300.0,
            min_size_bytes: 1024 * 1024 * 1024,
            target_chunk_secs: 60.0,
            default_keyframe_interval: 2.0,
        }
    }
}

/// One contiguous, independently decodable time range of the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSpec {
    /// Position in the plan, 0-based
    pub index: u32,
    /// Start offset in seconds
    pub start_secs: f64,
    /// Chunk duration in seconds
    pub duration_secs: f64,
}

impl ChunkSpec {
    pub fn end_secs(&self) -> f64 {
        self.start_secs + self.duration_secs
    }
}

/// The ordered list of time ranges for a chunked encode.
///
/// Exists only for the lifetime of the encode; the assembler consumes it in
/// chunk order and it is discarded afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub media_id: MediaId,
    /// Keyframe interval the boundaries were snapped to
    pub keyframe_interval: f64,
    pub chunks: Vec<ChunkSpec>,
}

impl ChunkPlan {
    pub fn chunk_count(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// Total planned duration. Must equal the source duration; the
    /// assembler verifies reassembled output against this.
    pub fn total_duration(&self) -> f64 {
        self.chunks.iter().map(|c| c.duration_secs).sum()
    }

    /// Chunk ranges are contiguous and non-overlapping by construction;
    /// this re-checks the invariant for plans read back from storage.
    pub fn is_contiguous(&self, epsilon: f64) -> bool {
        self.chunks.windows(2).all(|pair| {
            (pair[0].end_secs() - pair[1].start_secs).abs() <= epsilon
        })
    }
}

/// Decide whether a source should be split and produce its plan.
///
/// Returns `None` when the source is below both thresholds and should be
/// encoded as a single task per profile. Boundaries are snapped to whole
/// keyframe intervals so every chunk is independently decodable; a trailing
/// remainder shorter than half a chunk is absorbed by the final chunk.
pub fn plan_chunks(
    media_id: &MediaId,
    source: &SourceInfo,
    policy: &ChunkPolicy,
) -> Option<ChunkPlan> {
    if source.duration <= policy.min_duration_secs && source.size <= policy.min_size_bytes {
        return None;
    }

    let keyframe_interval = source
        .keyframe_interval
        .filter(|kf| *kf > 0.0)
        .unwrap_or(policy.default_keyframe_interval);

    // Snap the target chunk length down to a whole number of keyframe
    // intervals, but never below one interval.
    let intervals_per_chunk = (policy.target_chunk_secs / keyframe_interval).floor().max(1.0);
    let chunk_len = intervals_per_chunk * keyframe_interval;

    let mut chunks = Vec::new();
    let mut start = 0.0_f64;
    let mut index = 0u32;

    while start < source.duration {
        let remaining = source.duration - start;
        let duration = if remaining < chunk_len * 1.5 {
            // Final chunk absorbs a short remainder instead of emitting a
            // sliver that costs more in fixed overhead than it parallelizes.
            remaining
        } else {
            chunk_len
        };

        chunks.push(ChunkSpec {
            index,
            start_secs: start,
            duration_secs: duration,
        });
        start += duration;
        index += 1;
    }

    Some(ChunkPlan {
        media_id: media_id.clone(),
        keyframe_interval,
        chunks,
    })
}
