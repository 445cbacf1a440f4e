//! ffprobe wrapper producing `SourceInfo`.

use std::path::Path;
use std::process::Stdio;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use vodmill_models::SourceInfo;

use crate::error::{MediaError, MediaResult};

/// ffprobe JSON output.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FramesOutput {
    #[serde(default)]
    frames: Vec<FrameEntry>,
}

#[derive(Debug, Deserialize)]
struct FrameEntry {
    pts_time: Option<String>,
    pkt_pts_time: Option<String>,
}

/// Probe a source file for the metadata the orchestrator needs.
///
/// An unreadable or streamless file is an `InvalidSource` error; callers
/// map it to an input failure that kills the whole encoding set.
pub async fn probe_source(path: impl AsRef<Path>) -> MediaResult<SourceInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: "ffprobe exited with non-zero status".to_string(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::InvalidSource("no video stream found".to_string()))?;

    let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

    let duration = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);
    if duration <= 0.0 {
        return Err(MediaError::InvalidSource(
            "source reports zero duration".to_string(),
        ));
    }

    let size = probe
        .format
        .size
        .as_ref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let fps = video_stream
        .avg_frame_rate
        .as_ref()
        .or(video_stream.r_frame_rate.as_ref())
        .and_then(|r| parse_frame_rate(r))
        .unwrap_or(30.0);

    let keyframe_interval = probe_keyframe_interval(path).await;

    let info = SourceInfo {
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        duration,
        has_audio,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        size,
        fps,
        keyframe_interval,
    };
    debug!(
        width = info.width,
        height = info.height,
        duration = info.duration,
        codec = %info.codec,
        "Probed source"
    );
    Ok(info)
}

/// Estimate the keyframe spacing by reading keyframe timestamps from the
/// first minute of the stream. Returns `None` when fewer than two
/// keyframes are visible; chunk planning then falls back to its default.
async fn probe_keyframe_interval(path: &Path) -> Option<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-select_streams",
            "v:0",
            "-skip_frame",
            "nokey",
            "-show_frames",
            "-show_entries",
            "frame=pts_time",
            "-read_intervals",
            "%+60",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let frames: FramesOutput = serde_json::from_slice(&output.stdout).ok()?;
    let timestamps: Vec<f64> = frames
        .frames
        .iter()
        .filter_map(|f| {
            f.pts_time
                .as_deref()
                .or(f.pkt_pts_time.as_deref())
                .and_then(|t| t.parse::<f64>().ok())
        })
        .collect();

    median_gap(&timestamps)
}

/// Median spacing between consecutive timestamps.
fn median_gap(timestamps: &[f64]) -> Option<f64> {
    if timestamps.len() < 2 {
        return None;
    }
    let mut gaps: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
    gaps.retain(|g| *g > 0.0);
    if gaps.is_empty() {
        return None;
    }
    gaps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(gaps[gaps.len() / 2])
}

/// Duration of a file in seconds.
pub async fn probe_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    let info = probe_source(path).await?;
    Ok(info.duration)
}

/// Parse a frame rate string ("30/1", "30000/1001" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
    }
    s.parse().ok()
}
