//! Chunk reassembly via the concat demuxer.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use vodmill_models::ChunkPlan;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_duration;

/// Tolerance when comparing reassembled duration against the plan.
/// Container timestamp rounding makes exact equality unattainable.
const DURATION_EPSILON_SECS: f64 = 1.0;

/// Concatenate per-chunk outputs, in chunk order, into one continuous file.
///
/// `chunk_outputs` must already be sorted by chunk index; the caller owns
/// that ordering because it also owns the chunk-to-output mapping. The
/// reassembled duration is verified against the plan so a silently dropped
/// chunk cannot reach the manifest.
pub async fn concat_chunks(
    chunk_outputs: &[PathBuf],
    plan: &ChunkPlan,
    output: impl AsRef<Path>,
) -> MediaResult<()> {
    let output = output.as_ref();

    if chunk_outputs.len() != plan.chunks.len() {
        return Err(MediaError::assembly(format!(
            "plan has {} chunks but {} outputs were provided",
            plan.chunks.len(),
            chunk_outputs.len()
        )));
    }

    for path in chunk_outputs {
        if !path.exists() {
            return Err(MediaError::assembly(format!(
                "chunk output missing: {}",
                path.display()
            )));
        }
    }

    let list_path = output.with_extension("concat.txt");
    let mut list = String::new();
    for path in chunk_outputs {
        // The concat demuxer treats single quotes as delimiters
        let escaped = path.to_string_lossy().replace('\'', "'\\''");
        list.push_str(&format!("file '{}'\n", escaped));
    }
    fs::write(&list_path, &list).await?;

    let cmd = FfmpegCommand::new(&list_path, output)
        .input_arg("-f")
        .input_arg("concat")
        .input_arg("-safe")
        .input_arg("0")
        .output_arg("-c")
        .output_arg("copy");

    let result = FfmpegRunner::new().run(&cmd).await;
    let _ = fs::remove_file(&list_path).await;
    result?;

    let actual = probe_duration(output).await?;
    let expected = plan.total_duration();
    if (actual - expected).abs() > DURATION_EPSILON_SECS {
        let _ = fs::remove_file(output).await;
        return Err(MediaError::assembly(format!(
            "reassembled duration {actual:.2}s does not match planned {expected:.2}s"
        )));
    }

    debug!(
        output = %output.display(),
        chunks = chunk_outputs.len(),
        duration = actual,
        "Chunks reassembled"
    );
    Ok(())
}
