//! Preview sprite sheet and its frame index.

use std::path::Path;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::watch;
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Upper bound on sampled frames per sheet.
const MAX_TILES: u32 = 100;
/// Grid columns.
const COLUMNS: u32 = 10;
/// Tile width in pixels; height follows the aspect ratio.
const TILE_WIDTH: u32 = 160;

/// Geometry of a sprite sheet for one source duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpriteLayout {
    /// Seconds between sampled frames
    pub interval_secs: f64,
    /// Number of sampled frames
    pub tile_count: u32,
    pub columns: u32,
    pub rows: u32,
}

impl SpriteLayout {
    /// Choose a sampling interval so the sheet holds at most [`MAX_TILES`]
    /// frames, sampling no finer than once per second.
    pub fn for_duration(duration_secs: f64) -> Self {
        let duration = duration_secs.max(1.0);
        let interval = (duration / f64::from(MAX_TILES)).max(1.0);
        let tile_count = ((duration / interval).ceil() as u32).clamp(1, MAX_TILES);
        let rows = tile_count.div_ceil(COLUMNS);
        Self {
            interval_secs: interval,
            tile_count,
            columns: COLUMNS,
            rows,
        }
    }
}

/// One cell of the frame index: which tile shows which timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpriteCell {
    /// Source timestamp in seconds
    pub timestamp_secs: f64,
    pub row: u32,
    pub col: u32,
}

/// The timestamp-to-cell table written next to the sprite sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpriteIndex {
    /// Seconds between sampled frames
    pub interval_secs: f64,
    pub columns: u32,
    pub rows: u32,
    /// Tile width in pixels
    pub tile_width: u32,
    pub cells: Vec<SpriteCell>,
}

impl SpriteIndex {
    pub fn from_layout(layout: SpriteLayout) -> Self {
        let cells = (0..layout.tile_count)
            .map(|i| SpriteCell {
                timestamp_secs: f64::from(i) * layout.interval_secs,
                row: i / layout.columns,
                col: i % layout.columns,
            })
            .collect();
        Self {
            interval_secs: layout.interval_secs,
            columns: layout.columns,
            rows: layout.rows,
            tile_width: TILE_WIDTH,
            cells,
        }
    }

    /// The cell covering a given timestamp, clamped to the last cell.
    pub fn cell_for(&self, timestamp_secs: f64) -> Option<&SpriteCell> {
        if self.cells.is_empty() {
            return None;
        }
        let idx = ((timestamp_secs.max(0.0) / self.interval_secs) as usize)
            .min(self.cells.len() - 1);
        self.cells.get(idx)
    }
}

/// Generate a sprite sheet from `source` and write the frame index as JSON.
///
/// The source should be the highest-resolution successful variant so the
/// preview frames are the sharpest available.
pub async fn generate_sprite(
    source: impl AsRef<Path>,
    duration_secs: f64,
    sheet_path: impl AsRef<Path>,
    index_path: impl AsRef<Path>,
    cancel: Option<watch::Receiver<bool>>,
) -> MediaResult<SpriteIndex> {
    let source = source.as_ref();
    let sheet_path = sheet_path.as_ref();

    if duration_secs <= 0.0 {
        return Err(MediaError::assembly("cannot sample a zero-duration source"));
    }

    let layout = SpriteLayout::for_duration(duration_secs);
    let filter = format!(
        "fps=1/{:.3},scale={}:-2,tile={}x{}",
        layout.interval_secs, TILE_WIDTH, layout.columns, layout.rows
    );

    let cmd = FfmpegCommand::new(source, sheet_path)
        .video_filter(filter)
        .single_frame()
        .no_audio();
    let runner = match cancel {
        Some(rx) => FfmpegRunner::new().with_cancel(rx),
        None => FfmpegRunner::new(),
    };
    runner.run(&cmd).await?;

    let index = SpriteIndex::from_layout(layout);
    let json = serde_json::to_vec_pretty(&index)?;
    fs::write(index_path.as_ref(), json).await?;

    debug!(
        sheet = %sheet_path.display(),
        tiles = layout.tile_count,
        interval = layout.interval_secs,
        "Sprite sheet generated"
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_source_samples_every_second() {
        let layout = SpriteLayout::for_duration(45.0);
        assert!((layout.interval_secs - 1.0).abs() < 1e-9);
        assert_eq!(layout.tile_count, 45);
        assert_eq!(layout.rows, 5);
    }

    #[test]
    fn test_long_source_caps_at_max_tiles() {
        let layout = SpriteLayout::for_duration(3600.0);
        assert_eq!(layout.tile_count, MAX_TILES);
        assert!((layout.interval_secs - 36.0).abs() < 1e-9);
        assert_eq!(layout.rows, 10);
    }

    #[test]
    fn test_degenerate_duration() {
        let layout = SpriteLayout::for_duration(0.3);
        assert_eq!(layout.tile_count, 1);
        assert_eq!(layout.rows, 1);
    }

    #[test]
    fn test_index_maps_timestamp_to_cell() {
        let index = SpriteIndex::from_layout(SpriteLayout::for_duration(200.0));
        assert!((index.interval_secs - 2.0).abs() < 1e-9);

        let cell = index.cell_for(0.0).unwrap();
        assert_eq!((cell.row, cell.col), (0, 0));

        // 25s at 2s intervals is tile 12: row 1, col 2
        let cell = index.cell_for(25.0).unwrap();
        assert_eq!((cell.row, cell.col), (1, 2));

        // Past the end clamps to the last cell
        let last = index.cell_for(10_000.0).unwrap();
        assert_eq!(last, index.cells.last().unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_never_spawns_ffmpeg() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let dir = std::env::temp_dir();
        let result = generate_sprite(
            dir.join("missing.mp4"),
            60.0,
            dir.join("sheet.jpg"),
            dir.join("sheet.json"),
            Some(rx),
        )
        .await;
        assert!(matches!(result, Err(MediaError::Cancelled)));
        // No index is written for a cancelled run
        assert!(!dir.join("sheet.json").exists());
    }

    #[test]
    fn test_index_round_trips_through_json() {
        let index = SpriteIndex::from_layout(SpriteLayout::for_duration(120.0));
        let json = serde_json::to_string(&index).unwrap();
        let back: SpriteIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cells, index.cells);
    }
}
