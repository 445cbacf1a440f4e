//! FFmpeg/ffprobe boundary for the encoding orchestrator.
//!
//! This crate provides:
//! - Type-safe ffmpeg command building and a runner with timeout,
//!   cancellation and `-progress pipe:2` parsing
//! - An ffprobe wrapper producing `SourceInfo` (including a keyframe
//!   interval estimate for chunk planning)
//! - Output validation (size + container signature)
//! - Assembly primitives: chunk concatenation, the HLS master manifest,
//!   sprite sheet + frame index, poster extraction

pub mod command;
pub mod concat;
pub mod error;
pub mod manifest;
pub mod poster;
pub mod probe;
pub mod progress;
pub mod sprite;
pub mod validate;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use concat::concat_chunks;
pub use error::{MediaError, MediaResult};
pub use manifest::{MasterManifest, VariantStream};
pub use poster::generate_poster;
pub use probe::{probe_duration, probe_source};
pub use progress::EngineProgress;
pub use sprite::{generate_sprite, SpriteCell, SpriteIndex, SpriteLayout};
pub use validate::validate_output;
