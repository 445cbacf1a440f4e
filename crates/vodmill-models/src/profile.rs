//! Encode profiles, the profile catalog and profile selection.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::source::SourceInfo;

/// Target video codec for an encode profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    H264,
    Hevc,
    Av1,
}

impl Codec {
    /// FFmpeg encoder name for this codec.
    pub fn encoder(&self) -> &'static str {
        match self {
            Codec::H264 => "libx264",
            Codec::Hevc => "libx265",
            Codec::Av1 => "libsvtav1",
        }
    }

    /// RFC 6381 codec string used in HLS manifests.
    pub fn rfc6381(&self) -> &'static str {
        match self {
            Codec::H264 => "avc1.64001f",
            Codec::Hevc => "hvc1.1.6.L120.90",
            Codec::Av1 => "av01.0.08M.08",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::H264 => f.write_str("h264"),
            Codec::Hevc => f.write_str("hevc"),
            Codec::Av1 => f.write_str("av1"),
        }
    }
}

/// Output container for an encode profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    Mp4,
    Mkv,
    MpegTs,
}

impl Container {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mkv => "mkv",
            Container::MpegTs => "ts",
        }
    }
}

/// A named target output spec: resolution, codec, container, bitrate band.
///
/// Immutable once defined; tasks reference profiles by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeProfile {
    /// Stable profile name, e.g. "720p"
    pub name: String,
    /// Target vertical resolution in pixels (ladder height)
    pub height: u32,
    /// Target codec
    pub codec: Codec,
    /// Output container
    pub container: Container,
    /// Target video bitrate in kbit/s
    pub video_bitrate_kbps: u32,
    /// Maximum video bitrate in kbit/s (upper edge of the band)
    pub max_bitrate_kbps: u32,
    /// Audio bitrate in kbit/s (ignored for silent sources)
    pub audio_bitrate_kbps: u32,
    /// Whether the profile must succeed for the set to be ready
    pub required: bool,
}

impl EncodeProfile {
    /// Approximate total bandwidth in bits/s for manifest metadata.
    pub fn bandwidth(&self) -> u64 {
        u64::from(self.video_bitrate_kbps + self.audio_bitrate_kbps) * 1000
    }

    /// Output dimensions for a source, preserving aspect ratio and never
    /// upscaling. Width is rounded down to an even number as required by
    /// 4:2:0 chroma subsampling.
    pub fn output_dimensions(&self, source: &SourceInfo) -> (u32, u32) {
        let height = self.height.min(source.vertical_resolution().max(2));
        let width = (f64::from(height) * source.aspect_ratio()).round() as u32;
        (width & !1, height & !1)
    }
}

/// Static table of encode profiles. Pure lookup, no state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileCatalog {
    profiles: Vec<EncodeProfile>,
}

impl ProfileCatalog {
    /// Build a catalog from explicit entries. Entries are kept sorted
    /// ascending by bitrate so selection output is deterministic.
    pub fn new(mut profiles: Vec<EncodeProfile>) -> Self {
        profiles.sort_by_key(|p| (p.bandwidth(), p.height));
        Self { profiles }
    }

    /// The default H.264 delivery ladder plus an optional AV1 bonus rung.
    pub fn standard() -> Self {
        let h264 = |name: &str, height: u32, video: u32, max: u32, audio: u32| EncodeProfile {
            name: name.to_string(),
            height,
            codec: Codec::H264,
            container: Container::Mp4,
            video_bitrate_kbps: video,
            max_bitrate_kbps: max,
            audio_bitrate_kbps: audio,
            required: true,
        };

        Self::new(vec![
            h264("240p", 240, 400, 600, 64),
            h264("480p", 480, 1200, 1600, 96),
            h264("720p", 720, 2800, 3600, 128),
            h264("1080p", 1080, 5000, 6500, 160),
            h264("2160p", 2160, 14000, 18000, 192),
            EncodeProfile {
                name: "1080p-av1".to_string(),
                height: 1080,
                codec: Codec::Av1,
                container: Container::Mp4,
                video_bitrate_kbps: 3200,
                max_bitrate_kbps: 4200,
                audio_bitrate_kbps: 160,
                required: false,
            },
        ])
    }

    /// All profiles, ascending by bitrate.
    pub fn profiles(&self) -> &[EncodeProfile] {
        &self.profiles
    }

    /// Look up a profile by name.
    pub fn get(&self, name: &str) -> Option<&EncodeProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// The smallest profile in the catalog (by bitrate).
    pub fn smallest(&self) -> Option<&EncodeProfile> {
        self.profiles.first()
    }
}

impl Default for ProfileCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// Select the applicable profiles for a probed source.
///
/// A profile is included only if its target resolution does not exceed the
/// source's (no upscaling). If the source falls below every catalog entry,
/// the smallest profile is still returned so every source gets at least one
/// variant. Deterministic given the same input.
pub fn select_profiles<'a>(
    catalog: &'a ProfileCatalog,
    source: &SourceInfo,
) -> Vec<&'a EncodeProfile> {
    let source_res = source.vertical_resolution();
    let selected: Vec<&EncodeProfile> = catalog
        .profiles()
        .iter()
        .filter(|p| p.height <= source_res)
        .collect();

    if selected.is_empty() {
        return catalog.smallest().into_iter().collect();
    }
    selected
}
