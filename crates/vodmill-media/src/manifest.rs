//! Adaptive-streaming master manifest.

use std::fmt::Write as _;
use std::path::Path;
use tokio::fs;

use vodmill_models::EncodeProfile;

use crate::error::{MediaError, MediaResult};

/// One variant entry in the master manifest.
#[derive(Debug, Clone)]
pub struct VariantStream {
    /// URI of the variant, relative to the manifest
    pub uri: String,
    /// Total bandwidth in bits/s
    pub bandwidth: u64,
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// RFC 6381 codec string
    pub codecs: String,
}

impl VariantStream {
    /// Build a variant entry from a profile and its actual output geometry.
    pub fn from_profile(profile: &EncodeProfile, uri: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            uri: uri.into(),
            bandwidth: profile.bandwidth(),
            width,
            height,
            codecs: profile.codec.rfc6381().to_string(),
        }
    }
}

/// Master playlist over the successfully produced variants.
#[derive(Debug, Clone, Default)]
pub struct MasterManifest {
    variants: Vec<VariantStream>,
}

impl MasterManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_variant(mut self, variant: VariantStream) -> Self {
        self.variants.push(variant);
        self
    }

    pub fn variants(&self) -> &[VariantStream] {
        &self.variants
    }

    /// Render to M3U8. Variants are listed ascending by bandwidth
    /// regardless of insertion order.
    pub fn render(&self) -> MediaResult<String> {
        if self.variants.is_empty() {
            return Err(MediaError::assembly(
                "refusing to render a manifest with zero variants",
            ));
        }

        let mut variants = self.variants.clone();
        variants.sort_by_key(|v| v.bandwidth);

        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        out.push_str("#EXT-X-VERSION:6\n");
        out.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");

        for variant in &variants {
            let _ = write!(
                out,
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}",
                variant.bandwidth, variant.width, variant.height
            );
            if !variant.codecs.is_empty() {
                let _ = write!(out, ",CODECS=\"{}\"", variant.codecs);
            }
            out.push('\n');
            out.push_str(&variant.uri);
            out.push('\n');
        }

        Ok(out)
    }

    /// Render and write the manifest to disk.
    pub async fn write_to(&self, path: impl AsRef<Path>) -> MediaResult<()> {
        let rendered = self.render()?;
        fs::write(path.as_ref(), rendered).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vodmill_models::ProfileCatalog;

    fn variant(bandwidth: u64, height: u32) -> VariantStream {
        VariantStream {
            uri: format!("{height}p.mp4"),
            bandwidth,
            width: height * 16 / 9,
            height,
            codecs: "avc1.64001f".to_string(),
        }
    }

    #[test]
    fn test_variants_rendered_ascending_by_bandwidth() {
        let manifest = MasterManifest::new()
            .add_variant(variant(5_160_000, 1080))
            .add_variant(variant(464_000, 240))
            .add_variant(variant(2_928_000, 720));

        let rendered = manifest.render().unwrap();
        let b240 = rendered.find("BANDWIDTH=464000").unwrap();
        let b720 = rendered.find("BANDWIDTH=2928000").unwrap();
        let b1080 = rendered.find("BANDWIDTH=5160000").unwrap();
        assert!(b240 < b720 && b720 < b1080);
    }

    #[test]
    fn test_empty_manifest_is_an_error() {
        assert!(MasterManifest::new().render().is_err());
    }

    #[test]
    fn test_variant_line_format() {
        let rendered = MasterManifest::new()
            .add_variant(variant(2_928_000, 720))
            .render()
            .unwrap();

        assert!(rendered.starts_with("#EXTM3U\n"));
        assert!(rendered.contains("#EXT-X-STREAM-INF:BANDWIDTH=2928000,RESOLUTION=1280x720,CODECS=\"avc1.64001f\"\n720p.mp4\n"));
    }

    #[test]
    fn test_from_profile_carries_codec_string() {
        let catalog = ProfileCatalog::standard();
        let av1 = catalog.get("1080p-av1").unwrap();
        let variant = VariantStream::from_profile(av1, "1080p-av1.mp4", 1920, 1080);
        assert!(variant.codecs.starts_with("av01"));
        assert_eq!(variant.bandwidth, av1.bandwidth());
    }
}
