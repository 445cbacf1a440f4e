//! Output sanity checks run after every engine invocation.

use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;

use vodmill_models::Container;

use crate::error::{MediaError, MediaResult};

/// Validate an encoded output file: non-empty and carrying the expected
/// container signature. A passing file is still not guaranteed playable,
/// but a failing one is certainly garbage and must not reach the manifest.
pub async fn validate_output(path: impl AsRef<Path>, container: Container) -> MediaResult<()> {
    let path = path.as_ref();

    let metadata = fs::metadata(path)
        .await
        .map_err(|_| MediaError::FileNotFound(path.to_path_buf()))?;

    if metadata.len() == 0 {
        return Err(MediaError::validation(format!(
            "output is empty: {}",
            path.display()
        )));
    }

    let mut header = [0u8; 12];
    let mut file = fs::File::open(path).await?;
    let read = file.read(&mut header).await?;
    if read < 8 {
        return Err(MediaError::validation(format!(
            "output too short for a container header: {}",
            path.display()
        )));
    }

    if !signature_matches(&header[..read], container) {
        return Err(MediaError::validation(format!(
            "output does not look like {}: {}",
            container.extension(),
            path.display()
        )));
    }

    Ok(())
}

fn signature_matches(header: &[u8], container: Container) -> bool {
    match container {
        // ISO BMFF: box size (4 bytes) then "ftyp"
        Container::Mp4 => header.len() >= 8 && &header[4..8] == b"ftyp",
        // Matroska EBML magic
        Container::Mkv => header.len() >= 4 && header[..4] == [0x1A, 0x45, 0xDF, 0xA3],
        // MPEG-TS packets start with the 0x47 sync byte
        Container::MpegTs => !header.is_empty() && header[0] == 0x47,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents).unwrap();
        f.flush().unwrap();
        f
    }

    #[tokio::test]
    async fn test_empty_output_rejected() {
        let f = temp_file(b"");
        let err = validate_output(f.path(), Container::Mp4).await.unwrap_err();
        assert!(matches!(err, MediaError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_mp4_signature() {
        let mut contents = vec![0x00, 0x00, 0x00, 0x20];
        contents.extend_from_slice(b"ftypisom");
        let f = temp_file(&contents);
        assert!(validate_output(f.path(), Container::Mp4).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_container_rejected() {
        let mut contents = vec![0x1A, 0x45, 0xDF, 0xA3];
        contents.extend_from_slice(&[0u8; 8]);
        let f = temp_file(&contents);

        assert!(validate_output(f.path(), Container::Mkv).await.is_ok());
        let err = validate_output(f.path(), Container::Mp4).await.unwrap_err();
        assert!(matches!(err, MediaError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_mpegts_sync_byte() {
        let mut contents = vec![0x47];
        contents.extend_from_slice(&[0u8; 16]);
        let f = temp_file(&contents);
        assert!(validate_output(f.path(), Container::MpegTs).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = validate_output("/nonexistent/out.mp4", Container::Mp4)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
