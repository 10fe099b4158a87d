//! Base64 media chunks sent over the live session.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// MIME type used for raw capture-rate PCM audio.
pub const PCM_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// A base64-encoded unit of audio/image data tagged with a MIME type.
/// Constructed just before transmission and discarded after send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

impl MediaChunk {
    /// Encode raw bytes under the given MIME type.
    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data: STANDARD.encode(bytes),
        }
    }

    /// Read a file and encode it, inferring the MIME type from the
    /// extension (JPEG when the extension is missing or unrecognized).
    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let mime = mime_for_path(path);
        Ok(Self::from_bytes(mime, &bytes))
    }

    /// Wrap raw 16 kHz mono PCM samples.
    pub fn pcm(bytes: &[u8]) -> Self {
        Self::from_bytes(PCM_MIME_TYPE, bytes)
    }

    /// Decode the payload back into raw bytes.
    pub fn decoded(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.data)
    }
}

/// MIME type for a file path, from its extension. Defaults to JPEG,
/// matching the capture pipeline's output format.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("wav") => "audio/wav",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn mime_inference_defaults_to_jpeg() {
        assert_eq!(mime_for_path(Path::new("photo.PNG")), "image/png");
        assert_eq!(mime_for_path(Path::new("photo.jpeg")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("take.wav")), "audio/wav");
        assert_eq!(mime_for_path(Path::new("mystery.bin")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("noextension")), "image/jpeg");
    }

    #[test]
    fn file_chunk_round_trips_exact_bytes() {
        let mut file = tempfile::Builder::new()
            .suffix(".wav")
            .tempfile()
            .unwrap();
        let payload: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
        file.write_all(&payload).unwrap();

        let chunk = MediaChunk::from_file(file.path()).unwrap();
        assert_eq!(chunk.mime_type, "audio/wav");
        assert_eq!(chunk.decoded().unwrap(), payload);
    }

    #[test]
    fn pcm_chunk_is_tagged_with_capture_rate() {
        let chunk = MediaChunk::pcm(&[0u8; 32]);
        assert_eq!(chunk.mime_type, PCM_MIME_TYPE);
    }
}
