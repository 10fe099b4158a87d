//! Image capture service.
//!
//! Acquires a still image from the camera or the photo library and
//! converts it to a media chunk. No retry and no compression negotiation;
//! quality is fixed at capture time by the camera backend.

use crate::device::Camera;
use crate::logbuf::StreamingLog;
use crate::media::MediaChunk;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct ImageService {
    camera: Box<dyn Camera>,
    log: StreamingLog,
    permission_granted: bool,
}

impl ImageService {
    pub fn new(camera: Box<dyn Camera>, log: StreamingLog) -> Self {
        Self {
            camera,
            log,
            permission_granted: false,
        }
    }

    async fn ensure_permission(&mut self) -> bool {
        if self.permission_granted {
            return true;
        }
        match self.camera.request_permission().await {
            Ok(true) => {
                self.permission_granted = true;
                true
            }
            Ok(false) => {
                warn!("camera permission denied");
                self.log.permission("camera permission denied");
                false
            }
            Err(e) => {
                self.log.error(format!("permission request failed: {e:#}"));
                false
            }
        }
    }

    /// Take a photo. `None` on cancellation or failure.
    pub async fn capture_image(&mut self) -> Option<PathBuf> {
        if !self.ensure_permission().await {
            return None;
        }
        match self.camera.capture().await {
            Ok(Some(path)) => {
                info!("captured image at {}", path.display());
                Some(path)
            }
            Ok(None) => None,
            Err(e) => {
                self.log.error(format!("image capture failed: {e:#}"));
                None
            }
        }
    }

    /// Pick an existing image from the library. `None` on cancellation
    /// or failure.
    pub async fn pick_image(&mut self) -> Option<PathBuf> {
        match self.camera.pick().await {
            Ok(result) => result,
            Err(e) => {
                self.log.error(format!("image pick failed: {e:#}"));
                None
            }
        }
    }

    /// Base64-encode an image file, inferring MIME from the extension
    /// (JPEG by default). `None` on I/O failure.
    pub fn convert_image_to_media_chunk(&self, path: &Path) -> Option<MediaChunk> {
        match MediaChunk::from_file(path) {
            Ok(chunk) => Some(chunk),
            Err(e) => {
                self.log
                    .error(format!("failed to read {}: {e}", path.display()));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    struct ScriptedCamera {
        grant: bool,
        capture_result: Option<PathBuf>,
    }

    #[async_trait::async_trait]
    impl Camera for ScriptedCamera {
        async fn request_permission(&mut self) -> Result<bool> {
            Ok(self.grant)
        }

        async fn capture(&mut self) -> Result<Option<PathBuf>> {
            Ok(self.capture_result.clone())
        }

        async fn pick(&mut self) -> Result<Option<PathBuf>> {
            Ok(self.capture_result.clone())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn capture_requires_permission() {
        let mut images = ImageService::new(
            Box::new(ScriptedCamera {
                grant: false,
                capture_result: Some(PathBuf::from("/tmp/photo.jpg")),
            }),
            StreamingLog::new(),
        );
        assert!(images.capture_image().await.is_none());
        assert_eq!(
            images.log.snapshot()[0].kind,
            crate::logbuf::LogKind::Permission
        );
    }

    #[tokio::test]
    async fn cancellation_is_not_an_error() {
        let mut images = ImageService::new(
            Box::new(ScriptedCamera {
                grant: true,
                capture_result: None,
            }),
            StreamingLog::new(),
        );
        assert!(images.capture_image().await.is_none());
        assert!(images.pick_image().await.is_none());
        assert!(images.log.is_empty());
    }

    #[tokio::test]
    async fn converts_picked_image_with_inferred_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("salad.png");
        std::fs::write(&path, b"not really a png").unwrap();

        let images = ImageService::new(
            Box::new(ScriptedCamera {
                grant: true,
                capture_result: Some(path.clone()),
            }),
            StreamingLog::new(),
        );
        let chunk = images.convert_image_to_media_chunk(&path).unwrap();
        assert_eq!(chunk.mime_type, "image/png");
        assert_eq!(chunk.decoded().unwrap(), b"not really a png");
    }
}
