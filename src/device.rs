//! Device capability interfaces.
//!
//! Microphone, speaker, and camera are external collaborators. Each is
//! modeled as a small async trait with explicit permission, start/stop,
//! and read operations; failures are reported as errors and handled at
//! the service boundary, never thrown past it.
//!
//! Backends:
//! - `WavFileMicrophone`: replays a WAV file as a take (tests, demo)
//! - `NullSink` / `WavFileSink`: discard or spool playback to disk
//! - `FolderCamera`: treats a directory as camera roll and gallery
//! - `pulse::PulseMicrophone` (feature `pulse`): live PulseAudio capture

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Sample rate every microphone backend must deliver.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Microphone capture capability. Mono 16 kHz signed 16-bit samples.
#[async_trait::async_trait]
pub trait Microphone: Send + Sync {
    /// Ask the platform for record permission. Backends without a
    /// permission model return `Ok(true)`.
    async fn request_permission(&mut self) -> Result<bool>;

    /// Begin a capture. Fails if the backend cannot open its source.
    async fn start(&mut self) -> Result<()>;

    /// End the capture and return the recorded samples.
    async fn stop(&mut self) -> Result<Vec<i16>>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Audio playback capability.
///
/// `play` receives a complete WAV clip. Implementations must invoke
/// `done` exactly once, when playback finishes or fails, so the caller
/// can release the playback slot.
#[async_trait::async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, wav: Vec<u8>, done: Box<dyn FnOnce() + Send>) -> Result<()>;

    fn name(&self) -> &str;
}

/// Still-image acquisition capability (camera or gallery).
/// `None` means the user cancelled, not an error.
#[async_trait::async_trait]
pub trait Camera: Send + Sync {
    async fn request_permission(&mut self) -> Result<bool>;

    async fn capture(&mut self) -> Result<Option<PathBuf>>;

    async fn pick(&mut self) -> Result<Option<PathBuf>>;

    fn name(&self) -> &str;
}

/// Microphone backend that replays a fixed WAV file as the take.
pub struct WavFileMicrophone {
    path: PathBuf,
    recording: bool,
}

impl WavFileMicrophone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recording: false,
        }
    }
}

#[async_trait::async_trait]
impl Microphone for WavFileMicrophone {
    async fn request_permission(&mut self) -> Result<bool> {
        Ok(true)
    }

    async fn start(&mut self) -> Result<()> {
        if !self.path.exists() {
            anyhow::bail!("source file not found: {}", self.path.display());
        }
        self.recording = true;
        debug!("file microphone started from {}", self.path.display());
        Ok(())
    }

    async fn stop(&mut self) -> Result<Vec<i16>> {
        if !self.recording {
            anyhow::bail!("file microphone was not started");
        }
        self.recording = false;

        let reader = hound::WavReader::open(&self.path)
            .with_context(|| format!("failed to open WAV file {}", self.path.display()))?;
        let spec = reader.spec();
        if spec.sample_rate != CAPTURE_SAMPLE_RATE || spec.channels != 1 {
            anyhow::bail!(
                "expected {} Hz mono source, got {} Hz {} ch",
                CAPTURE_SAMPLE_RATE,
                spec.sample_rate,
                spec.channels
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to read samples")?;
        Ok(samples)
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}

/// Sink that discards audio and completes immediately.
pub struct NullSink;

#[async_trait::async_trait]
impl AudioSink for NullSink {
    async fn play(&self, wav: Vec<u8>, done: Box<dyn FnOnce() + Send>) -> Result<()> {
        debug!("null sink dropping {} byte clip", wav.len());
        done();
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Sink that spools each clip to a WAV file in a directory.
pub struct WavFileSink {
    dir: PathBuf,
}

impl WavFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait::async_trait]
impl AudioSink for WavFileSink {
    async fn play(&self, wav: Vec<u8>, done: Box<dyn FnOnce() + Send>) -> Result<()> {
        let path = self
            .dir
            .join(format!("reply_{}.wav", Utc::now().format("%Y%m%d_%H%M%S%.3f")));
        let result = tokio::fs::write(&path, &wav).await;
        done();
        result.with_context(|| format!("failed to write clip to {}", path.display()))?;
        info!("wrote reply clip to {}", path.display());
        Ok(())
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}

/// Camera backend over a local directory: `capture` re-encodes the
/// newest file to JPEG at a fixed quality, `pick` returns it as-is.
pub struct FolderCamera {
    dir: PathBuf,
    quality: u8,
}

impl FolderCamera {
    pub fn new(dir: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            dir: dir.into(),
            quality,
        }
    }
}

#[async_trait::async_trait]
impl Camera for FolderCamera {
    async fn request_permission(&mut self) -> Result<bool> {
        Ok(true)
    }

    async fn capture(&mut self) -> Result<Option<PathBuf>> {
        let Some(src) = newest_file(&self.dir)? else {
            return Ok(None);
        };
        let quality = self.quality;
        let out = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            let img = image::open(&src)
                .with_context(|| format!("failed to decode {}", src.display()))?;
            let out = std::env::temp_dir().join(format!(
                "pantry_capture_{}.jpg",
                Utc::now().format("%Y%m%d_%H%M%S%.3f")
            ));
            let file = std::fs::File::create(&out)?;
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                std::io::BufWriter::new(file),
                quality,
            );
            encoder.encode_image(&img).context("JPEG encode failed")?;
            Ok(out)
        })
        .await??;
        Ok(Some(out))
    }

    async fn pick(&mut self) -> Result<Option<PathBuf>> {
        newest_file(&self.dir)
    }

    fn name(&self) -> &str {
        "folder"
    }
}

fn newest_file(dir: &Path) -> Result<Option<PathBuf>> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            newest = Some((modified, entry.path()));
        }
    }
    Ok(newest.map(|(_, path)| path))
}
