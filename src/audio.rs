//! Audio capture/playback service.
//!
//! Bridges the microphone and speaker capabilities to the session's
//! chunk/buffer model: finished takes are written to a temp WAV file and
//! converted to media chunks; inbound raw PCM is wrapped in a minimal
//! WAV container and handed to the sink. Every operation catches its
//! errors, mirrors them onto the diagnostic log, and resolves to a
//! sentinel value; nothing is thrown past the service boundary.

use crate::device::{AudioSink, Microphone, CAPTURE_SAMPLE_RATE};
use crate::logbuf::StreamingLog;
use crate::media::MediaChunk;
use crate::slot::{ResourceSlot, SlotGuard};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Sample rate of inbound model audio.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Snapshot of the recording side for UI consumers.
#[derive(Debug, Clone, Default)]
pub struct RecordingState {
    pub is_recording: bool,
    pub duration_ms: u64,
    /// Handle to the last finished take. The file is transient and
    /// deleted opportunistically after conversion.
    pub uri: Option<PathBuf>,
}

struct ActiveTake {
    _guard: SlotGuard,
    started: Instant,
}

pub struct AudioService {
    mic: Box<dyn Microphone>,
    sink: Box<dyn AudioSink>,
    record_slot: ResourceSlot,
    playback_slot: ResourceSlot,
    log: StreamingLog,
    permission_granted: bool,
    active: Option<ActiveTake>,
    last_take: Option<PathBuf>,
}

impl AudioService {
    pub fn new(mic: Box<dyn Microphone>, sink: Box<dyn AudioSink>, log: StreamingLog) -> Self {
        Self {
            mic,
            sink,
            record_slot: ResourceSlot::new("recording"),
            playback_slot: ResourceSlot::new("playback"),
            log,
            permission_granted: false,
            active: None,
            last_take: None,
        }
    }

    /// Start a microphone take. Rejects (returns false) while another
    /// take is active; there is no queuing.
    pub async fn start_recording(&mut self) -> bool {
        let Some(guard) = self.record_slot.try_acquire() else {
            warn!("start_recording rejected: a recording is already active");
            self.log.warning("recording already in progress");
            return false;
        };

        if !self.permission_granted {
            match self.mic.request_permission().await {
                Ok(true) => self.permission_granted = true,
                Ok(false) => {
                    warn!("microphone permission denied");
                    self.log.permission("microphone permission denied");
                    return false;
                }
                Err(e) => {
                    self.log.error(format!("permission request failed: {e:#}"));
                    return false;
                }
            }
        }

        if let Err(e) = self.mic.start().await {
            self.log.error(format!("failed to start recording: {e:#}"));
            return false;
        }

        info!("recording started ({})", self.mic.name());
        self.active = Some(ActiveTake {
            _guard: guard,
            started: Instant::now(),
        });
        true
    }

    /// Finalize the active take to a temp WAV file. Stopping with no
    /// active take is a no-op returning `None`.
    pub async fn stop_recording(&mut self) -> Option<PathBuf> {
        let take = match self.active.take() {
            Some(take) => take,
            None => {
                debug!("stop_recording with no active take");
                return None;
            }
        };

        let samples = match self.mic.stop().await {
            Ok(samples) => samples,
            Err(e) => {
                self.log.error(format!("failed to stop recording: {e:#}"));
                return None;
            }
        };

        let path = std::env::temp_dir().join(format!(
            "pantry_take_{}.wav",
            chrono::Utc::now().format("%Y%m%d_%H%M%S%.3f")
        ));
        if let Err(e) = write_wav(&path, &samples, CAPTURE_SAMPLE_RATE) {
            self.log.error(format!("failed to write take: {e}"));
            return None;
        }

        info!(
            "recording stopped after {:.1}s, {} samples -> {}",
            take.started.elapsed().as_secs_f32(),
            samples.len(),
            path.display()
        );
        self.last_take = Some(path.clone());
        Some(path)
    }

    pub fn recording_state(&self) -> RecordingState {
        RecordingState {
            is_recording: self.active.is_some(),
            duration_ms: self
                .active
                .as_ref()
                .map(|t| t.started.elapsed().as_millis() as u64)
                .unwrap_or(0),
            uri: self.last_take.clone(),
        }
    }

    /// Base64-encode a recorded file into a chunk. `None` on I/O failure.
    pub fn convert_to_media_chunk(&self, path: &Path) -> Option<MediaChunk> {
        match MediaChunk::from_file(path) {
            Ok(chunk) => Some(chunk),
            Err(e) => {
                self.log
                    .error(format!("failed to read {}: {e}", path.display()));
                None
            }
        }
    }

    /// Read a take back as raw capture-rate PCM, the format the live
    /// protocol expects for realtime audio.
    pub fn pcm_chunk(&self, path: &Path) -> Option<MediaChunk> {
        let reader = match hound::WavReader::open(path) {
            Ok(reader) => reader,
            Err(e) => {
                self.log
                    .error(format!("failed to open {}: {e}", path.display()));
                return None;
            }
        };
        let samples: Result<Vec<i16>, _> = reader.into_samples::<i16>().collect();
        match samples {
            Ok(samples) => {
                let mut bytes = Vec::with_capacity(samples.len() * 2);
                for s in samples {
                    bytes.extend_from_slice(&s.to_le_bytes());
                }
                Some(MediaChunk::pcm(&bytes))
            }
            Err(e) => {
                self.log
                    .error(format!("failed to decode {}: {e}", path.display()));
                None
            }
        }
    }

    /// Play raw model audio. The playback slot is owned for the duration
    /// of the clip; a second call while one is in flight is rejected
    /// instead of displacing the current sound.
    pub async fn play_from_buffer(&mut self, pcm: &[u8]) -> bool {
        let Some(guard) = self.playback_slot.try_acquire() else {
            warn!("play_from_buffer rejected: playback in progress");
            self.log.warning("playback already in progress");
            return false;
        };

        let wav = wrap_pcm_in_wav(pcm, PLAYBACK_SAMPLE_RATE, 1);
        match self
            .sink
            .play(wav, Box::new(move || guard.release()))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                self.log.error(format!("playback failed: {e:#}"));
                false
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playback_slot.is_busy()
    }

    /// Opportunistically delete a transient take file.
    pub fn discard_take(&mut self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            debug!("could not delete {}: {e}", path.display());
        }
        if self.last_take.as_deref() == Some(path) {
            self.last_take = None;
        }
    }
}

fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()
}

/// Wrap raw 16-bit PCM in a minimal RIFF/WAVE container.
pub fn wrap_pcm_in_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Vec<u8> {
    let bits_per_sample = 16u16;
    let byte_rate = sample_rate * u32::from(channels) * u32::from(bits_per_sample) / 8;
    let block_align = channels * bits_per_sample / 8;
    let data_size = pcm.len() as u32;
    let file_size = 36 + data_size;

    let mut wav = Vec::with_capacity(44 + pcm.len());

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_size.to_le_bytes());
    wav.extend_from_slice(pcm);

    wav
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NullSink;
    use crate::logbuf::LogKind;
    use anyhow::Result;
    use rand::Rng;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    struct MockMicrophone {
        samples: Vec<i16>,
        grant_permission: bool,
        running: bool,
    }

    impl MockMicrophone {
        fn new(samples: Vec<i16>) -> Self {
            Self {
                samples,
                grant_permission: true,
                running: false,
            }
        }

        fn denied() -> Self {
            Self {
                samples: Vec::new(),
                grant_permission: false,
                running: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl Microphone for MockMicrophone {
        async fn request_permission(&mut self) -> Result<bool> {
            Ok(self.grant_permission)
        }

        async fn start(&mut self) -> Result<()> {
            self.running = true;
            Ok(())
        }

        async fn stop(&mut self) -> Result<Vec<i16>> {
            assert!(self.running, "stop without start");
            self.running = false;
            Ok(self.samples.clone())
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    /// Sink that parks the done callback so the clip stays "in flight"
    /// until the test releases it.
    #[derive(Clone, Default)]
    struct HoldSink {
        pending: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
    }

    impl HoldSink {
        fn finish(&self) {
            if let Some(done) = self.pending.lock().unwrap().take() {
                done();
            }
        }
    }

    #[async_trait::async_trait]
    impl AudioSink for HoldSink {
        async fn play(&self, _wav: Vec<u8>, done: Box<dyn FnOnce() + Send>) -> Result<()> {
            *self.pending.lock().unwrap() = Some(done);
            Ok(())
        }

        fn name(&self) -> &str {
            "hold"
        }
    }

    fn service_with(mic: MockMicrophone) -> AudioService {
        AudioService::new(Box::new(mic), Box::new(NullSink), StreamingLog::new())
    }

    #[tokio::test]
    async fn second_start_without_stop_is_rejected() {
        let mut audio = service_with(MockMicrophone::new(vec![1, 2, 3]));
        assert!(audio.start_recording().await);
        assert!(!audio.start_recording().await);
        assert!(audio.recording_state().is_recording);

        assert!(audio.stop_recording().await.is_some());
        assert!(audio.start_recording().await);
    }

    #[tokio::test]
    async fn stop_without_active_take_is_a_noop() {
        let mut audio = service_with(MockMicrophone::new(vec![]));
        assert!(audio.stop_recording().await.is_none());
        assert!(audio.log.is_empty());
    }

    #[tokio::test]
    async fn denied_permission_surfaces_distinctly() {
        let mut audio = service_with(MockMicrophone::denied());
        assert!(!audio.start_recording().await);
        let entries = audio.log.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, LogKind::Permission);
        // The failed attempt must not leave the slot held.
        assert!(!audio.recording_state().is_recording);
        assert!(!audio.record_slot.is_busy());
    }

    #[tokio::test]
    async fn finished_take_round_trips_through_wav_and_pcm() {
        let mut rng = rand::rng();
        let samples: Vec<i16> = (0..3200).map(|_| rng.random()).collect();
        let mut audio = service_with(MockMicrophone::new(samples.clone()));

        assert!(audio.start_recording().await);
        let path = audio.stop_recording().await.expect("take path");

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, CAPTURE_SAMPLE_RATE);
        let read_back: Vec<i16> = reader.into_samples().map(Result::unwrap).collect();
        assert_eq!(read_back, samples);

        let chunk = audio.pcm_chunk(&path).expect("pcm chunk");
        let mut expected = Vec::new();
        for s in &samples {
            expected.extend_from_slice(&s.to_le_bytes());
        }
        assert_eq!(chunk.decoded().unwrap(), expected);

        audio.discard_take(&path);
        assert!(!path.exists());
        assert!(audio.recording_state().uri.is_none());
    }

    #[tokio::test]
    async fn playback_is_rejected_while_a_clip_is_in_flight() {
        let sink = HoldSink::default();
        let mut audio = AudioService::new(
            Box::new(MockMicrophone::new(vec![])),
            Box::new(sink.clone()),
            StreamingLog::new(),
        );

        assert!(audio.play_from_buffer(&[0u8; 64]).await);
        assert!(audio.is_playing());
        assert!(!audio.play_from_buffer(&[0u8; 64]).await);

        sink.finish();
        assert!(!audio.is_playing());
        assert!(audio.play_from_buffer(&[0u8; 64]).await);
    }

    #[test]
    fn wav_wrapper_produces_a_readable_container() {
        let samples: Vec<i16> = (0..480).map(|i| (i * 13 % 997) as i16).collect();
        let mut pcm = Vec::new();
        for s in &samples {
            pcm.extend_from_slice(&s.to_le_bytes());
        }

        let wav = wrap_pcm_in_wav(&pcm, PLAYBACK_SAMPLE_RATE, 1);
        assert_eq!(wav.len(), 44 + pcm.len());

        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, PLAYBACK_SAMPLE_RATE);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        let read_back: Vec<i16> = reader.into_samples().map(Result::unwrap).collect();
        assert_eq!(read_back, samples);
    }
}
