//! Session facade.
//!
//! Single integration point for UI consumers: owns one live client, one
//! audio service, and one image service, pumps client events into shared
//! reactive state (connection status, detected ingredients, transcript),
//! and exposes the imperative surface the screens call. Pure composition;
//! all behavior lives in the owned services.

use crate::audio::{AudioService, RecordingState};
use crate::client::{LiveClient, LiveEvent};
use crate::device::{AudioSink, Camera, Microphone};
use crate::detect::IngredientHit;
use crate::image::ImageService;
use crate::live::{ConnectionStatus, LiveConfig};
use crate::logbuf::{LogEntry, StreamingLog};
use crate::media::MediaChunk;

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// Device backends injected at construction.
pub struct SessionBackends {
    pub microphone: Box<dyn Microphone>,
    pub speaker: Box<dyn AudioSink>,
    pub camera: Box<dyn Camera>,
}

#[derive(Debug, Default)]
struct SharedState {
    status: ConnectionStatus,
    transcript: String,
    ingredients: Vec<IngredientHit>,
}

pub struct Session {
    client: Arc<Mutex<LiveClient>>,
    audio: Arc<Mutex<AudioService>>,
    images: ImageService,
    state: Arc<StdMutex<SharedState>>,
    log: StreamingLog,
    event_tx: mpsc::Sender<LiveEvent>,
    event_rx: Option<mpsc::Receiver<LiveEvent>>,
    pump: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(config: LiveConfig, backends: SessionBackends) -> Self {
        let log = StreamingLog::new();
        let client = Arc::new(Mutex::new(LiveClient::new(config, log.clone())));
        let audio = Arc::new(Mutex::new(AudioService::new(
            backends.microphone,
            backends.speaker,
            log.clone(),
        )));
        let images = ImageService::new(backends.camera, log.clone());
        let (event_tx, event_rx) = mpsc::channel(100);

        Self {
            client,
            audio,
            images,
            state: Arc::new(StdMutex::new(SharedState::default())),
            log,
            event_tx,
            event_rx: Some(event_rx),
            pump: None,
        }
    }

    /// Connect and start pumping events. Returns false when the client
    /// rejects the attempt or setup fails.
    pub async fn connect(&mut self) -> bool {
        let mut client = self.client.lock().await;
        if !client.connect().await {
            return false;
        }
        let events = client.take_events();
        drop(client);

        if let Ok(mut state) = self.state.lock() {
            state.status = ConnectionStatus::Connected;
        }
        if let Some(events) = events {
            if let Some(old) = self.pump.take() {
                old.abort();
            }
            self.pump = Some(tokio::spawn(pump_events(
                events,
                self.event_tx.clone(),
                self.state.clone(),
                self.audio.clone(),
            )));
        }
        true
    }

    /// Tear down the connection and clear session-scoped state.
    pub async fn disconnect(&mut self) {
        self.client.lock().await.disconnect().await;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Ok(mut state) = self.state.lock() {
            state.status = ConnectionStatus::Disconnected;
            state.ingredients.clear();
        }
    }

    pub async fn send_text(&mut self, text: &str) -> bool {
        self.client.lock().await.send_text_message(text).await
    }

    pub async fn send_media(&mut self, chunks: &[MediaChunk]) -> bool {
        self.client.lock().await.send_realtime_input(chunks).await
    }

    pub async fn start_recording(&mut self) -> bool {
        self.audio.lock().await.start_recording().await
    }

    pub async fn stop_recording(&mut self) -> Option<PathBuf> {
        self.audio.lock().await.stop_recording().await
    }

    /// Finish the active take and stream it as realtime audio. The
    /// transient take file is deleted after a successful send.
    pub async fn stop_recording_and_send(&mut self) -> bool {
        let mut audio = self.audio.lock().await;
        let Some(path) = audio.stop_recording().await else {
            return false;
        };
        let Some(chunk) = audio.pcm_chunk(&path) else {
            return false;
        };
        drop(audio);

        let sent = self.client.lock().await.send_realtime_input(&[chunk]).await;
        if sent {
            self.audio.lock().await.discard_take(&path);
        }
        sent
    }

    pub async fn capture_image_and_send(&mut self) -> bool {
        let Some(path) = self.images.capture_image().await else {
            return false;
        };
        let Some(chunk) = self.images.convert_image_to_media_chunk(&path) else {
            return false;
        };
        self.client.lock().await.send_realtime_input(&[chunk]).await
    }

    pub async fn pick_image_and_send(&mut self) -> bool {
        let Some(path) = self.images.pick_image().await else {
            return false;
        };
        let Some(chunk) = self.images.convert_image_to_media_chunk(&path) else {
            return false;
        };
        self.client.lock().await.send_realtime_input(&[chunk]).await
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state
            .lock()
            .map(|state| state.status)
            .unwrap_or_default()
    }

    pub fn ingredients(&self) -> Vec<IngredientHit> {
        self.state
            .lock()
            .map(|state| state.ingredients.clone())
            .unwrap_or_default()
    }

    /// Accumulated model text for the current session.
    pub fn transcript(&self) -> String {
        self.state
            .lock()
            .map(|state| state.transcript.clone())
            .unwrap_or_default()
    }

    pub async fn recording_state(&self) -> RecordingState {
        self.audio.lock().await.recording_state()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.log.snapshot()
    }

    /// Take the consumer half of the event stream. Available once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<LiveEvent>> {
        self.event_rx.take()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        // Provider teardown: close the socket if a runtime is available.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client = self.client.clone();
            handle.spawn(async move {
                client.lock().await.disconnect().await;
            });
        } else {
            debug!("session dropped outside a runtime; socket closes on its own");
        }
    }
}

/// Forward client events to the consumer while mirroring them into the
/// shared state. Inbound model audio is handed straight to playback; a
/// clip arriving while one is in flight is rejected by the audio slot.
async fn pump_events(
    mut events: mpsc::Receiver<LiveEvent>,
    tx: mpsc::Sender<LiveEvent>,
    state: Arc<StdMutex<SharedState>>,
    audio: Arc<Mutex<AudioService>>,
) {
    let mut forward = true;
    while let Some(event) = events.recv().await {
        match &event {
            LiveEvent::Text(text) => {
                if let Ok(mut state) = state.lock() {
                    state.transcript.push_str(text);
                }
            }
            LiveEvent::Ingredients(hits) => {
                if let Ok(mut state) = state.lock() {
                    state.ingredients.extend(hits.iter().cloned());
                }
            }
            LiveEvent::Audio(pcm) => {
                audio.lock().await.play_from_buffer(pcm).await;
            }
            LiveEvent::Closed => {
                if let Ok(mut state) = state.lock() {
                    state.status = ConnectionStatus::Disconnected;
                }
            }
            _ => {}
        }
        if forward && tx.send(event).await.is_err() {
            // Consumer hung up; keep mirroring state regardless.
            forward = false;
        }
    }
}
