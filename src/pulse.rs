//! PulseAudio microphone backend (feature `pulse`).
//!
//! Captures 16-bit little-endian PCM at 16 kHz mono via the PulseAudio
//! simple API. The blocking read loop runs on a dedicated thread; stop
//! joins it and hands the buffered samples back.

use crate::device::{Microphone, CAPTURE_SAMPLE_RATE};
use anyhow::{anyhow, Context as _, Result};
use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::{Context, FlagSet as ContextFlagSet, State};
use libpulse_binding::def::Retval;
use libpulse_binding::mainloop::standard::{IterateResult, Mainloop};
use libpulse_binding::proplist::Proplist;
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{info, warn};

/// An available PulseAudio source.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub name: String,
    pub description: String,
    pub sample_rate: u32,
    pub channels: u8,
    /// Monitor of a playback sink rather than a physical microphone.
    pub is_monitor: bool,
}

struct CaptureWorker {
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<Result<Vec<i16>>>,
}

/// Live microphone capture over PulseAudio.
pub struct PulseMicrophone {
    app_name: String,
    device_name: Option<String>,
    worker: Option<CaptureWorker>,
}

impl PulseMicrophone {
    /// Use the default input device.
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            device_name: None,
            worker: None,
        }
    }

    /// Use a specific PulseAudio source by name.
    pub fn with_device(app_name: &str, device_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            device_name: Some(device_name.to_string()),
            worker: None,
        }
    }

    /// Prefer the first physical microphone, falling back to the default
    /// device when none is listed.
    pub fn with_fallback(app_name: &str) -> Result<Self> {
        let sources = list_sources(app_name)?;
        if let Some(mic) = sources.iter().find(|s| !s.is_monitor) {
            info!("using microphone source: {}", mic.name);
            Ok(Self::with_device(app_name, &mic.name))
        } else {
            warn!("no microphone source listed, using default device");
            Ok(Self::new(app_name))
        }
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }
}

#[async_trait::async_trait]
impl Microphone for PulseMicrophone {
    async fn request_permission(&mut self) -> Result<bool> {
        // Desktop PulseAudio has no permission prompt.
        Ok(true)
    }

    async fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            anyhow::bail!("capture already running");
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let app_name = self.app_name.clone();
        let device = self.device_name.clone();

        // `Simple` is not Send; it lives entirely on the capture thread.
        let handle = thread::Builder::new()
            .name("pulse-capture".to_string())
            .spawn(move || -> Result<Vec<i16>> {
                let spec = Spec {
                    format: Format::S16le,
                    channels: 1,
                    rate: CAPTURE_SAMPLE_RATE,
                };
                let simple = Simple::new(
                    None,
                    &app_name,
                    Direction::Record,
                    device.as_deref(),
                    "record",
                    &spec,
                    None,
                    None,
                )
                .map_err(|e| anyhow!("failed to open capture stream: {}", e))?;

                let mut samples = Vec::new();
                let mut buf = [0u8; 3200]; // ~100 ms of 16 kHz mono S16LE
                while !stop_flag.load(Ordering::Acquire) {
                    simple
                        .read(&mut buf)
                        .map_err(|e| anyhow!("capture read failed: {}", e))?;
                    samples.extend(
                        buf.chunks_exact(2)
                            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
                    );
                }
                Ok(samples)
            })
            .context("failed to spawn capture thread")?;

        self.worker = Some(CaptureWorker { stop, handle });
        Ok(())
    }

    async fn stop(&mut self) -> Result<Vec<i16>> {
        let worker = self
            .worker
            .take()
            .ok_or_else(|| anyhow!("capture not running"))?;
        worker.stop.store(true, Ordering::Release);
        tokio::task::spawn_blocking(move || {
            worker
                .handle
                .join()
                .map_err(|_| anyhow!("capture thread panicked"))?
        })
        .await?
    }

    fn name(&self) -> &str {
        "pulse"
    }
}

/// List available PulseAudio sources via context introspection.
pub fn list_sources(app_name: &str) -> Result<Vec<SourceInfo>> {
    let sources = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(AtomicBool::new(false));

    let mut proplist = Proplist::new().ok_or_else(|| anyhow!("failed to create proplist"))?;
    proplist
        .set_str(
            libpulse_binding::proplist::properties::APPLICATION_NAME,
            app_name,
        )
        .map_err(|_| anyhow!("failed to set application name"))?;

    let mut mainloop = Mainloop::new().ok_or_else(|| anyhow!("failed to create mainloop"))?;
    let mut context = Context::new_with_proplist(&mainloop, "pantry-live-sources", &proplist)
        .ok_or_else(|| anyhow!("failed to create context"))?;
    context
        .connect(None, ContextFlagSet::NOFLAGS, None)
        .map_err(|e| anyhow!("failed to connect to PulseAudio: {}", e))?;

    loop {
        match mainloop.iterate(false) {
            IterateResult::Quit(_) | IterateResult::Err(_) => {
                anyhow::bail!("mainloop iterate failed while connecting");
            }
            IterateResult::Success(_) => {}
        }
        match context.get_state() {
            State::Ready => break,
            State::Failed | State::Terminated => {
                anyhow::bail!("PulseAudio connection failed");
            }
            _ => {}
        }
    }

    let sources_cb = sources.clone();
    let done_cb = done.clone();
    let introspector = context.introspect();
    let _op = introspector.get_source_info_list(move |list| match list {
        ListResult::Item(source) => {
            let is_monitor = source.monitor_of_sink.is_some()
                || source
                    .name
                    .as_ref()
                    .map(|n| n.contains("monitor"))
                    .unwrap_or(false);
            if let (Some(name), Some(description)) = (
                source.name.as_ref().map(|s| s.to_string()),
                source.description.as_ref().map(|s| s.to_string()),
            ) {
                if let Ok(mut sources) = sources_cb.lock() {
                    sources.push(SourceInfo {
                        name,
                        description,
                        sample_rate: source.sample_spec.rate,
                        channels: source.sample_spec.channels,
                        is_monitor,
                    });
                }
            }
        }
        ListResult::End | ListResult::Error => {
            done_cb.store(true, Ordering::Release);
        }
    });

    while !done.load(Ordering::Acquire) {
        match mainloop.iterate(false) {
            IterateResult::Quit(_) | IterateResult::Err(_) => {
                anyhow::bail!("mainloop iterate failed while listing sources");
            }
            IterateResult::Success(_) => {}
        }
    }

    context.disconnect();
    mainloop.quit(Retval(0));

    let result = sources
        .lock()
        .map(|s| s.clone())
        .map_err(|_| anyhow!("source list lock poisoned"))?;
    Ok(result)
}
