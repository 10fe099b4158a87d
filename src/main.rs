//! Command-line demo for the realtime cooking assistant.
//!
//! Connects a live session, either streams a 16 kHz mono WAV file given
//! as the first argument or sends a text prompt, then prints streamed
//! model text and detected ingredients until the turn completes.
//!
//! Requires `GEMINI_API_KEY` in the environment.

#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use pantry_live::device::{FolderCamera, WavFileMicrophone, WavFileSink};
use pantry_live::{LiveConfig, LiveEvent, Session, SessionBackends};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SYSTEM_INSTRUCTION: &str = "You are a cooking assistant. When the user shows or \
describes food, reply conversationally and also include a fenced JSON block of the form \
{\"ingredients\": [{\"name\": ..., \"confidence\": ..., \"category\": ...}]} listing every \
ingredient you can identify.";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let api_key =
        std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY must be set")?;
    let wav_path = std::env::args().nth(1);

    let mut config = LiveConfig::from_api_key(&api_key);
    config.system_instruction = Some(SYSTEM_INSTRUCTION.to_string());

    let output_dir = std::env::temp_dir();
    let mut session = Session::new(
        config,
        SessionBackends {
            microphone: Box::new(WavFileMicrophone::new(
                wav_path.clone().unwrap_or_else(|| "input.wav".to_string()),
            )),
            speaker: Box::new(WavFileSink::new(&output_dir)),
            camera: Box::new(FolderCamera::new(".", 80)),
        },
    );
    let mut events = session
        .take_events()
        .context("event stream already taken")?;

    info!("connecting");
    if !session.connect().await {
        for entry in session.logs() {
            eprintln!("[{:?}] {}", entry.kind, entry.message);
        }
        bail!("connection failed");
    }
    info!("connected");

    if wav_path.is_some() {
        if !session.start_recording().await {
            bail!("could not start the recording take");
        }
        if !session.stop_recording_and_send().await {
            bail!("could not stream the recording");
        }
        // Audio alone does not close the turn; nudge the model.
        if !session.send_text("What can I cook with this?").await {
            bail!("could not send the follow-up prompt");
        }
    } else if !session.send_text("What should I cook tonight?").await {
        bail!("could not send the prompt");
    }

    while let Some(event) = events.recv().await {
        match event {
            LiveEvent::Text(text) => print!("{text}"),
            LiveEvent::Ingredients(hits) => {
                for hit in hits {
                    println!("\n[ingredient] {} ({:?})", hit.name, hit.confidence);
                }
            }
            LiveEvent::Audio(pcm) => info!("received {} bytes of audio", pcm.len()),
            LiveEvent::TurnComplete => {
                println!();
                break;
            }
            LiveEvent::Interrupted => info!("model turn interrupted"),
            LiveEvent::Error(message) => {
                eprintln!("error: {message}");
                break;
            }
            LiveEvent::Closed => {
                eprintln!("connection closed");
                break;
            }
            _ => {}
        }
    }

    session.disconnect().await;
    Ok(())
}
