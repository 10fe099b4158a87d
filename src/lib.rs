//! Realtime multimodal client for a cooking assistant.
//!
//! The core is [`client::LiveClient`], a persistent JSON-over-WebSocket
//! session against the Gemini Live API: one setup handshake, then
//! interleaved text, realtime audio/image chunks, and streamed server
//! turns demultiplexed into [`client::LiveEvent`]s. [`session::Session`]
//! composes the client with audio capture/playback and image capture
//! into the single facade the UI talks to.

pub mod audio;
pub mod client;
pub mod detect;
pub mod device;
pub mod image;
pub mod live;
pub mod logbuf;
pub mod media;
#[cfg(feature = "pulse")]
pub mod pulse;
pub mod session;
pub mod slot;
pub mod stores;

pub use client::{LiveClient, LiveEvent};
pub use detect::{extract_ingredients, IngredientHit};
pub use live::{ConnectionStatus, LiveConfig, LiveError};
pub use logbuf::{LogEntry, LogKind, StreamingLog};
pub use media::MediaChunk;
pub use session::{Session, SessionBackends};
