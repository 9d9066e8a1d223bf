//! lingualive - Live audio session engine for conversational language practice
//!
//! Streams microphone audio to a remote voice agent over a persistent
//! channel and plays the agent's synthesized replies back gaplessly, with
//! barge-in cancellation and a stable transcript of both sides.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod channel;
pub mod config;
pub mod defaults;
pub mod error;
pub mod session;
pub mod transcript;

// Core traits (capture → channel → playback)
pub use audio::{AudioChunk, AudioDevices, AudioFrame, InputSource, OutputGraph};
pub use channel::{AgentChannel, AgentConnector, AgentEvent};

pub use audio::{CapturePipeline, PlaybackScheduler, VolumeMeter};
pub use config::{Config, SessionConfig};
pub use error::{Result, SessionError};
pub use session::{Session, SessionObserver, SessionState};
pub use transcript::{Message, Speaker, TranscriptAggregator, TranscriptEvent};

/// Version of the engine, from Cargo metadata.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
