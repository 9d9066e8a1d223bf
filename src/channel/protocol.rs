//! Wire messages exchanged with the remote voice agent.
//!
//! The channel is treated as an opaque bidirectional JSON message stream;
//! these types define only the shapes this engine sends and understands.
//! One inbound message may carry zero or more events.

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::defaults;
use crate::error::{Result, SessionError};
use crate::transcript::{Speaker, TranscriptEvent};

/// Session-establishment payload, sent once when the channel opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub channels: u16,
    pub voice: String,
    pub system_prompt: String,
}

impl SetupMessage {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            input_sample_rate: defaults::INPUT_SAMPLE_RATE,
            output_sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            channels: defaults::CHANNELS,
            voice: config.voice.clone(),
            system_prompt: config.system_prompt(),
        }
    }
}

/// One outbound microphone frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundAudio {
    pub mime_type: String,
    /// base64 of 16-bit little-endian PCM.
    pub data: String,
}

/// Messages this engine sends over the channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupMessage),
    Audio(OutboundAudio),
}

/// An inbound audio payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPayload {
    pub mime_type: String,
    pub data: String,
}

impl AudioPayload {
    /// Sample rate declared in the MIME tag, e.g. `audio/pcm;rate=24000`.
    /// Falls back to the default output rate when absent.
    pub fn sample_rate(&self) -> u32 {
        self.mime_type
            .split(';')
            .filter_map(|part| part.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
            .unwrap_or(defaults::OUTPUT_SAMPLE_RATE)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptionPayload {
    speaker: String,
    text: String,
    #[serde(default)]
    is_final: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClosePayload {
    #[serde(default)]
    reason: String,
}

/// Raw inbound message shape. Every field is optional; a message with none
/// of them set is malformed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    audio: Option<AudioPayload>,
    transcription: Option<TranscriptionPayload>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
    close: Option<ClosePayload>,
}

/// Typed inbound events after parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Transcript(TranscriptEvent),
    Audio(AudioPayload),
    TurnComplete,
    Interrupted,
    Closed { reason: String },
}

/// Parse one inbound text message into its events, in a fixed order:
/// transcript, audio, turn-complete, interrupted, close.
///
/// # Errors
/// `SessionError::Protocol` for invalid JSON, an unknown speaker tag, or a
/// message with no recognized field. The caller drops the message and
/// continues.
pub fn parse_server_message(text: &str) -> Result<Vec<AgentEvent>> {
    let message: ServerMessage =
        serde_json::from_str(text).map_err(|e| SessionError::Protocol {
            message: format!("invalid JSON from agent: {}", e),
        })?;

    let mut events = Vec::new();

    if let Some(transcription) = message.transcription {
        let speaker = match transcription.speaker.as_str() {
            "user" => Speaker::User,
            // The service historically tagged agent speech as "model"
            "agent" | "model" => Speaker::Agent,
            other => {
                return Err(SessionError::Protocol {
                    message: format!("unknown speaker tag: {:?}", other),
                });
            }
        };
        events.push(AgentEvent::Transcript(TranscriptEvent {
            speaker,
            text: transcription.text,
            is_final: transcription.is_final,
        }));
    }

    if let Some(audio) = message.audio {
        events.push(AgentEvent::Audio(audio));
    }
    if message.turn_complete {
        events.push(AgentEvent::TurnComplete);
    }
    if message.interrupted {
        events.push(AgentEvent::Interrupted);
    }
    if let Some(close) = message.close {
        events.push(AgentEvent::Closed {
            reason: close.reason,
        });
    }

    if events.is_empty() {
        return Err(SessionError::Protocol {
            message: "message carries no recognized event".to_string(),
        });
    }

    Ok(events)
}
