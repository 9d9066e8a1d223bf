//! Default constants for the live audio session engine.
//!
//! Shared across capture, playback, codec, and channel setup to keep the
//! audio format consistent end to end.

/// Microphone capture sample rate in Hz.
///
/// 16kHz is the standard rate for speech recognition input and is what the
/// remote agent expects on its inbound audio stream.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Agent speech playback sample rate in Hz.
///
/// The remote agent synthesizes speech at 24kHz; the output graph is opened
/// at the same rate so chunks play without resampling in the common case.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Number of channels for both capture and playback (mono).
pub const CHANNELS: u16 = 1;

/// Samples per capture frame.
///
/// 4096 samples at 16kHz is 256ms per frame - large enough to amortize
/// per-message overhead on the channel, small enough to keep latency low.
pub const FRAME_SAMPLES: usize = 4096;

/// MIME/codec tag attached to outbound PCM frames.
pub const PCM_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Capacity of the capture frame channel.
///
/// Frames beyond this are dropped rather than buffered: realtime audio
/// favors freshness over completeness.
pub const FRAME_CHANNEL_CAPACITY: usize = 8;

/// Maximum seconds of audio the playback scheduler will hold ahead of the
/// device clock. Chunks arriving faster than realtime beyond this bound are
/// dropped instead of drifting the timeline arbitrarily far into the future.
pub const MAX_LOOKAHEAD_SECS: f64 = 10.0;
