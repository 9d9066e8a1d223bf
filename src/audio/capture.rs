//! Microphone capture pipeline.
//!
//! Pulls fixed-size frames from the input device, encodes each one, and
//! forwards it toward the channel. Frames are never buffered beyond the
//! current one: on backpressure they are dropped, since realtime audio
//! favors freshness over completeness.

use crate::audio::pcm::{self, EncodedAudio};
use crate::defaults;
use crate::error::Result;

/// One fixed-size block of raw microphone samples.
///
/// Transient: handed to the codec immediately after delivery and not
/// retained.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 samples at [`defaults::INPUT_SAMPLE_RATE`].
    pub samples: Vec<f32>,
    /// Sequence number for ordering and drop diagnostics.
    pub sequence: u64,
}

/// Callback invoked with each complete frame, on whatever thread the audio
/// subsystem schedules.
pub type FrameHandler = Box<dyn FnMut(AudioFrame) + Send + 'static>;

/// A microphone input stream delivering fixed-size frames.
pub trait InputSource: Send {
    /// Attach the frame callback and begin capture.
    fn start(&mut self, handler: FrameHandler) -> Result<()>;

    /// Detach the callback and release the device. Idempotent.
    fn stop(&mut self);
}

/// Owns the input source and forwards encoded frames to the session.
pub struct CapturePipeline {
    source: Box<dyn InputSource>,
    running: bool,
}

impl CapturePipeline {
    pub fn new(source: Box<dyn InputSource>) -> Self {
        Self {
            source,
            running: false,
        }
    }

    /// Start capture, encoding each frame and forwarding it on `outbound`.
    ///
    /// Uses `try_send`: if the session loop falls behind, the frame is
    /// dropped rather than queued.
    pub fn start(&mut self, outbound: tokio::sync::mpsc::Sender<EncodedAudio>) -> Result<()> {
        if self.running {
            return Ok(());
        }

        let handler: FrameHandler = Box::new(move |frame: AudioFrame| {
            let encoded = pcm::encode(&frame.samples);
            if outbound.try_send(encoded).is_err() {
                eprintln!("lingualive: dropping capture frame {}", frame.sequence);
            }
        });

        self.source.start(handler)?;
        self.running = true;
        Ok(())
    }

    /// Stop capture and release the device. Calling stop twice is a no-op.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.source.stop();
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Microphone capture backed by cpal.
///
/// Captures f32 mono at 16kHz and accumulates device callbacks into exactly
/// [`defaults::FRAME_SAMPLES`]-sample frames before invoking the handler.
#[cfg(feature = "cpal-audio")]
pub struct CpalInputSource {
    device: cpal::Device,
    stream: Option<SendableStream>,
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is owned by one CpalInputSource and only touched
/// through `&mut self`, so access is exclusive.
#[cfg(feature = "cpal-audio")]
struct SendableStream(cpal::Stream);

#[cfg(feature = "cpal-audio")]
unsafe impl Send for SendableStream {}

#[cfg(feature = "cpal-audio")]
impl CpalInputSource {
    /// Select the input device.
    ///
    /// # Errors
    /// `SessionError::Permission` when no input device is available (the
    /// platform denied or has no microphone); `SessionError::Device` when
    /// enumeration fails or a named device is missing.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        use crate::error::SessionError;
        use cpal::traits::{DeviceTrait, HostTrait};

        let device = crate::audio::with_suppressed_stderr(|| {
            let host = cpal::default_host();
            match device_name {
                Some(name) => host
                    .input_devices()
                    .map_err(|e| SessionError::Device {
                        message: format!("Failed to enumerate input devices: {}", e),
                    })?
                    .find(|d| d.name().is_ok_and(|n| n == name))
                    .ok_or_else(|| SessionError::Device {
                        message: format!("Input device not found: {}", name),
                    }),
                None => host
                    .default_input_device()
                    .ok_or_else(|| SessionError::Permission {
                        message: "no input device available".to_string(),
                    }),
            }
        })?;

        Ok(Self {
            device,
            stream: None,
        })
    }
}

#[cfg(feature = "cpal-audio")]
impl InputSource for CpalInputSource {
    fn start(&mut self, mut handler: FrameHandler) -> Result<()> {
        use crate::error::SessionError;
        use cpal::traits::{DeviceTrait, StreamTrait};

        if self.stream.is_some() {
            return Ok(());
        }

        let config = cpal::StreamConfig {
            channels: defaults::CHANNELS,
            sample_rate: cpal::SampleRate(defaults::INPUT_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let mut pending: Vec<f32> = Vec::with_capacity(defaults::FRAME_SAMPLES);
        let mut sequence: u64 = 0;

        let stream = self
            .device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    pending.extend_from_slice(data);
                    while pending.len() >= defaults::FRAME_SAMPLES {
                        let samples: Vec<f32> =
                            pending.drain(..defaults::FRAME_SAMPLES).collect();
                        handler(AudioFrame { samples, sequence });
                        sequence += 1;
                    }
                },
                |err| eprintln!("Audio input stream error: {}", err),
                None,
            )
            .map_err(|e| SessionError::Device {
                message: format!("Failed to build input stream: {}", e),
            })?;

        stream.play().map_err(|e| SessionError::Device {
            message: format!("Failed to start input stream: {}", e),
        })?;

        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) {
        use cpal::traits::StreamTrait;
        if let Some(stream) = self.stream.take() {
            let _ = stream.0.pause();
        }
    }
}
