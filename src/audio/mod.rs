//! Audio capture, playback scheduling, and metering.

pub mod capture;
pub mod meter;
pub mod pcm;
pub mod playback;

use std::sync::Arc;

use crate::error::Result;

pub use capture::{AudioFrame, CapturePipeline, InputSource};
pub use meter::VolumeMeter;
pub use pcm::{AudioChunk, EncodedAudio};
pub use playback::{OutputGraph, PlaybackScheduler};

/// Access to the host's audio devices.
///
/// The session state machine acquires both devices through this seam so that
/// tests can substitute mock implementations and count acquisitions.
pub trait AudioDevices: Send + Sync {
    /// Acquire the microphone input stream.
    ///
    /// May block pending user consent on platforms that prompt for
    /// microphone access.
    fn acquire_input(&self) -> Result<Box<dyn InputSource>>;

    /// Open the output graph at the given sample rate.
    fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn OutputGraph>>;
}

/// Audio devices backed by cpal.
#[cfg(feature = "cpal-audio")]
pub struct CpalDevices {
    config: crate::config::AudioConfig,
}

#[cfg(feature = "cpal-audio")]
impl CpalDevices {
    pub fn new(config: crate::config::AudioConfig) -> Self {
        Self { config }
    }
}

#[cfg(feature = "cpal-audio")]
impl AudioDevices for CpalDevices {
    fn acquire_input(&self) -> Result<Box<dyn InputSource>> {
        let source = capture::CpalInputSource::new(self.config.input_device.as_deref())?;
        Ok(Box::new(source))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn OutputGraph>> {
        let graph =
            playback::CpalOutputGraph::open(self.config.output_device.as_deref(), sample_rate)?;
        Ok(graph)
    }
}

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// Suppresses noisy ALSA/JACK/PipeWire messages that cpal triggers when
/// probing audio backends. The messages are harmless but confusing to users.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2
/// (stderr). Safe as long as no other thread is concurrently manipulating
/// fd 2.
#[cfg(feature = "cpal-audio")]
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}
