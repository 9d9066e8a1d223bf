//! Session state machine: the top-level controller of a live conversation.
//!
//! Owns the capture pipeline, the playback scheduler, and the channel for
//! exactly one session at a time. All channel callbacks are delivered onto
//! one event loop task, so state transitions are never evaluated
//! concurrently with themselves. Observers read eventually-consistent
//! snapshots through [`SessionObserver`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use crate::audio::pcm::{self, EncodedAudio};
use crate::audio::playback::{OutputGraph, PlaybackScheduler};
use crate::audio::{AudioDevices, CapturePipeline, VolumeMeter};
use crate::channel::{
    AgentChannel, AgentConnector, AgentEvent, ClientMessage, OutboundAudio, SetupMessage,
};
use crate::config::Config;
use crate::defaults;
use crate::error::{Result, SessionError};
use crate::transcript::{Message, TranscriptAggregator};

/// Connection status of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Closing,
}

/// State shared between the session, its event loop, and observers.
struct SharedState {
    state: RwLock<SessionState>,
    speaking: Arc<std::sync::atomic::AtomicBool>,
    transcript: RwLock<TranscriptAggregator>,
    last_error: RwLock<Option<SessionError>>,
    /// Non-fatal protocol/codec drops, for diagnostics only.
    dropped_events: AtomicU64,
    meter: VolumeMeter,
}

impl SharedState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(SessionState::Idle),
            speaking: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            transcript: RwLock::new(TranscriptAggregator::new()),
            last_error: RwLock::new(None),
            dropped_events: AtomicU64::new(0),
            meter: VolumeMeter::new(),
        })
    }

    fn state(&self) -> SessionState {
        self.state.read().map(|s| *s).unwrap_or(SessionState::Idle)
    }

    fn set_state(&self, state: SessionState) {
        if let Ok(mut slot) = self.state.write() {
            *slot = state;
        }
    }

    fn record_error(&self, error: SessionError) {
        if let Ok(mut slot) = self.last_error.write() {
            *slot = Some(error);
        }
    }

    fn count_drop(&self, error: &SessionError) {
        eprintln!("lingualive: dropping inbound message: {}", error);
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
    }
}

/// Read-only view for the presentation layer.
///
/// Cloneable and safe to poll from any thread at any time.
#[derive(Clone)]
pub struct SessionObserver {
    shared: Arc<SharedState>,
}

impl SessionObserver {
    pub fn is_connected(&self) -> bool {
        self.shared.state() == SessionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.shared.state() == SessionState::Connecting
    }

    /// Whether the agent is currently producing audible output.
    pub fn is_speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::SeqCst)
    }

    /// Normalized [0, 1] output loudness; 0 when disconnected.
    pub fn volume(&self) -> f32 {
        self.shared.meter.level()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared
            .transcript
            .read()
            .map(|t| t.messages().to_vec())
            .unwrap_or_default()
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.shared.last_error.read().ok().and_then(|e| e.clone())
    }

    /// Count of non-fatal inbound messages dropped so far.
    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped_events.load(Ordering::Relaxed)
    }
}

/// Resources of the currently active session.
struct ActiveSession {
    capture: Arc<Mutex<CapturePipeline>>,
    scheduler: Arc<PlaybackScheduler>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

/// The live conversation engine.
///
/// At most one session is active at a time: `connect` while active fully
/// tears down the prior session first.
pub struct Session {
    devices: Arc<dyn AudioDevices>,
    connector: Arc<dyn AgentConnector>,
    shared: Arc<SharedState>,
    active: Option<ActiveSession>,
}

impl Session {
    pub fn new(devices: Arc<dyn AudioDevices>, connector: Arc<dyn AgentConnector>) -> Self {
        Self {
            devices,
            connector,
            shared: SharedState::new(),
            active: None,
        }
    }

    /// Engine wired to the real devices and transport from `config`.
    #[cfg(feature = "cpal-audio")]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(crate::audio::CpalDevices::new(config.audio.clone())),
            Arc::new(crate::channel::WsConnector::new(
                config.channel.endpoint.clone(),
                config.channel.api_key.clone(),
            )),
        )
    }

    /// Observer handle for the presentation layer.
    pub fn observer(&self) -> SessionObserver {
        SessionObserver {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Open a session: validate, acquire devices, connect the channel, and
    /// start streaming.
    ///
    /// Any prior session is fully torn down first. On failure every
    /// acquired resource is released before the error is recorded and
    /// returned; the engine never retries on its own.
    pub async fn connect(&mut self, config: &Config) -> Result<()> {
        self.teardown_active(true).await;

        // The error slot clears on a fresh connect attempt
        if let Ok(mut slot) = self.shared.last_error.write() {
            *slot = None;
        }
        self.shared.set_state(SessionState::Connecting);

        match self.establish(config).await {
            Ok(()) => {
                self.shared.set_state(SessionState::Connected);
                Ok(())
            }
            Err(error) => {
                self.teardown_active(true).await;
                self.shared.record_error(error.clone());
                Err(error)
            }
        }
    }

    async fn establish(&mut self, config: &Config) -> Result<()> {
        // Fail fast, before touching any device
        config.channel.validate()?;
        config.session.validate()?;

        let input = self.devices.acquire_input()?;
        let graph = self.devices.open_output(defaults::OUTPUT_SAMPLE_RATE)?;
        let scheduler =
            PlaybackScheduler::new(Arc::clone(&graph), Arc::clone(&self.shared.speaking));
        self.shared.meter.attach(Arc::clone(&graph));

        let setup = SetupMessage::new(&config.session);
        let channel = self.connector.connect(setup).await?;

        let (frame_tx, frame_rx) =
            mpsc::channel::<EncodedAudio>(defaults::FRAME_CHANNEL_CAPACITY);
        let mut capture = CapturePipeline::new(input);
        capture.start(frame_tx)?;
        let capture = Arc::new(Mutex::new(capture));

        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(run_session_loop(
            channel,
            frame_rx,
            Arc::clone(&scheduler),
            Arc::clone(&capture),
            Arc::clone(&self.shared),
            Arc::clone(&shutdown),
        ));

        self.active = Some(ActiveSession {
            capture,
            scheduler,
            shutdown,
            task,
        });
        Ok(())
    }

    /// Synchronous, idempotent teardown. Safe to call from any state.
    ///
    /// Capture stops and playback cancels immediately; the event loop
    /// notices the shutdown signal, closes the channel, and exits shortly
    /// after.
    pub fn disconnect(&mut self) {
        if let Some(active) = self.active.take() {
            self.shared.set_state(SessionState::Closing);
            active.shutdown.notify_one();
            if let Ok(mut capture) = active.capture.lock() {
                capture.stop();
            }
            active.scheduler.cancel_all();
        }
        self.shared.meter.detach();
        self.shared.set_state(SessionState::Idle);
    }

    /// Teardown that also waits for the event loop to finish, so the
    /// channel close is observed before a successor session starts.
    async fn teardown_active(&mut self, wait: bool) {
        if let Some(active) = self.active.take() {
            self.shared.set_state(SessionState::Closing);
            active.shutdown.notify_one();
            if let Ok(mut capture) = active.capture.lock() {
                capture.stop();
            }
            active.scheduler.cancel_all();
            if wait {
                let _ = active.task.await;
            }
        }
        // Detach even when nothing was active: a failed connect may have
        // attached the meter before the channel came up.
        self.shared.meter.detach();
        self.shared.set_state(SessionState::Idle);
    }

    /// Disconnect and wait for the event loop to finish.
    pub async fn shutdown(&mut self) {
        self.teardown_active(true).await;
    }

    /// Hand the finished transcript to the persistence collaborator.
    pub fn take_transcript(&self) -> Vec<Message> {
        self.shared
            .transcript
            .write()
            .map(|mut t| t.take_messages())
            .unwrap_or_default()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Tear down from inside the event loop after a fatal channel fault.
///
/// Resources are released before the error lands in the slot, so no device
/// handle or scheduled audio survives a failed session.
fn fail_from_loop(
    capture: &Arc<Mutex<CapturePipeline>>,
    scheduler: &Arc<PlaybackScheduler>,
    shared: &Arc<SharedState>,
    error: SessionError,
) {
    if let Ok(mut capture) = capture.lock() {
        capture.stop();
    }
    scheduler.cancel_all();
    shared.meter.detach();
    shared.set_state(SessionState::Idle);
    shared.record_error(error);
}

/// The session event loop: capture frames go out, agent events come in.
async fn run_session_loop(
    mut channel: Box<dyn AgentChannel>,
    mut frames: mpsc::Receiver<EncodedAudio>,
    scheduler: Arc<PlaybackScheduler>,
    capture: Arc<Mutex<CapturePipeline>>,
    shared: Arc<SharedState>,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                channel.close().await;
                break;
            }

            Some(frame) = frames.recv() => {
                let message = ClientMessage::Audio(OutboundAudio {
                    mime_type: frame.mime_type.to_string(),
                    data: frame.to_base64(),
                });
                if let Err(error) = channel.send(message).await {
                    channel.close().await;
                    fail_from_loop(&capture, &scheduler, &shared, error);
                    break;
                }
            }

            event = channel.next_event() => match event {
                None => {
                    fail_from_loop(
                        &capture,
                        &scheduler,
                        &shared,
                        SessionError::Transport {
                            reason: "channel closed".to_string(),
                        },
                    );
                    break;
                }
                Some(Err(error)) => shared.count_drop(&error),
                Some(Ok(AgentEvent::Audio(payload))) => {
                    match pcm::decode_base64(
                        &payload.data,
                        payload.sample_rate(),
                        defaults::OUTPUT_SAMPLE_RATE,
                        defaults::CHANNELS,
                    ) {
                        Ok(chunk) => {
                            scheduler.enqueue(&chunk);
                        }
                        Err(error) => shared.count_drop(&error),
                    }
                }
                Some(Ok(AgentEvent::Transcript(event))) => {
                    if let Ok(mut transcript) = shared.transcript.write() {
                        transcript.append(event);
                    }
                }
                // No new audio until the next agent turn; the speaking
                // indicator clears once the active handles drain.
                Some(Ok(AgentEvent::TurnComplete)) => {}
                Some(Ok(AgentEvent::Interrupted)) => scheduler.cancel_all(),
                Some(Ok(AgentEvent::Closed { reason })) => {
                    channel.close().await;
                    fail_from_loop(
                        &capture,
                        &scheduler,
                        &shared,
                        SessionError::Transport { reason },
                    );
                    break;
                }
            }
        }
    }
}
