//! Playback scheduler for agent speech.
//!
//! Decoded chunks are scheduled back to back on the output graph's own
//! sample clock, so playback is gapless regardless of network jitter.
//! Barge-in cancels every scheduled and in-flight node immediately.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::audio::pcm::AudioChunk;
use crate::defaults;

/// Identifier of one scheduled output node.
pub type HandleId = u64;

/// Callback invoked by the output graph when a node finishes naturally.
///
/// Carries the handle plus the scheduler generation it was submitted under,
/// so completions that race a teardown can be recognized as stale.
pub type CompletionSink = Box<dyn Fn(HandleId, u64) + Send + Sync>;

/// One node submitted to the output graph.
pub struct ScheduledNode {
    pub handle: HandleId,
    pub generation: u64,
    pub samples: Vec<f32>,
    /// Start time in seconds on the graph's own clock.
    pub start: f64,
}

/// The output device's audio graph.
///
/// Time is the graph's own running sample clock, not wall-clock: scheduling
/// against it avoids drift from callback latency jitter. Implementations
/// must not hold internal locks while invoking the completion sink.
pub trait OutputGraph: Send + Sync {
    /// Current position of the graph clock in seconds.
    fn now(&self) -> f64;

    /// Schedule a node to begin at `node.start`.
    fn submit(&self, node: ScheduledNode);

    /// Stop every scheduled and in-flight node without waiting for natural
    /// completion.
    fn stop_all(&self);

    /// Normalized [0, 1] loudness of the most recent output buffer.
    fn output_level(&self) -> f32;

    /// Register the completion callback. Called once at wiring time.
    fn set_completion_sink(&self, sink: CompletionSink);
}

struct SchedulerState {
    /// Where the next chunk begins on the graph clock.
    next_start_time: f64,
    /// Handles submitted but not yet finished or cancelled.
    active: HashSet<HandleId>,
    /// Bumped by `cancel_all`; stale completions carry an older value.
    generation: u64,
    next_handle: HandleId,
}

/// Schedules decoded chunks in strict arrival order on an [`OutputGraph`].
pub struct PlaybackScheduler {
    graph: Arc<dyn OutputGraph>,
    speaking: Arc<AtomicBool>,
    state: Mutex<SchedulerState>,
}

impl PlaybackScheduler {
    /// Create a scheduler bound to `graph` and wire the completion path.
    ///
    /// `speaking` is the shared indicator: true iff at least one handle is
    /// active.
    pub fn new(graph: Arc<dyn OutputGraph>, speaking: Arc<AtomicBool>) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            graph: Arc::clone(&graph),
            speaking,
            state: Mutex::new(SchedulerState {
                next_start_time: 0.0,
                active: HashSet::new(),
                generation: 0,
                next_handle: 0,
            }),
        });

        let weak: Weak<PlaybackScheduler> = Arc::downgrade(&scheduler);
        graph.set_completion_sink(Box::new(move |handle, generation| {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.handle_completion(handle, generation);
            }
        }));

        scheduler
    }

    /// Schedule a chunk to begin exactly when the previous one ends.
    ///
    /// Returns the start time on the graph clock, or `None` if the chunk was
    /// dropped: empty chunks, and chunks that would push the schedule more
    /// than [`defaults::MAX_LOOKAHEAD_SECS`] ahead of the clock.
    pub fn enqueue(&self, chunk: &AudioChunk) -> Option<f64> {
        if chunk.samples.is_empty() {
            return None;
        }

        let node = {
            let mut state = self.state.lock().ok()?;
            let now = self.graph.now();
            let start = state.next_start_time.max(now);

            if start - now > defaults::MAX_LOOKAHEAD_SECS {
                eprintln!(
                    "lingualive: dropping {:.0}ms chunk, schedule {:.1}s ahead of clock",
                    chunk.duration() * 1000.0,
                    start - now
                );
                return None;
            }

            let handle = state.next_handle;
            state.next_handle += 1;
            state.active.insert(handle);
            state.next_start_time = start + chunk.duration();

            self.speaking.store(true, Ordering::SeqCst);

            ScheduledNode {
                handle,
                generation: state.generation,
                samples: chunk.samples.clone(),
                start,
            }
        };

        let start = node.start;
        self.graph.submit(node);
        Some(start)
    }

    /// Barge-in: stop everything, clear the handle set, and reset the
    /// timeline to the current clock position.
    ///
    /// Safe to call from within a completion callback already in flight;
    /// completions from before the cancel carry a stale generation and are
    /// ignored.
    pub fn cancel_all(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.generation += 1;
            state.active.clear();
            state.next_start_time = self.graph.now();
        }
        self.speaking.store(false, Ordering::SeqCst);
        self.graph.stop_all();
    }

    /// Whether any handle is still active.
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    /// Number of active handles.
    pub fn active_handles(&self) -> usize {
        self.state.lock().map(|s| s.active.len()).unwrap_or(0)
    }

    /// Natural-completion path, invoked by the graph.
    fn handle_completion(&self, handle: HandleId, generation: u64) {
        if let Ok(mut state) = self.state.lock() {
            if generation != state.generation {
                return; // stale: submitted before a cancel/teardown
            }
            if state.active.remove(&handle) && state.active.is_empty() {
                self.speaking.store(false, Ordering::SeqCst);
            }
        }
    }
}

/// Output graph backed by a cpal output stream.
///
/// The stream callback mixes every due node into the output buffer, advances
/// the sample cursor (which *is* the graph clock), and reports finished
/// nodes through the completion sink after releasing the node lock.
#[cfg(feature = "cpal-audio")]
pub struct CpalOutputGraph {
    inner: Arc<GraphInner>,
    stream: Mutex<Option<SendableStream>>,
}

#[cfg(feature = "cpal-audio")]
struct GraphInner {
    nodes: Mutex<Vec<ActiveNode>>,
    /// Samples rendered since the graph was opened.
    cursor: std::sync::atomic::AtomicU64,
    /// f32 bits of the last buffer's peak level.
    level_bits: std::sync::atomic::AtomicU32,
    sink: Mutex<Option<CompletionSink>>,
    sample_rate: u32,
}

#[cfg(feature = "cpal-audio")]
struct ActiveNode {
    handle: HandleId,
    generation: u64,
    samples: Vec<f32>,
    start_sample: u64,
    pos: usize,
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only accessed under the Mutex in CpalOutputGraph,
/// so it never crosses thread boundaries unsynchronized.
#[cfg(feature = "cpal-audio")]
struct SendableStream(cpal::Stream);

#[cfg(feature = "cpal-audio")]
unsafe impl Send for SendableStream {}

#[cfg(feature = "cpal-audio")]
impl CpalOutputGraph {
    /// Open the output device and start the render stream.
    ///
    /// # Errors
    /// `SessionError::Device` if the device is missing or the stream cannot
    /// be built or started.
    pub fn open(
        device_name: Option<&str>,
        sample_rate: u32,
    ) -> crate::error::Result<Arc<Self>> {
        use crate::error::SessionError;
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        let device = crate::audio::with_suppressed_stderr(|| {
            let host = cpal::default_host();
            match device_name {
                Some(name) => host
                    .output_devices()
                    .map_err(|e| SessionError::Device {
                        message: format!("Failed to enumerate output devices: {}", e),
                    })?
                    .find(|d| d.name().is_ok_and(|n| n == name))
                    .ok_or_else(|| SessionError::Device {
                        message: format!("Output device not found: {}", name),
                    }),
                None => host.default_output_device().ok_or_else(|| SessionError::Device {
                    message: "No default output device".to_string(),
                }),
            }
        })?;

        let inner = Arc::new(GraphInner {
            nodes: Mutex::new(Vec::new()),
            cursor: std::sync::atomic::AtomicU64::new(0),
            level_bits: std::sync::atomic::AtomicU32::new(0),
            sink: Mutex::new(None),
            sample_rate,
        });

        let config = cpal::StreamConfig {
            channels: crate::defaults::CHANNELS,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let render = Arc::clone(&inner);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render.render(data);
                },
                |err| eprintln!("Audio output stream error: {}", err),
                None,
            )
            .map_err(|e| SessionError::Device {
                message: format!("Failed to build output stream: {}", e),
            })?;

        stream.play().map_err(|e| SessionError::Device {
            message: format!("Failed to start output stream: {}", e),
        })?;

        Ok(Arc::new(Self {
            inner,
            stream: Mutex::new(Some(SendableStream(stream))),
        }))
    }
}

#[cfg(feature = "cpal-audio")]
impl GraphInner {
    fn render(&self, data: &mut [f32]) {
        use std::sync::atomic::Ordering;

        let base = self.cursor.load(Ordering::Relaxed);
        let mut finished = Vec::new();

        if let Ok(mut nodes) = self.nodes.lock() {
            for (i, out) in data.iter_mut().enumerate() {
                let t = base + i as u64;
                let mut acc = 0.0f32;
                for node in nodes.iter_mut() {
                    if t >= node.start_sample && node.pos < node.samples.len() {
                        acc += node.samples[node.pos];
                        node.pos += 1;
                    }
                }
                *out = acc.clamp(-1.0, 1.0);
            }
            nodes.retain(|node| {
                if node.pos >= node.samples.len() {
                    finished.push((node.handle, node.generation));
                    false
                } else {
                    true
                }
            });
        } else {
            data.fill(0.0);
        }

        let peak = data.iter().fold(0.0f32, |max, &s| max.max(s.abs()));
        self.level_bits.store(peak.to_bits(), Ordering::Relaxed);
        self.cursor.fetch_add(data.len() as u64, Ordering::Relaxed);

        // Node lock released above: the sink may re-enter the scheduler.
        if !finished.is_empty()
            && let Ok(sink) = self.sink.lock()
            && let Some(sink) = sink.as_ref()
        {
            for (handle, generation) in finished {
                sink(handle, generation);
            }
        }
    }
}

#[cfg(feature = "cpal-audio")]
impl OutputGraph for CpalOutputGraph {
    fn now(&self) -> f64 {
        let cursor = self.inner.cursor.load(std::sync::atomic::Ordering::Relaxed);
        cursor as f64 / self.inner.sample_rate as f64
    }

    fn submit(&self, node: ScheduledNode) {
        let start_sample = (node.start * self.inner.sample_rate as f64) as u64;
        if let Ok(mut nodes) = self.inner.nodes.lock() {
            nodes.push(ActiveNode {
                handle: node.handle,
                generation: node.generation,
                samples: node.samples,
                start_sample,
                pos: 0,
            });
        }
    }

    fn stop_all(&self) {
        if let Ok(mut nodes) = self.inner.nodes.lock() {
            nodes.clear();
        }
    }

    fn output_level(&self) -> f32 {
        let bits = self.inner.level_bits.load(std::sync::atomic::Ordering::Relaxed);
        f32::from_bits(bits).clamp(0.0, 1.0)
    }

    fn set_completion_sink(&self, sink: CompletionSink) {
        if let Ok(mut slot) = self.inner.sink.lock() {
            *slot = Some(sink);
        }
    }
}

#[cfg(feature = "cpal-audio")]
impl Drop for CpalOutputGraph {
    fn drop(&mut self) {
        use cpal::traits::StreamTrait;
        if let Ok(mut stream) = self.stream.lock()
            && let Some(stream) = stream.take()
        {
            let _ = stream.0.pause();
        }
    }
}

/// Manually driven graph for tests: the clock and completions are advanced
/// explicitly.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub(crate) struct ManualGraph {
        now: Mutex<f64>,
        pub submitted: Mutex<Vec<(HandleId, u64, usize, f64)>>,
        pub stop_calls: std::sync::atomic::AtomicUsize,
        sink: Mutex<Option<CompletionSink>>,
        level: Mutex<f32>,
    }

    impl ManualGraph {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(0.0),
                submitted: Mutex::new(Vec::new()),
                stop_calls: std::sync::atomic::AtomicUsize::new(0),
                sink: Mutex::new(None),
                level: Mutex::new(0.0),
            })
        }

        pub fn advance_to(&self, t: f64) {
            *self.now.lock().expect("clock lock") = t;
        }

        pub fn set_level(&self, level: f32) {
            *self.level.lock().expect("level lock") = level;
        }

        /// Fire the completion sink as the device would.
        pub fn complete(&self, handle: HandleId, generation: u64) {
            let sink = self.sink.lock().expect("sink lock");
            if let Some(sink) = sink.as_ref() {
                sink(handle, generation);
            }
        }

        pub fn last_submitted(&self) -> (HandleId, u64, usize, f64) {
            *self
                .submitted
                .lock()
                .expect("submit lock")
                .last()
                .expect("no node submitted")
        }
    }

    impl OutputGraph for ManualGraph {
        fn now(&self) -> f64 {
            *self.now.lock().expect("clock lock")
        }

        fn submit(&self, node: ScheduledNode) {
            self.submitted.lock().expect("submit lock").push((
                node.handle,
                node.generation,
                node.samples.len(),
                node.start,
            ));
        }

        fn stop_all(&self) {
            self.stop_calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }

        fn output_level(&self) -> f32 {
            *self.level.lock().expect("level lock")
        }

        fn set_completion_sink(&self, sink: CompletionSink) {
            *self.sink.lock().expect("sink lock") = Some(sink);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ManualGraph;
    use super::*;

    fn chunk(duration_secs: f64) -> AudioChunk {
        let rate = crate::defaults::OUTPUT_SAMPLE_RATE;
        AudioChunk {
            samples: vec![0.1; (duration_secs * rate as f64) as usize],
            sample_rate: rate,
        }
    }

    fn scheduler(graph: &Arc<ManualGraph>) -> Arc<PlaybackScheduler> {
        let graph: Arc<dyn OutputGraph> = Arc::clone(graph) as Arc<dyn OutputGraph>;
        PlaybackScheduler::new(graph, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_chunks_schedule_back_to_back() {
        let graph = ManualGraph::new();
        let scheduler = scheduler(&graph);

        let first = scheduler.enqueue(&chunk(0.5)).expect("scheduled");
        let second = scheduler.enqueue(&chunk(0.25)).expect("scheduled");
        let third = scheduler.enqueue(&chunk(0.1)).expect("scheduled");

        assert_eq!(first, 0.0);
        assert!((second - 0.5).abs() < 1e-9);
        assert!((third - 0.75).abs() < 1e-9);
        assert_eq!(scheduler.active_handles(), 3);
    }

    #[test]
    fn test_start_never_before_clock() {
        let graph = ManualGraph::new();
        let scheduler = scheduler(&graph);

        scheduler.enqueue(&chunk(0.1)).expect("scheduled");
        // Idle gap: the clock runs past the end of the last chunk
        graph.advance_to(5.0);
        let start = scheduler.enqueue(&chunk(0.1)).expect("scheduled");
        assert_eq!(start, 5.0);
    }

    #[test]
    fn test_cancel_all_resets_timeline() {
        let graph = ManualGraph::new();
        let scheduler = scheduler(&graph);

        scheduler.enqueue(&chunk(1.0)).expect("scheduled");
        scheduler.enqueue(&chunk(1.0)).expect("scheduled");
        graph.advance_to(0.3);

        scheduler.cancel_all();

        assert_eq!(scheduler.active_handles(), 0);
        assert!(!scheduler.is_speaking());
        assert_eq!(graph.stop_calls.load(Ordering::SeqCst), 1);

        // Next enqueue is relative to "now", not the pre-cancel timeline
        let start = scheduler.enqueue(&chunk(0.5)).expect("scheduled");
        assert!((start - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_speaking_tracks_active_set() {
        let graph = ManualGraph::new();
        let scheduler = scheduler(&graph);
        assert!(!scheduler.is_speaking());

        scheduler.enqueue(&chunk(0.5)).expect("scheduled");
        let (first_handle, generation, _, _) = graph.last_submitted();
        scheduler.enqueue(&chunk(0.5)).expect("scheduled");
        let (second_handle, _, _, _) = graph.last_submitted();
        assert!(scheduler.is_speaking());

        graph.complete(first_handle, generation);
        assert!(scheduler.is_speaking(), "one handle still active");

        graph.complete(second_handle, generation);
        assert!(!scheduler.is_speaking(), "last handle completed");
        assert_eq!(scheduler.active_handles(), 0);
    }

    #[test]
    fn test_stale_completion_ignored_after_cancel() {
        let graph = ManualGraph::new();
        let scheduler = scheduler(&graph);

        scheduler.enqueue(&chunk(0.5)).expect("scheduled");
        let (handle, old_generation, _, _) = graph.last_submitted();

        scheduler.cancel_all();
        scheduler.enqueue(&chunk(0.5)).expect("scheduled");
        assert_eq!(scheduler.active_handles(), 1);

        // The cancelled node's completion fires late, across the teardown
        graph.complete(handle, old_generation);
        assert_eq!(scheduler.active_handles(), 1, "stale completion must not act");
        assert!(scheduler.is_speaking());
    }

    #[test]
    fn test_lookahead_bound_drops_chunks() {
        let graph = ManualGraph::new();
        let scheduler = scheduler(&graph);

        // Fill the schedule right up to the bound, then one more.
        // The last accepted chunk starts exactly at the 10s bound.
        for _ in 0..11 {
            assert!(scheduler.enqueue(&chunk(1.0)).is_some());
        }
        assert!(
            scheduler.enqueue(&chunk(1.0)).is_none(),
            "chunk beyond the lookahead bound must be dropped"
        );
        assert_eq!(scheduler.active_handles(), 11);

        // Once the clock catches up, scheduling resumes
        graph.advance_to(5.0);
        assert!(scheduler.enqueue(&chunk(1.0)).is_some());
    }

    #[test]
    fn test_empty_chunk_not_scheduled() {
        let graph = ManualGraph::new();
        let scheduler = scheduler(&graph);
        let empty = AudioChunk {
            samples: Vec::new(),
            sample_rate: crate::defaults::OUTPUT_SAMPLE_RATE,
        };
        assert!(scheduler.enqueue(&empty).is_none());
        assert!(!scheduler.is_speaking());
    }
}
