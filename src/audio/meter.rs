//! Volume meter: a read-only observer of the output graph.
//!
//! Presentation layers poll this on their animation cadence; it never
//! blocks and never mutates session state.

use std::sync::{Arc, RwLock};

use crate::audio::playback::OutputGraph;

/// Derives a bounded loudness scalar from the current output graph.
#[derive(Default)]
pub struct VolumeMeter {
    graph: RwLock<Option<Arc<dyn OutputGraph>>>,
}

impl VolumeMeter {
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(None),
        }
    }

    /// Observe a session's output graph.
    pub fn attach(&self, graph: Arc<dyn OutputGraph>) {
        if let Ok(mut slot) = self.graph.write() {
            *slot = Some(graph);
        }
    }

    /// Stop observing. Subsequent levels read 0.
    pub fn detach(&self) {
        if let Ok(mut slot) = self.graph.write() {
            *slot = None;
        }
    }

    /// Current normalized loudness in [0, 1]; 0 when no session is
    /// connected.
    pub fn level(&self) -> f32 {
        self.graph
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().map(|graph| graph.output_level()))
            .unwrap_or(0.0)
            .clamp(0.0, 1.0)
    }
}
