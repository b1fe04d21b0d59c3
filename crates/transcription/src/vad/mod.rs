pub mod segments;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::TranscriptionConfig;
use crate::inference::{EngineCache, EngineOutcome, Locked, VadModel, VadSegment};
use crate::pipeline::audio_buffer::{AudioIngestBuffer, Cursor};

pub use segments::{SpeechSpan, bounded_spans, drop_short, merge_spans};

/// Whether the speaker is currently mid-utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechActivity {
    #[default]
    Inactive,
    Active,
}

/// Edge event derived from one VAD engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VadEdge {
    /// Speech began and has not ended yet.
    Start,
    /// The running utterance ended.
    End,
    /// A complete utterance was reported in a single call.
    Segment,
}

impl SpeechActivity {
    /// Activity after `edge` has been observed.
    pub fn after(self, edge: VadEdge) -> Self {
        match edge {
            VadEdge::Start => SpeechActivity::Active,
            VadEdge::End | VadEdge::Segment => SpeechActivity::Inactive,
        }
    }

    pub fn is_active(self) -> bool {
        self == SpeechActivity::Active
    }
}

/// Interprets one `(beg, end)` pair against the current activity.
///
/// `start` only fires when inactive, `end` only when active, and a fully
/// bounded pair always yields `segment`.
pub fn observe(activity: SpeechActivity, segment: &VadSegment) -> Option<VadEdge> {
    match (segment.start_ms, segment.end_ms) {
        (Some(_), None) if activity == SpeechActivity::Inactive => Some(VadEdge::Start),
        (None, Some(_)) if activity == SpeechActivity::Active => Some(VadEdge::End),
        (Some(_), Some(_)) => Some(VadEdge::Segment),
        _ => None,
    }
}

/// The first qualifying edge in an engine response. Later pairs are ignored.
pub fn first_edge(activity: SpeechActivity, segments: &[VadSegment]) -> Option<VadEdge> {
    segments.iter().find_map(|s| observe(activity, s))
}

/// Per-session VAD state.
#[derive(Debug, Default)]
pub struct VadState {
    pub cache: EngineCache,
    pub activity: SpeechActivity,
    pub processed_ms: u64,
}

/// Drives the VAD engine over fixed windows of the VAD cursor.
#[derive(Debug, Clone)]
pub struct VadCadence {
    window_ms: u32,
    window_samples: usize,
}

impl VadCadence {
    pub fn new(config: &TranscriptionConfig) -> Self {
        Self {
            window_ms: config.vad_window_ms,
            window_samples: config.ms_to_samples(config.vad_window_ms as u64),
        }
    }

    /// Consumes at most one window and returns the edge it produced, if any.
    ///
    /// The window is drained and the processed-time counter advanced whether
    /// or not the engine succeeds.
    pub fn tick(
        &self,
        state: &mut VadState,
        buffer: &mut AudioIngestBuffer,
        engine: &Locked<dyn VadModel>,
    ) -> Option<VadEdge> {
        if buffer.len(Cursor::Vad) < self.window_samples {
            return None;
        }
        let window = buffer.drain(Cursor::Vad, self.window_samples).ok()?;
        state.processed_ms += self.window_ms as u64;

        let outcome = engine
            .infer(&window, &mut state.cache, false, self.window_ms)
            .or_retry(|| {
                state.cache.reset();
                engine.infer(&window, &mut state.cache, false, self.window_ms)
            });

        let segments = match outcome {
            EngineOutcome::Ok(segments) => segments,
            EngineOutcome::Retry(e) | EngineOutcome::Degrade(e) => {
                warn!(
                    engine = engine.name(),
                    processed_ms = state.processed_ms,
                    "VAD window skipped: {}",
                    e
                );
                state.cache.reset();
                return None;
            }
        };

        let edge = first_edge(state.activity, &segments)?;
        state.activity = state.activity.after(edge);
        debug!(?edge, processed_ms = state.processed_ms, "VAD edge");
        Some(edge)
    }
}
