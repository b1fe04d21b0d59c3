use serde::{Deserialize, Serialize};

use crate::inference::VadSegment;

/// A fully bounded speech region in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechSpan {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl SpeechSpan {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// Keeps the pairs that carry both bounds, in engine order.
pub fn bounded_spans(segments: &[VadSegment]) -> Vec<SpeechSpan> {
    segments
        .iter()
        .filter_map(|s| match (s.start_ms, s.end_ms) {
            (Some(start), Some(end)) if end > start => Some(SpeechSpan::new(start, end)),
            _ => None,
        })
        .collect()
}

/// Greedy left-to-right merge: the running span absorbs its successor until it
/// is at least `min_ms` long, then a new running span starts.
pub fn merge_spans(spans: &[SpeechSpan], min_ms: u64) -> Vec<SpeechSpan> {
    let mut merged = Vec::new();
    let mut iter = spans.iter().copied();
    let Some(mut running) = iter.next() else {
        return merged;
    };
    for span in iter {
        if running.duration_ms() < min_ms {
            running.end_ms = span.end_ms.max(running.end_ms);
        } else {
            merged.push(running);
            running = span;
        }
    }
    merged.push(running);
    merged
}

/// Drops spans shorter than `min_ms`.
pub fn drop_short(spans: Vec<SpeechSpan>, min_ms: u64) -> Vec<SpeechSpan> {
    spans
        .into_iter()
        .filter(|s| s.duration_ms() >= min_ms)
        .collect()
}
