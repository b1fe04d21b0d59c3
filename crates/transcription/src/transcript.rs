use serde::{Deserialize, Serialize};

/// A timestamped slice of recognized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Incremental text state of one session.
///
/// `raw` is every non-empty streaming output in arrival order. `pending`
/// holds the unpunctuated tail not yet flushed; `confirmed` holds punctuated
/// output of every flush. With an identity punctuator `confirmed + pending`
/// always equals `raw`. `sentence` tracks the raw text of the running
/// utterance and is cleared on a VAD end edge.
#[derive(Debug, Default, Clone)]
pub struct TranscriptAssembler {
    confirmed: String,
    pending: String,
    raw: String,
    sentence: String,
    segments: Vec<TranscriptSegment>,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends streaming output to the raw, pending and sentence accumulators.
    pub fn push_recognized(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.raw.push_str(text);
        self.pending.push_str(text);
        self.sentence.push_str(text);
    }

    /// Pending length in characters (not bytes).
    pub fn pending_chars(&self) -> usize {
        self.pending.chars().count()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Removes the pending text so it can be punctuated.
    pub fn take_pending(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    /// Appends a punctuated flush and records its segment, which starts where
    /// the previous one ended.
    pub fn confirm(&mut self, punctuated: &str, end_ms: u64) -> TranscriptSegment {
        let start_ms = self.segments.last().map(|s| s.end_ms).unwrap_or(0);
        self.confirmed.push_str(punctuated);
        let segment = TranscriptSegment {
            text: punctuated.to_string(),
            start_ms,
            end_ms: end_ms.max(start_ms),
        };
        self.segments.push(segment.clone());
        segment
    }

    pub fn end_sentence(&mut self) {
        self.sentence.clear();
    }

    /// Everything recognized so far: confirmed text followed by the pending tail.
    pub fn full_text(&self) -> String {
        let mut text = String::with_capacity(self.confirmed.len() + self.pending.len());
        text.push_str(&self.confirmed);
        text.push_str(&self.pending);
        text
    }

    pub fn confirmed(&self) -> &str {
        &self.confirmed
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn sentence(&self) -> &str {
        &self.sentence
    }

    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.segments
    }
}
