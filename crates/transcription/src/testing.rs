//! Scripted inference engines for unit and integration tests.
//!
//! Audio used with these engines encodes text directly: every sample of a
//! [`tone`] carries one character code, and the recognizers read one character
//! per 600 ms block.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::correction::TextCorrector;
use crate::finalize::ProgressSink;
use crate::inference::{
    AccurateModel, ChunkParams, Engine, EngineCache, InferenceEngines, PunctuationModel,
    StreamingAsrModel, VadModel, VadSegment,
};

const SAMPLE_RATE: usize = 16000;
const BLOCK_SAMPLES: usize = SAMPLE_RATE * 600 / 1000;

/// `ms` milliseconds of PCM where every sample holds the code of `ch`.
pub fn tone(ch: char, ms: usize) -> Vec<u8> {
    let value = ch as u32 as i16;
    std::iter::repeat_n(value.to_le_bytes(), ms * SAMPLE_RATE / 1000)
        .flatten()
        .collect()
}

/// `ms` milliseconds of zeroed PCM.
pub fn silence(ms: usize) -> Vec<u8> {
    vec![0u8; ms * SAMPLE_RATE / 1000 * 2]
}

/// PCM spelling `text`, one 600 ms block per character.
pub fn spoken(text: &str) -> Vec<u8> {
    text.chars().flat_map(|c| tone(c, 600)).collect()
}

fn decode(sample: f32) -> Option<char> {
    let code = (sample * 32768.0).round() as i32;
    if code <= 0 {
        return None;
    }
    char::from_u32(code as u32)
}

fn read_blocks(samples: &[f32]) -> String {
    samples
        .chunks(BLOCK_SAMPLES)
        .filter_map(|block| block.first().copied().and_then(decode))
        .collect()
}

/// Streaming recognizer returning the character carried by the first sample of a window.
pub struct LetterAsr;

impl Engine for LetterAsr {
    fn name(&self) -> &str {
        "letter_asr"
    }
}

impl StreamingAsrModel for LetterAsr {
    fn infer(
        &mut self,
        samples: &[f32],
        cache: &mut EngineCache,
        _is_final: bool,
        _params: &ChunkParams,
    ) -> anyhow::Result<String> {
        let calls = cache.get::<usize>().copied().unwrap_or(0);
        cache.insert(calls + 1);
        Ok(samples
            .first()
            .copied()
            .and_then(decode)
            .map(String::from)
            .unwrap_or_default())
    }
}

/// [`LetterAsr`] that also logs every non-empty output in call order.
pub struct RecordingAsr {
    outputs: Arc<Mutex<Vec<String>>>,
}

impl RecordingAsr {
    pub fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
        let outputs = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                outputs: outputs.clone(),
            },
            outputs,
        )
    }
}

impl Engine for RecordingAsr {
    fn name(&self) -> &str {
        "recording_asr"
    }
}

impl StreamingAsrModel for RecordingAsr {
    fn infer(
        &mut self,
        samples: &[f32],
        cache: &mut EngineCache,
        is_final: bool,
        params: &ChunkParams,
    ) -> anyhow::Result<String> {
        let text = LetterAsr.infer(samples, cache, is_final, params)?;
        if !text.is_empty() {
            self.outputs.lock().push(text.clone());
        }
        Ok(text)
    }
}

/// Fails the first `n` calls (all calls for [`FailingAsr::always`]), then behaves like [`LetterAsr`].
pub struct FailingAsr {
    failures_left: usize,
}

impl FailingAsr {
    pub fn failing_first(n: usize) -> Self {
        Self { failures_left: n }
    }

    pub fn always() -> Self {
        Self {
            failures_left: usize::MAX,
        }
    }
}

impl Engine for FailingAsr {
    fn name(&self) -> &str {
        "failing_asr"
    }
}

impl StreamingAsrModel for FailingAsr {
    fn infer(
        &mut self,
        samples: &[f32],
        cache: &mut EngineCache,
        is_final: bool,
        params: &ChunkParams,
    ) -> anyhow::Result<String> {
        if self.failures_left > 0 {
            self.failures_left = self.failures_left.saturating_sub(1);
            anyhow::bail!("scripted streaming failure");
        }
        LetterAsr.infer(samples, cache, is_final, params)
    }
}

pub struct IdentityPunctuation;

impl Engine for IdentityPunctuation {
    fn name(&self) -> &str {
        "identity_punctuation"
    }
}

impl PunctuationModel for IdentityPunctuation {
    fn infer(&mut self, text: &str, _cache: &mut EngineCache) -> anyhow::Result<String> {
        Ok(text.to_string())
    }
}

/// Appends a full stop to every flush.
pub struct SuffixPunctuation;

impl Engine for SuffixPunctuation {
    fn name(&self) -> &str {
        "suffix_punctuation"
    }
}

impl PunctuationModel for SuffixPunctuation {
    fn infer(&mut self, text: &str, _cache: &mut EngineCache) -> anyhow::Result<String> {
        Ok(format!("{}.", text))
    }
}

pub struct FailingPunctuation;

impl Engine for FailingPunctuation {
    fn name(&self) -> &str {
        "failing_punctuation"
    }
}

impl PunctuationModel for FailingPunctuation {
    fn infer(&mut self, _text: &str, _cache: &mut EngineCache) -> anyhow::Result<String> {
        anyhow::bail!("scripted punctuation failure")
    }
}

/// VAD returning scripted pairs per streaming call, and a fixed list for one-shot calls.
pub struct ScriptedVad {
    streaming: VecDeque<Vec<(i64, i64)>>,
    offline: Vec<(i64, i64)>,
}

impl ScriptedVad {
    pub fn new(streaming: Vec<Vec<(i64, i64)>>) -> Self {
        Self {
            streaming: streaming.into(),
            offline: Vec::new(),
        }
    }

    /// Segments returned for final-mode calls over a whole recording.
    pub fn offline(mut self, segments: Vec<(i64, i64)>) -> Self {
        self.offline = segments;
        self
    }
}

fn to_segments(raw: &[(i64, i64)]) -> Vec<VadSegment> {
    raw.iter().map(|&(b, e)| VadSegment::from_raw(b, e)).collect()
}

impl Engine for ScriptedVad {
    fn name(&self) -> &str {
        "scripted_vad"
    }
}

impl VadModel for ScriptedVad {
    fn infer(
        &mut self,
        _samples: &[f32],
        _cache: &mut EngineCache,
        is_final: bool,
        _window_ms: u32,
    ) -> anyhow::Result<Vec<VadSegment>> {
        if is_final {
            return Ok(to_segments(&self.offline));
        }
        Ok(self
            .streaming
            .pop_front()
            .map(|raw| to_segments(&raw))
            .unwrap_or_default())
    }
}

/// VAD failing the first `n` calls, then returning `response` for every call.
pub struct FailingVad {
    failures_left: usize,
    response: Vec<(i64, i64)>,
}

impl FailingVad {
    pub fn failing_first(n: usize, response: Vec<(i64, i64)>) -> Self {
        Self {
            failures_left: n,
            response,
        }
    }

    pub fn always() -> Self {
        Self {
            failures_left: usize::MAX,
            response: Vec::new(),
        }
    }
}

impl Engine for FailingVad {
    fn name(&self) -> &str {
        "failing_vad"
    }
}

impl VadModel for FailingVad {
    fn infer(
        &mut self,
        _samples: &[f32],
        cache: &mut EngineCache,
        _is_final: bool,
        _window_ms: u32,
    ) -> anyhow::Result<Vec<VadSegment>> {
        if self.failures_left > 0 {
            self.failures_left = self.failures_left.saturating_sub(1);
            anyhow::bail!("scripted VAD failure");
        }
        anyhow::ensure!(cache.is_empty(), "retry must start from a fresh cache");
        Ok(to_segments(&self.response))
    }
}

/// Accurate recognizer reading 600 ms blocks and wrapping the text in the
/// markup a rich-transcription model emits.
#[derive(Default)]
pub struct TaggedAccurate {
    calls: Arc<AtomicUsize>,
}

impl TaggedAccurate {
    /// Returns the recognizer together with its call counter.
    pub fn counted() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl Engine for TaggedAccurate {
    fn name(&self) -> &str {
        "tagged_accurate"
    }
}

impl AccurateModel for TaggedAccurate {
    fn infer(&mut self, samples: &[f32]) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("<|en|><|NEUTRAL|><|Speech|>{} um 🎉", read_blocks(samples)))
    }
}

pub struct FailingAccurate;

impl Engine for FailingAccurate {
    fn name(&self) -> &str {
        "failing_accurate"
    }
}

impl AccurateModel for FailingAccurate {
    fn infer(&mut self, _samples: &[f32]) -> anyhow::Result<String> {
        anyhow::bail!("scripted accurate failure")
    }
}

pub struct PanickingAccurate;

impl Engine for PanickingAccurate {
    fn name(&self) -> &str {
        "panicking_accurate"
    }
}

impl AccurateModel for PanickingAccurate {
    fn infer(&mut self, _samples: &[f32]) -> anyhow::Result<String> {
        panic!("scripted accurate panic")
    }
}

pub fn engines(
    vad: impl VadModel + 'static,
    asr: impl StreamingAsrModel + 'static,
    punctuation: impl PunctuationModel + 'static,
    accurate: impl AccurateModel + 'static,
) -> InferenceEngines {
    InferenceEngines::new(
        Box::new(vad),
        Box::new(asr),
        Box::new(punctuation),
        Box::new(accurate),
    )
}

/// Silent VAD, letter ASR, identity punctuation, tagged accurate recognizer.
pub fn default_engines() -> InferenceEngines {
    engines(
        ScriptedVad::new(Vec::new()),
        LetterAsr,
        IdentityPunctuation,
        TaggedAccurate::default(),
    )
}

/// Progress sink that records every report.
#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<(u32, u32)>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<(u32, u32)> {
        self.reports.lock().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn report(&self, current: u32, total: u32) -> anyhow::Result<()> {
        self.reports.lock().push((current, total));
        Ok(())
    }
}

/// Progress sink whose every report fails.
pub struct BrokenSink;

impl ProgressSink for BrokenSink {
    fn report(&self, _current: u32, _total: u32) -> anyhow::Result<()> {
        anyhow::bail!("client gone")
    }
}

/// Corrector returning a fixed text.
pub struct FixedCorrector(pub String);

impl TextCorrector for FixedCorrector {
    fn name(&self) -> &str {
        "fixed"
    }

    fn correct(&self, _fast: &str, _accurate: &str, _hints: &[String]) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

pub struct FailingCorrector;

impl TextCorrector for FailingCorrector {
    fn name(&self) -> &str {
        "failing"
    }

    fn correct(&self, _fast: &str, _accurate: &str, _hints: &[String]) -> anyhow::Result<String> {
        anyhow::bail!("correction service timed out")
    }
}
