use serde::Serialize;
use tracing::{debug, warn};

use crate::config::TranscriptionConfig;
use crate::inference::{ChunkParams, EngineCache, EngineOutcome, InferenceEngines, Locked, PunctuationModel};
use crate::pipeline::audio_buffer::Cursor;
use crate::session::Session;
use crate::transcript::TranscriptSegment;
use crate::vad::VadEdge;

/// Per-session streaming recognizer state.
#[derive(Debug, Default)]
pub struct AsrState {
    pub cache: EngineCache,
    pub punctuation_cache: EngineCache,
    pub processed_ms: u64,
}

/// What one audio arrival produced, forwarded to the client as a `transcription` event.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickResult {
    /// Raw text recognized during this tick.
    pub text: String,
    /// Punctuated text flushed during this tick (empty when nothing was flushed).
    pub punctuated: String,
    /// Confirmed plus pending text so far.
    pub full_text: String,
    /// Raw text of the running utterance.
    pub sentence: String,
    pub vad_edge: Option<VadEdge>,
    pub speech_active: bool,
    pub segment: Option<TranscriptSegment>,
    pub processed_ms: u64,
}

/// Drives the streaming recognizer over fixed windows of the ASR cursor and
/// decides when pending text is flushed through the punctuator.
#[derive(Debug, Clone)]
pub struct AsrCadence {
    window_ms: u32,
    window_samples: usize,
    final_min_samples: usize,
    punctuation_threshold: usize,
    sample_rate: u32,
    params: ChunkParams,
}

impl AsrCadence {
    pub fn new(config: &TranscriptionConfig) -> Self {
        Self {
            window_ms: config.asr_chunk_ms,
            window_samples: config.ms_to_samples(config.asr_chunk_ms as u64),
            final_min_samples: config.ms_to_samples(config.final_min_remainder_ms as u64),
            punctuation_threshold: config.punctuation_threshold,
            sample_rate: config.sample_rate,
            params: ChunkParams::from(config),
        }
    }

    /// Consumes at most one window.
    ///
    /// Returns `None` only when nothing happened: no window was available (or
    /// recognition degraded) and no VAD edge needs surfacing.
    pub fn tick(
        &self,
        session: &mut Session,
        engines: &InferenceEngines,
        vad_edge: Option<VadEdge>,
    ) -> Option<TickResult> {
        if session.buffer.len(Cursor::Asr) < self.window_samples {
            return vad_edge.map(|edge| Self::edge_only(session, edge));
        }
        let Ok(window) = session.buffer.drain(Cursor::Asr, self.window_samples) else {
            return vad_edge.map(|edge| Self::edge_only(session, edge));
        };
        session.asr.processed_ms += self.window_ms as u64;

        let text = match self.recognize(session, engines, &window, false) {
            Some(text) => text,
            None => return vad_edge.map(|edge| Self::edge_only(session, edge)),
        };
        session.transcript.push_recognized(&text);

        let end_of_sentence = vad_edge == Some(VadEdge::End);
        let sentence = session.transcript.sentence().to_string();
        let mut punctuated = String::new();
        let mut segment = None;
        if end_of_sentence || session.transcript.pending_chars() >= self.punctuation_threshold {
            if session.transcript.has_pending() {
                let pending = session.transcript.take_pending();
                punctuated = punctuate(&engines.punctuation, &mut session.asr.punctuation_cache, &pending);
                segment = Some(
                    session
                        .transcript
                        .confirm(&punctuated, session.asr.processed_ms),
                );
            }
            if end_of_sentence {
                session.transcript.end_sentence();
            }
        }

        Some(TickResult {
            text,
            punctuated,
            full_text: session.transcript.full_text(),
            sentence,
            vad_edge,
            speech_active: session.vad.activity.is_active(),
            segment,
            processed_ms: session.asr.processed_ms,
        })
    }

    /// Runs whatever is left on the ASR cursor through the recognizer in final
    /// mode. Remainders shorter than the configured minimum are discarded.
    pub fn flush_remainder(&self, session: &mut Session, engines: &InferenceEngines) -> anyhow::Result<()> {
        let remainder = session.buffer.drain_all(Cursor::Asr);
        if remainder.len() < self.final_min_samples {
            debug!(samples = remainder.len(), "ASR remainder below final minimum, skipped");
            return Ok(());
        }
        session.asr.processed_ms += remainder.len() as u64 * 1000 / self.sample_rate as u64;
        match self.recognize(session, engines, &remainder, true) {
            Some(text) => {
                session.transcript.push_recognized(&text);
                Ok(())
            }
            None => anyhow::bail!("final streaming pass failed"),
        }
    }

    /// Punctuates any pending text and confirms it.
    pub fn final_punctuation(
        &self,
        session: &mut Session,
        engines: &InferenceEngines,
    ) -> Option<TranscriptSegment> {
        if !session.transcript.has_pending() {
            return None;
        }
        let pending = session.transcript.take_pending();
        let punctuated = punctuate(&engines.punctuation, &mut session.asr.punctuation_cache, &pending);
        let end_ms = session.asr.processed_ms;
        Some(session.transcript.confirm(&punctuated, end_ms))
    }

    fn recognize(
        &self,
        session: &mut Session,
        engines: &InferenceEngines,
        samples: &[f32],
        is_final: bool,
    ) -> Option<String> {
        let cache = &mut session.asr.cache;
        let outcome = engines
            .asr
            .infer(samples, cache, is_final, &self.params)
            .or_retry(|| {
                cache.reset();
                engines.asr.infer(samples, cache, is_final, &self.params)
            });
        match outcome {
            EngineOutcome::Ok(text) => Some(text),
            EngineOutcome::Retry(e) | EngineOutcome::Degrade(e) => {
                warn!(
                    engine = engines.asr.name(),
                    is_final,
                    processed_ms = session.asr.processed_ms,
                    "Streaming recognition skipped: {}",
                    e
                );
                session.asr.cache.reset();
                None
            }
        }
    }

    fn edge_only(session: &Session, edge: VadEdge) -> TickResult {
        TickResult {
            full_text: session.transcript.full_text(),
            sentence: session.transcript.sentence().to_string(),
            vad_edge: Some(edge),
            speech_active: session.vad.activity.is_active(),
            processed_ms: session.asr.processed_ms,
            ..Default::default()
        }
    }
}

/// Punctuates `text`, retrying once with a fresh cache. A degraded call
/// returns the text unchanged so nothing recognized is lost.
pub fn punctuate(engine: &Locked<dyn PunctuationModel>, cache: &mut EngineCache, text: &str) -> String {
    let outcome = engine.infer(text, cache).or_retry(|| {
        cache.reset();
        engine.infer(text, cache)
    });
    match outcome {
        EngineOutcome::Ok(punctuated) => punctuated,
        EngineOutcome::Retry(e) | EngineOutcome::Degrade(e) => {
            warn!(engine = engine.name(), chars = text.chars().count(), "Punctuation skipped: {}", e);
            cache.reset();
            text.to_string()
        }
    }
}
