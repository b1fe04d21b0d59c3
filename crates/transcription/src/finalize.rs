use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::asr::AsrCadence;
use crate::backup::RecordingBackup;
use crate::config::TranscriptionConfig;
use crate::correction::{Hotwords, TextCorrector, correct_or_fallback};
use crate::inference::{EngineCache, EngineOutcome, InferenceEngines};
use crate::pipeline::audio_buffer::slice_ms;
use crate::postprocess::clean_transcript;
use crate::session::Session;
use crate::transcript::TranscriptSegment;
use crate::vad::{bounded_spans, drop_short, merge_spans};

/// Denominator of every progress report.
pub const PROGRESS_TOTAL: u32 = 100;

const AFTER_DRAIN: u32 = 10;
const AFTER_PUNCTUATION: u32 = 20;
const ACCURATE_SPAN: u32 = 70;
const AFTER_ACCURATE: u32 = 90;

/// Receives `(current, total)` progress while a session is finalized.
pub trait ProgressSink: Send + Sync {
    fn report(&self, current: u32, total: u32) -> anyhow::Result<()>;
}

/// Sink that discards every report.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _current: u32, _total: u32) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Terminal record of a finished session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalizationResult {
    /// Punctuated streaming transcript.
    pub fast_transcript: String,
    /// Cleaned output of the accurate recognizer.
    pub accurate_transcript: String,
    pub fast_length: usize,
    pub accurate_length: usize,
    /// Corrector output, or the fallback chosen when it is absent or failed.
    pub final_transcript: String,
    pub final_length: usize,
    /// Whether `final_transcript` came from the corrector.
    pub corrected: bool,
    /// Segments bounded by the finalize-time VAD pass. Authoritative for display.
    pub precise_segments: Vec<TranscriptSegment>,
    /// Coarse segments recorded while streaming.
    pub realtime_segments: Vec<TranscriptSegment>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Output of the VAD-segmented accurate pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccurateTranscript {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
}

/// Result of a one-shot file transcription.
#[derive(Debug, Clone, Serialize)]
pub struct FileTranscription {
    pub text: String,
    pub length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Vec<TranscriptSegment>>,
}

/// Sequences the stop-time stages: remainder drain, final punctuation,
/// segmented accurate re-transcription, clean-up, correction.
pub struct FinalizationPipeline {
    engines: Arc<InferenceEngines>,
    asr: AsrCadence,
    config: TranscriptionConfig,
    corrector: Option<Arc<dyn TextCorrector>>,
    hotwords: Arc<Hotwords>,
    backup: Option<RecordingBackup>,
}

impl FinalizationPipeline {
    pub fn new(engines: Arc<InferenceEngines>, config: TranscriptionConfig) -> Self {
        Self {
            asr: AsrCadence::new(&config),
            engines,
            config,
            corrector: None,
            hotwords: Arc::new(Hotwords::default()),
            backup: None,
        }
    }

    pub fn with_corrector(mut self, corrector: Arc<dyn TextCorrector>) -> Self {
        self.corrector = Some(corrector);
        self
    }

    pub fn with_hotwords(mut self, hotwords: Arc<Hotwords>) -> Self {
        self.hotwords = hotwords;
        self
    }

    pub fn with_backup(mut self, backup: RecordingBackup) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn engines(&self) -> &Arc<InferenceEngines> {
        &self.engines
    }

    pub fn config(&self) -> &TranscriptionConfig {
        &self.config
    }

    pub fn corrector_name(&self) -> Option<&str> {
        self.corrector.as_deref().map(|c| c.name())
    }

    /// Finalizes `session`. Never panics and never fails: errors degrade the
    /// returned result instead.
    pub fn run(&self, session: &mut Session, sink: &dyn ProgressSink) -> FinalizationResult {
        let started = Instant::now();
        let session_id = session.id().clone();
        info!(
            %session_id,
            started_at = %session.created_at(),
            duration_ms = session.duration_ms(),
            "Finalizing session"
        );

        let mut result = match panic::catch_unwind(AssertUnwindSafe(|| self.stages(session, sink))) {
            Ok(result) => result,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(%session_id, "Finalization panicked: {}", reason);
                let fast = session.transcript.full_text();
                FinalizationResult {
                    fast_length: fast.chars().count(),
                    final_length: fast.chars().count(),
                    final_transcript: fast.clone(),
                    fast_transcript: fast,
                    realtime_segments: session.transcript.segments().to_vec(),
                    duration_ms: session.duration_ms(),
                    error: Some(format!("finalization aborted: {}", reason)),
                    ..Default::default()
                }
            }
        };

        if let Some(ref backup) = self.backup
            && !session.buffer.retained().is_empty()
        {
            match backup.write(session_id.as_str(), session.buffer.retained()) {
                Ok(path) => result.backup_reference = Some(path.display().to_string()),
                Err(e) => warn!(%session_id, "Recording backup failed: {}", e),
            }
        }

        info!(
            %session_id,
            fast_len = result.fast_length,
            accurate_len = result.accurate_length,
            corrected = result.corrected,
            degraded = result.error.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Session finalized"
        );
        result
    }

    fn stages(&self, session: &mut Session, sink: &dyn ProgressSink) -> FinalizationResult {
        if let Err(e) = self.asr.flush_remainder(session, &self.engines) {
            warn!(session_id = %session.id(), "Final streaming pass skipped: {}", e);
        }
        report(sink, AFTER_DRAIN);

        self.asr.final_punctuation(session, &self.engines);
        report(sink, AFTER_PUNCTUATION);
        let fast = session.transcript.confirmed().to_string();

        let mut error = None;
        let samples = session.buffer.retained();
        let accurate = if samples.is_empty() {
            debug!(session_id = %session.id(), "Empty recording, accurate pass skipped");
            AccurateTranscript::default()
        } else {
            let mut on_segment = |done: usize, total: usize| {
                let share = (ACCURATE_SPAN as usize * done / total.max(1)) as u32;
                report(sink, AFTER_PUNCTUATION + share);
            };
            match self.transcribe_segmented(samples, &mut on_segment) {
                Ok(accurate) => accurate,
                Err(e) => {
                    warn!(session_id = %session.id(), "Accurate pass failed: {}", e);
                    error = Some(format!("accurate transcription failed: {}", e));
                    AccurateTranscript::default()
                }
            }
        };
        report(sink, AFTER_ACCURATE);

        let hints = self.hotwords.snapshot();
        let (final_transcript, corrected) =
            correct_or_fallback(self.corrector.as_deref(), &fast, &accurate.text, &hints);
        report(sink, PROGRESS_TOTAL);

        FinalizationResult {
            fast_length: fast.chars().count(),
            accurate_length: accurate.text.chars().count(),
            final_length: final_transcript.chars().count(),
            fast_transcript: fast,
            accurate_transcript: accurate.text,
            final_transcript,
            corrected,
            precise_segments: accurate.segments,
            realtime_segments: session.transcript.segments().to_vec(),
            duration_ms: session.duration_ms(),
            backup_reference: None,
            error,
        }
    }

    /// VAD-segments `samples` and runs the accurate recognizer on each merged span.
    ///
    /// `on_segment(done, total)` is called after every span. With no speech
    /// spans the whole buffer is recognized once as a single segment.
    pub fn transcribe_segmented(
        &self,
        samples: &[f32],
        on_segment: &mut dyn FnMut(usize, usize),
    ) -> anyhow::Result<AccurateTranscript> {
        let sample_rate = self.config.sample_rate;
        let duration_ms = self.config.samples_to_ms(samples.len());

        let mut cache = EngineCache::new();
        let window_ms = self.config.vad_window_ms;
        let outcome = self
            .engines
            .vad
            .infer(samples, &mut cache, true, window_ms)
            .or_retry(|| {
                cache.reset();
                self.engines.vad.infer(samples, &mut cache, true, window_ms)
            });
        let raw = match outcome {
            EngineOutcome::Ok(raw) => raw,
            EngineOutcome::Retry(e) | EngineOutcome::Degrade(e) => {
                return Err(e.context("VAD segmentation failed"));
            }
        };

        let spans = drop_short(
            merge_spans(&bounded_spans(&raw), self.config.merge_min_segment_ms),
            self.config.min_segment_ms,
        );
        debug!(raw = raw.len(), merged = spans.len(), "Speech spans for accurate pass");

        if spans.is_empty() {
            let text = self.transcribe_whole(samples)?;
            on_segment(1, 1);
            let segments = vec![TranscriptSegment {
                text: text.clone(),
                start_ms: 0,
                end_ms: duration_ms,
            }];
            return Ok(AccurateTranscript { text, segments });
        }

        let total = spans.len();
        let mut transcript = AccurateTranscript::default();
        let mut failures = 0;
        let mut last_error = None;
        for (i, span) in spans.iter().enumerate() {
            let slice = slice_ms(samples, sample_rate, span.start_ms, span.end_ms);
            match self.recognize(slice) {
                Ok(raw) => {
                    let text = clean_transcript(&raw);
                    if !text.is_empty() {
                        push_joined(&mut transcript.text, &text);
                        transcript.segments.push(TranscriptSegment {
                            text,
                            start_ms: span.start_ms,
                            end_ms: span.end_ms,
                        });
                    }
                }
                Err(e) => {
                    warn!(
                        start_ms = span.start_ms,
                        end_ms = span.end_ms,
                        "Accurate recognition skipped for segment: {}",
                        e
                    );
                    failures += 1;
                    last_error = Some(e);
                }
            }
            on_segment(i + 1, total);
        }

        if failures == total
            && let Some(e) = last_error
        {
            return Err(e.context("accurate recognizer failed on every segment"));
        }
        Ok(transcript)
    }

    /// One accurate-recognizer call over the whole buffer, cleaned.
    pub fn transcribe_whole(&self, samples: &[f32]) -> anyhow::Result<String> {
        Ok(clean_transcript(&self.recognize(samples)?))
    }

    /// One-shot transcription of an uploaded file.
    pub fn transcribe_file(&self, samples: &[f32], timestamps: bool) -> anyhow::Result<FileTranscription> {
        if timestamps {
            let accurate = self.transcribe_segmented(samples, &mut |_, _| {})?;
            Ok(FileTranscription {
                length: accurate.text.chars().count(),
                text: accurate.text,
                timestamps: Some(accurate.segments),
            })
        } else {
            let text = self.transcribe_whole(samples)?;
            Ok(FileTranscription {
                length: text.chars().count(),
                text,
                timestamps: None,
            })
        }
    }

    fn recognize(&self, samples: &[f32]) -> anyhow::Result<String> {
        let accurate = &self.engines.accurate;
        match accurate.infer(samples).or_retry(|| accurate.infer(samples)) {
            EngineOutcome::Ok(text) => Ok(text),
            EngineOutcome::Retry(e) | EngineOutcome::Degrade(e) => Err(e),
        }
    }
}

fn report(sink: &dyn ProgressSink, current: u32) {
    if let Err(e) = sink.report(current, PROGRESS_TOTAL) {
        debug!(current, "Progress report dropped: {}", e);
    }
}

/// Appends a segment's text, separating with a space only between
/// space-delimited scripts.
fn push_joined(out: &mut String, piece: &str) {
    let needs_space = matches!(
        (out.chars().last(), piece.chars().next()),
        (Some(prev), Some(next)) if prev.is_ascii_graphic() && next.is_ascii_alphanumeric()
    );
    if needs_space {
        out.push(' ');
    }
    out.push_str(piece);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::session::SessionId;
    use crate::testing::{
        self, BrokenSink, FailingAccurate, FailingCorrector, FailingVad, FixedCorrector,
        IdentityPunctuation, LetterAsr, PanickingAccurate, RecordingSink, ScriptedVad,
        TaggedAccurate, silence, tone,
    };
    use crate::vad::VadCadence;

    fn record(text: &str, config: &TranscriptionConfig, engines: &InferenceEngines) -> Session {
        let vad = VadCadence::new(config);
        let asr = AsrCadence::new(config);
        let mut session = Session::new(SessionId::from("fin"), config);
        for ch in text.chars() {
            session.ingest(&tone(ch, 600), &vad, &asr, engines);
        }
        session
    }

    fn pipeline(engines: InferenceEngines, config: &TranscriptionConfig) -> (FinalizationPipeline, Arc<InferenceEngines>) {
        let engines = Arc::new(engines);
        (FinalizationPipeline::new(engines.clone(), config.clone()), engines)
    }

    #[test]
    fn test_full_run_with_segmented_accurate_pass() {
        let config = TranscriptionConfig::default();
        let (pipeline, engines) = pipeline(
            testing::engines(
                ScriptedVad::new(vec![]).offline(vec![(0, 1800)]),
                LetterAsr,
                IdentityPunctuation,
                TaggedAccurate::default(),
            ),
            &config,
        );
        let mut session = record("abc", &config, &engines);
        let sink = RecordingSink::default();

        let result = pipeline.run(&mut session, &sink);
        assert_eq!(result.fast_transcript, "abc");
        assert_eq!(result.accurate_transcript, "abc");
        assert_eq!(result.final_transcript, "abc");
        assert!(!result.corrected);
        assert_eq!(result.fast_length, 3);
        assert_eq!(result.duration_ms, 1800);
        assert!(result.error.is_none());
        assert_eq!(
            result.precise_segments,
            vec![TranscriptSegment {
                text: "abc".to_string(),
                start_ms: 0,
                end_ms: 1800
            }]
        );

        let percents: Vec<u32> = sink.reports().iter().map(|(c, _)| *c).collect();
        assert_eq!(percents, vec![10, 20, 90, 90, 100]);
        assert!(sink.reports().iter().all(|(_, t)| *t == PROGRESS_TOTAL));
    }

    #[test]
    fn test_progress_is_proportional_across_segments() {
        let config = TranscriptionConfig {
            merge_min_segment_ms: 600,
            min_segment_ms: 600,
            ..Default::default()
        };
        let (pipeline, engines) = pipeline(
            testing::engines(
                ScriptedVad::new(vec![]).offline(vec![(0, 600), (600, 1200), (1200, 1800), (1800, 2400)]),
                LetterAsr,
                IdentityPunctuation,
                TaggedAccurate::default(),
            ),
            &config,
        );
        let mut session = record("wxyz", &config, &engines);
        let sink = RecordingSink::default();

        let result = pipeline.run(&mut session, &sink);
        assert_eq!(result.accurate_transcript, "w x y z");
        assert_eq!(result.precise_segments.len(), 4);
        assert_eq!(result.precise_segments[2].start_ms, 1200);

        let percents: Vec<u32> = sink.reports().iter().map(|(c, _)| *c).collect();
        assert_eq!(percents, vec![10, 20, 37, 55, 72, 90, 90, 100]);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_no_speech_spans_falls_back_to_whole_recording() {
        let config = TranscriptionConfig::default();
        let (accurate, calls) = TaggedAccurate::counted();
        let (pipeline, engines) = pipeline(
            testing::engines(ScriptedVad::new(vec![]), LetterAsr, IdentityPunctuation, accurate),
            &config,
        );
        let mut session = record("hi", &config, &engines);

        let result = pipeline.run(&mut session, &NoProgress);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.accurate_transcript, "hi");
        assert_eq!(result.precise_segments.len(), 1);
        assert_eq!(result.precise_segments[0].start_ms, 0);
        assert_eq!(result.precise_segments[0].end_ms, 1200);
    }

    #[test]
    fn test_silent_recording_still_gets_whole_duration_segment() {
        let config = TranscriptionConfig::default();
        let (pipeline, engines) = pipeline(testing::default_engines(), &config);
        let vad = VadCadence::new(&config);
        let asr = AsrCadence::new(&config);
        let mut session = Session::new(SessionId::from("quiet"), &config);
        session.ingest(&silence(1200), &vad, &asr, &engines);

        let result = pipeline.run(&mut session, &NoProgress);
        assert_eq!(result.accurate_transcript, "");
        assert_eq!(
            result.precise_segments,
            vec![TranscriptSegment {
                text: String::new(),
                start_ms: 0,
                end_ms: 1200
            }]
        );
    }

    #[test]
    fn test_vad_failure_keeps_fast_transcript() {
        let config = TranscriptionConfig::default();
        let (pipeline, engines) = pipeline(
            testing::engines(FailingVad::always(), LetterAsr, IdentityPunctuation, TaggedAccurate::default()),
            &config,
        );
        let mut session = record("ok", &config, &engines);

        let result = pipeline.run(&mut session, &NoProgress);
        assert_eq!(result.fast_transcript, "ok");
        assert_eq!(result.accurate_transcript, "");
        assert_eq!(result.final_transcript, "ok");
        assert!(result.error.unwrap().contains("accurate transcription failed"));
    }

    #[test]
    fn test_accurate_failure_on_every_segment_is_an_error() {
        let config = TranscriptionConfig::default();
        let (pipeline, engines) = pipeline(
            testing::engines(
                ScriptedVad::new(vec![]).offline(vec![(0, 1200)]),
                LetterAsr,
                IdentityPunctuation,
                FailingAccurate,
            ),
            &config,
        );
        let mut session = record("no", &config, &engines);

        let result = pipeline.run(&mut session, &NoProgress);
        assert_eq!(result.fast_transcript, "no");
        assert!(result.accurate_transcript.is_empty());
        assert!(result.error.is_some());
    }

    #[test]
    fn test_panic_is_caught_at_pipeline_boundary() {
        let config = TranscriptionConfig::default();
        let (pipeline, engines) = pipeline(
            testing::engines(ScriptedVad::new(vec![]), LetterAsr, IdentityPunctuation, PanickingAccurate),
            &config,
        );
        let mut session = record("pa", &config, &engines);

        let result = pipeline.run(&mut session, &NoProgress);
        assert_eq!(result.fast_transcript, "pa");
        assert!(result.accurate_transcript.is_empty());
        assert!(result.error.unwrap().contains("scripted accurate panic"));
    }

    #[test]
    fn test_corrector_output_becomes_final_text() {
        let config = TranscriptionConfig::default();
        let (pipeline, engines) = pipeline(testing::default_engines(), &config);
        let pipeline = pipeline.with_corrector(Arc::new(FixedCorrector("merged".to_string())));
        let mut session = record("ab", &config, &engines);

        let result = pipeline.run(&mut session, &NoProgress);
        assert_eq!(result.final_transcript, "merged");
        assert!(result.corrected);
        assert_eq!(result.accurate_transcript, "ab");
    }

    #[test]
    fn test_failing_corrector_falls_back_to_accurate() {
        let config = TranscriptionConfig::default();
        let (pipeline, engines) = pipeline(testing::default_engines(), &config);
        let pipeline = pipeline.with_corrector(Arc::new(FailingCorrector));
        let mut session = record("cd", &config, &engines);

        let result = pipeline.run(&mut session, &BrokenSink);
        assert_eq!(result.final_transcript, "cd");
        assert!(!result.corrected);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_empty_recording_skips_accurate_pass() {
        let config = TranscriptionConfig::default();
        let (accurate, calls) = TaggedAccurate::counted();
        let (pipeline, _engines) = pipeline(
            testing::engines(ScriptedVad::new(vec![]), LetterAsr, IdentityPunctuation, accurate),
            &config,
        );
        let mut session = Session::new(SessionId::from("empty"), &config);

        let result = pipeline.run(&mut session, &NoProgress);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(result.fast_transcript.is_empty());
        assert!(result.error.is_none());
        assert_eq!(result.duration_ms, 0);
    }

    #[test]
    fn test_backup_reference_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let config = TranscriptionConfig::default();
        let (pipeline, engines) = pipeline(testing::default_engines(), &config);
        let pipeline = pipeline.with_backup(RecordingBackup::new(dir.path(), 16000).unwrap());
        let mut session = record("b", &config, &engines);

        let result = pipeline.run(&mut session, &NoProgress);
        let path = result.backup_reference.unwrap();
        assert!(path.ends_with(".wav"));
        assert!(std::path::Path::new(&path).exists());
    }

    #[test]
    fn test_transcribe_file_modes() {
        let config = TranscriptionConfig::default();
        let (pipeline, _engines) = pipeline(
            testing::engines(
                ScriptedVad::new(vec![]).offline(vec![(0, 1200)]),
                LetterAsr,
                IdentityPunctuation,
                TaggedAccurate::default(),
            ),
            &config,
        );
        let samples = crate::pipeline::audio_buffer::pcm16le_to_f32(&testing::spoken("go"));

        let plain = pipeline.transcribe_file(&samples, false).unwrap();
        assert_eq!(plain.text, "go");
        assert_eq!(plain.length, 2);
        assert!(plain.timestamps.is_none());

        let stamped = pipeline.transcribe_file(&samples, true).unwrap();
        assert_eq!(stamped.timestamps.unwrap()[0].end_ms, 1200);
    }

    #[test]
    fn test_push_joined() {
        let mut out = String::new();
        push_joined(&mut out, "Hello.");
        push_joined(&mut out, "World");
        push_joined(&mut out, "你好");
        push_joined(&mut out, "世界");
        assert_eq!(out, "Hello. World你好世界");
    }
}
