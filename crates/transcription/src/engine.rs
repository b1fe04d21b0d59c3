use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, debug_span, info, warn};

use crate::asr::{AsrCadence, TickResult};
use crate::config::TranscriptionConfig;
use crate::error::TranscriptionError;
use crate::finalize::{FileTranscription, FinalizationPipeline, FinalizationResult, ProgressSink};
use crate::inference::InferenceEngines;
use crate::session::{Session, SessionHandle, SessionId};
use crate::vad::VadCadence;

/// Outcome of a stop request.
#[derive(Debug, Clone)]
pub enum StopOutcome {
    /// This call ran the finalization pipeline.
    Finalized(Arc<FinalizationResult>),
    /// Another call is finalizing the session right now.
    AlreadyFinalizing,
    /// The session was already finalized; this is its result.
    Cached(Arc<FinalizationResult>),
}

/// First half of a stop, see [`TranscriptionEngine::begin_stop`].
#[derive(Debug)]
pub enum StopClaim {
    /// This caller flipped the finalizing flag and must call `finish_stop`.
    Claimed(PendingStop),
    /// Nothing left to run for this caller.
    Settled(StopOutcome),
}

/// A session whose finalizing flag is set but whose pipeline has not run yet.
#[derive(Debug)]
pub struct PendingStop {
    id: SessionId,
    handle: Arc<SessionHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// Moved to the holding registry; resumable for the grace period.
    Held,
    /// Already finalizing, dropped.
    Discarded,
    /// No active session under this id.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    Resumed { text: String, duration_ms: u64 },
    /// Never held, already reaped, or past the grace period.
    NotFound,
    /// The new id already owns an active session. The held entry is kept.
    Conflict,
}

struct HeldSession {
    handle: Arc<SessionHandle>,
    disconnected_at: Instant,
}

struct FinishedSession {
    result: Arc<FinalizationResult>,
    finished_at: Instant,
}

/// Process-wide session registry.
///
/// The engine is created once at startup and shared via `Arc`. Registry maps
/// are only used to look up and clone session handles; no map guard is ever
/// held while a session or engine lock is taken.
pub struct TranscriptionEngine {
    pipeline: FinalizationPipeline,
    vad: VadCadence,
    asr: AsrCadence,
    config: TranscriptionConfig,
    /// Sessions accepting audio, keyed by transport id.
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    /// Disconnected sessions awaiting resume.
    held: DashMap<SessionId, HeldSession>,
    /// Recently finalized results, kept so a repeated stop is answered from cache.
    finished: DashMap<SessionId, FinishedSession>,
}

impl TranscriptionEngine {
    pub fn new(pipeline: FinalizationPipeline) -> Arc<Self> {
        let config = pipeline.config().clone();
        let engine_names: Vec<String> = pipeline
            .engines()
            .descriptors()
            .into_iter()
            .map(|d| format!("{}={}", d.role, d.name))
            .collect();
        info!(
            ?engine_names,
            corrector = pipeline.corrector_name().unwrap_or("none"),
            grace_period_secs = config.grace_period_secs,
            "Transcription engine created"
        );

        Arc::new(Self {
            vad: VadCadence::new(&config),
            asr: AsrCadence::new(&config),
            pipeline,
            config,
            sessions: DashMap::new(),
            held: DashMap::new(),
            finished: DashMap::new(),
        })
    }

    pub fn engines(&self) -> &Arc<InferenceEngines> {
        self.pipeline.engines()
    }

    pub fn pipeline(&self) -> &FinalizationPipeline {
        &self.pipeline
    }

    pub fn config(&self) -> &TranscriptionConfig {
        &self.config
    }

    /// Registers a new recording under `id`.
    pub fn start(&self, id: &SessionId) -> Result<(), TranscriptionError> {
        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => Err(TranscriptionError::SessionExists(id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(SessionHandle::new(Session::new(id.clone(), &self.config))));
                info!(session_id = %id, "Recording started");
                Ok(())
            }
        }
    }

    /// Feeds PCM bytes to a session and runs one VAD and one ASR tick.
    ///
    /// Audio for a session that is finalizing is ignored (`Ok(None)`).
    pub fn audio(&self, id: &SessionId, bytes: &[u8]) -> Result<Option<TickResult>, TranscriptionError> {
        let handle = self.active(id)?;
        if handle.is_finalizing() {
            return Ok(None);
        }
        let _span = debug_span!("session", session_id = %id).entered();
        let mut session = handle.lock();
        // stop may have won the race while this call waited for the lock
        if handle.is_finalizing() {
            return Ok(None);
        }
        Ok(session.ingest(bytes, &self.vad, &self.asr, self.engines()))
    }

    /// Stops a session and runs the finalization pipeline exactly once.
    pub fn stop(&self, id: &SessionId, sink: &dyn ProgressSink) -> Result<StopOutcome, TranscriptionError> {
        match self.begin_stop(id)? {
            StopClaim::Claimed(pending) => Ok(StopOutcome::Finalized(self.finish_stop(pending, sink))),
            StopClaim::Settled(outcome) => Ok(outcome),
        }
    }

    /// Ends audio acceptance for `id` without running the pipeline.
    ///
    /// Only flips the finalizing flag, so it is cheap enough to call from the
    /// transport's read loop. A disconnect observed after this returns is
    /// discarded instead of held.
    pub fn begin_stop(&self, id: &SessionId) -> Result<StopClaim, TranscriptionError> {
        let handle = match self.active(id) {
            Ok(handle) => handle,
            Err(e) => {
                return match self.finished_result(id) {
                    Some(result) => Ok(StopClaim::Settled(StopOutcome::Cached(result))),
                    None => Err(e),
                };
            }
        };

        if !handle.begin_finalizing() {
            debug!(session_id = %id, "Stop requested while already finalizing");
            return Ok(StopClaim::Settled(match handle.result() {
                Some(result) => StopOutcome::Cached(result),
                None => StopOutcome::AlreadyFinalizing,
            }));
        }
        info!(session_id = %id, "Recording stopped");
        Ok(StopClaim::Claimed(PendingStop { id: id.clone(), handle }))
    }

    /// Runs the finalization pipeline for a claimed stop and caches the result.
    pub fn finish_stop(&self, pending: PendingStop, sink: &dyn ProgressSink) -> Arc<FinalizationResult> {
        let PendingStop { id, handle } = pending;
        let result = {
            let mut session = handle.lock();
            Arc::new(self.pipeline.run(&mut session, sink))
        };
        handle.set_result(result.clone());
        self.finished.insert(
            id.clone(),
            FinishedSession {
                result: result.clone(),
                finished_at: Instant::now(),
            },
        );
        self.sessions.remove_if(&id, |_, current| Arc::ptr_eq(current, &handle));
        result
    }

    pub fn disconnect(&self, id: &SessionId) -> DisconnectOutcome {
        self.disconnect_at(id, Instant::now())
    }

    /// Removes a session from the active registry, holding it for resume
    /// unless it is already finalizing.
    pub fn disconnect_at(&self, id: &SessionId, now: Instant) -> DisconnectOutcome {
        let Some((_, handle)) = self.sessions.remove(id) else {
            return DisconnectOutcome::Unknown;
        };
        if handle.is_finalizing() {
            debug!(session_id = %id, "Disconnected while finalizing, not held");
            return DisconnectOutcome::Discarded;
        }
        self.held.insert(
            id.clone(),
            HeldSession {
                handle,
                disconnected_at: now,
            },
        );
        info!(session_id = %id, grace_period_secs = self.config.grace_period_secs, "Session held for resume");
        DisconnectOutcome::Held
    }

    pub fn resume(&self, original: &SessionId, new_id: &SessionId) -> ResumeOutcome {
        self.resume_at(original, new_id, Instant::now())
    }

    /// Moves a held session back into the active registry under `new_id`.
    pub fn resume_at(&self, original: &SessionId, new_id: &SessionId, now: Instant) -> ResumeOutcome {
        let Some((_, held)) = self.held.remove(original) else {
            info!(original = %original, "Resume failed: session not held");
            return ResumeOutcome::NotFound;
        };
        if self.expired(held.disconnected_at, now) || held.handle.is_finalizing() {
            info!(original = %original, "Resume failed: grace period elapsed");
            return ResumeOutcome::NotFound;
        }

        let inserted = match self.sessions.entry(new_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(held.handle.clone());
                true
            }
        };
        if !inserted {
            warn!(original = %original, new_id = %new_id, "Resume conflict: id already active");
            self.held.insert(original.clone(), held);
            return ResumeOutcome::Conflict;
        }

        let mut session = held.handle.lock();
        session.rekey(new_id.clone());
        let text = session.transcript.full_text();
        let duration_ms = session.duration_ms();
        info!(original = %original, new_id = %new_id, duration_ms, "Session resumed");
        ResumeOutcome::Resumed { text, duration_ms }
    }

    pub fn reap_expired(&self) -> usize {
        self.reap_expired_at(Instant::now())
    }

    /// Evicts held sessions and cached results older than the grace period.
    /// Returns the number of held sessions dropped.
    pub fn reap_expired_at(&self, now: Instant) -> usize {
        let mut reaped = 0;
        self.held.retain(|id, held| {
            let keep = !self.expired(held.disconnected_at, now);
            if !keep {
                info!(session_id = %id, "Held session expired");
                reaped += 1;
            }
            keep
        });
        self.finished
            .retain(|_, done| !self.expired(done.finished_at, now));
        reaped
    }

    /// One-shot transcription of already-decoded 16 kHz mono samples.
    pub fn transcribe_file(&self, samples: &[f32], timestamps: bool) -> anyhow::Result<FileTranscription> {
        self.pipeline.transcribe_file(samples, timestamps)
    }

    /// Result of a recently finalized session, kept until the reaper evicts it.
    pub fn finished_result(&self, id: &SessionId) -> Option<Arc<FinalizationResult>> {
        self.finished.get(id).map(|done| done.result.clone())
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    fn active(&self, id: &SessionId) -> Result<Arc<SessionHandle>, TranscriptionError> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TranscriptionError::UnknownSession(id.clone()))
    }

    fn expired(&self, since: Instant, now: Instant) -> bool {
        now.saturating_duration_since(since) > self.grace_period()
    }

    fn grace_period(&self) -> Duration {
        self.config.grace_period()
    }
}
