use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::asr::{AsrCadence, AsrState, TickResult};
use crate::config::TranscriptionConfig;
use crate::finalize::FinalizationResult;
use crate::inference::InferenceEngines;
use crate::pipeline::audio_buffer::{AudioIngestBuffer, Cursor};
use crate::transcript::TranscriptAssembler;
use crate::vad::{VadCadence, VadState};

/// Transport-assigned session identifier. Reassigned when a client resumes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Mutable state of one recording.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    pub buffer: AudioIngestBuffer,
    pub vad: VadState,
    pub asr: AsrState,
    pub transcript: TranscriptAssembler,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, config: &TranscriptionConfig) -> Self {
        Self {
            id,
            buffer: AudioIngestBuffer::new(config.sample_rate),
            vad: VadState::default(),
            asr: AsrState::default(),
            transcript: TranscriptAssembler::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub(crate) fn rekey(&mut self, id: SessionId) {
        self.id = id;
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Length of the recording so far.
    pub fn duration_ms(&self) -> u64 {
        self.buffer.retained_duration_ms()
    }

    /// Appends audio and runs one VAD tick followed by one ASR tick.
    pub fn ingest(
        &mut self,
        bytes: &[u8],
        vad: &VadCadence,
        asr: &AsrCadence,
        engines: &InferenceEngines,
    ) -> Option<TickResult> {
        self.buffer.append(bytes);
        let edge = vad.tick(&mut self.vad, &mut self.buffer, &engines.vad);
        // one VAD window per arrival; frames longer than the window leave a backlog
        debug!(
            vad_backlog_ms = self.buffer.queued_ms(Cursor::Vad),
            asr_backlog_ms = self.buffer.queued_ms(Cursor::Asr),
            "Audio ingested"
        );
        asr.tick(self, engines, edge)
    }
}

/// Registry entry wrapping a session with its lock and finalization flag.
#[derive(Debug)]
pub struct SessionHandle {
    finalizing: AtomicBool,
    state: Mutex<Session>,
    result: OnceLock<Arc<FinalizationResult>>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            finalizing: AtomicBool::new(false),
            state: Mutex::new(session),
            result: OnceLock::new(),
        }
    }

    pub fn is_finalizing(&self) -> bool {
        self.finalizing.load(Ordering::Acquire)
    }

    /// Sets the finalizing flag. Returns `true` only for the caller that flipped it.
    pub fn begin_finalizing(&self) -> bool {
        !self.finalizing.swap(true, Ordering::AcqRel)
    }

    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.state.lock()
    }

    pub fn result(&self) -> Option<Arc<FinalizationResult>> {
        self.result.get().cloned()
    }

    pub(crate) fn set_result(&self, result: Arc<FinalizationResult>) {
        let _ = self.result.set(result);
    }
}
