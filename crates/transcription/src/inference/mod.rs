//! Contracts for the four inference engines and the wrappers that serialize
//! access to them.
//!
//! Each engine is a single process-wide instance that is not reentrant. It is
//! wrapped in [`Locked`], which owns the engine behind its own mutex and turns
//! raw `anyhow` failures into an [`EngineOutcome`] the cadence drivers can act
//! on without unwinding.

pub mod remote;

#[cfg(feature = "local-whisper")]
pub mod local_whisper;

use std::any::Any;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::TranscriptionConfig;

/// Opaque, engine-specific incremental state owned by a session.
///
/// An empty cache means "start a fresh stream"; engines populate it on their
/// first call.
#[derive(Default)]
pub struct EngineCache(Option<Box<dyn Any + Send>>);

impl EngineCache {
    pub fn new() -> Self {
        Self(None)
    }

    pub fn reset(&mut self) {
        self.0 = None;
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.0.as_mut().and_then(|v| v.downcast_mut::<T>())
    }

    pub fn insert<T: Any + Send>(&mut self, value: T) {
        self.0 = Some(Box::new(value));
    }
}

impl std::fmt::Debug for EngineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EngineCache")
            .field(&if self.0.is_some() { "populated" } else { "empty" })
            .finish()
    }
}

/// One `(beg, end)` pair reported by the VAD engine, in milliseconds.
/// `None` stands for the engine's "not yet known" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VadSegment {
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
}

impl VadSegment {
    /// Builds a segment from raw engine values where any negative number is the sentinel.
    pub fn from_raw(beg: i64, end: i64) -> Self {
        Self {
            start_ms: u64::try_from(beg).ok(),
            end_ms: u64::try_from(end).ok(),
        }
    }

    pub fn bounded(start_ms: u64, end_ms: u64) -> Self {
        Self {
            start_ms: Some(start_ms),
            end_ms: Some(end_ms),
        }
    }
}

/// Chunking parameters handed to the streaming recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkParams {
    pub chunk_size: [u32; 3],
    pub encoder_chunk_look_back: u32,
    pub decoder_chunk_look_back: u32,
}

impl From<&TranscriptionConfig> for ChunkParams {
    fn from(config: &TranscriptionConfig) -> Self {
        Self {
            chunk_size: config.asr_chunk_size,
            encoder_chunk_look_back: config.encoder_chunk_look_back,
            decoder_chunk_look_back: config.decoder_chunk_look_back,
        }
    }
}

/// Common surface of every engine.
pub trait Engine: Send {
    /// Human-readable engine name.
    fn name(&self) -> &str;
}

/// Voice-activity detector.
pub trait VadModel: Engine {
    fn infer(
        &mut self,
        samples: &[f32],
        cache: &mut EngineCache,
        is_final: bool,
        window_ms: u32,
    ) -> anyhow::Result<Vec<VadSegment>>;
}

/// Low-latency streaming recognizer.
pub trait StreamingAsrModel: Engine {
    fn infer(
        &mut self,
        samples: &[f32],
        cache: &mut EngineCache,
        is_final: bool,
        params: &ChunkParams,
    ) -> anyhow::Result<String>;
}

/// Punctuation restorer.
pub trait PunctuationModel: Engine {
    fn infer(&mut self, text: &str, cache: &mut EngineCache) -> anyhow::Result<String>;
}

/// High-accuracy recognizer run over complete segments. Output may carry markup.
pub trait AccurateModel: Engine {
    fn infer(&mut self, samples: &[f32]) -> anyhow::Result<String>;
}

/// Result of one adapter call as seen by the drivers.
#[derive(Debug)]
pub enum EngineOutcome<T> {
    Ok(T),
    /// The call failed; the caller may reset its cache and try once more.
    Retry(anyhow::Error),
    /// The call failed for good; the caller continues without output.
    Degrade(anyhow::Error),
}

impl<T> EngineOutcome<T> {
    /// Runs `retry` if this outcome asks for it. A second `Retry` becomes `Degrade`.
    pub fn or_retry(self, retry: impl FnOnce() -> EngineOutcome<T>) -> EngineOutcome<T> {
        match self {
            EngineOutcome::Retry(_) => match retry() {
                EngineOutcome::Retry(e) => EngineOutcome::Degrade(e),
                other => other,
            },
            other => other,
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            EngineOutcome::Ok(v) => Some(v),
            _ => None,
        }
    }
}

/// A shared engine instance serialized behind its own mutex.
pub struct Locked<M: ?Sized> {
    name: String,
    inner: Mutex<Box<M>>,
}

impl<M: Engine + ?Sized> Locked<M> {
    pub fn new(model: Box<M>) -> Self {
        Self {
            name: model.name().to_string(),
            inner: Mutex::new(model),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn single_attempt<T>(result: anyhow::Result<T>) -> EngineOutcome<T> {
    match result {
        Ok(v) => EngineOutcome::Ok(v),
        Err(e) => EngineOutcome::Retry(e),
    }
}

impl Locked<dyn VadModel> {
    pub fn infer(
        &self,
        samples: &[f32],
        cache: &mut EngineCache,
        is_final: bool,
        window_ms: u32,
    ) -> EngineOutcome<Vec<VadSegment>> {
        single_attempt(self.inner.lock().infer(samples, cache, is_final, window_ms))
    }
}

impl Locked<dyn StreamingAsrModel> {
    pub fn infer(
        &self,
        samples: &[f32],
        cache: &mut EngineCache,
        is_final: bool,
        params: &ChunkParams,
    ) -> EngineOutcome<String> {
        single_attempt(self.inner.lock().infer(samples, cache, is_final, params))
    }
}

impl Locked<dyn PunctuationModel> {
    pub fn infer(&self, text: &str, cache: &mut EngineCache) -> EngineOutcome<String> {
        single_attempt(self.inner.lock().infer(text, cache))
    }
}

impl Locked<dyn AccurateModel> {
    pub fn infer(&self, samples: &[f32]) -> EngineOutcome<String> {
        single_attempt(self.inner.lock().infer(samples))
    }
}

/// Describes a loaded engine for the models endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EngineDescriptor {
    pub role: &'static str,
    pub name: String,
}

/// The four shared engines, built once at startup.
pub struct InferenceEngines {
    pub vad: Locked<dyn VadModel>,
    pub asr: Locked<dyn StreamingAsrModel>,
    pub punctuation: Locked<dyn PunctuationModel>,
    pub accurate: Locked<dyn AccurateModel>,
}

impl InferenceEngines {
    pub fn new(
        vad: Box<dyn VadModel>,
        asr: Box<dyn StreamingAsrModel>,
        punctuation: Box<dyn PunctuationModel>,
        accurate: Box<dyn AccurateModel>,
    ) -> Self {
        Self {
            vad: Locked::new(vad),
            asr: Locked::new(asr),
            punctuation: Locked::new(punctuation),
            accurate: Locked::new(accurate),
        }
    }

    pub fn descriptors(&self) -> Vec<EngineDescriptor> {
        vec![
            EngineDescriptor {
                role: "vad",
                name: self.vad.name().to_string(),
            },
            EngineDescriptor {
                role: "streaming",
                name: self.asr.name().to_string(),
            },
            EngineDescriptor {
                role: "punctuation",
                name: self.punctuation.name().to_string(),
            },
            EngineDescriptor {
                role: "accurate",
                name: self.accurate.name().to_string(),
            },
        ]
    }
}
