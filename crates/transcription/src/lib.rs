pub mod asr;
pub mod backup;
pub mod config;
pub mod correction;
pub mod engine;
pub mod error;
pub mod finalize;
pub mod inference;
pub mod pipeline;
pub mod postprocess;
pub mod session;
pub mod transcript;
pub mod vad;
pub mod worker;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use asr::{AsrCadence, TickResult};
pub use backup::RecordingBackup;
pub use config::{BackupConfig, CorrectionConfig, InferenceConfig, TranscriptionConfig};
pub use correction::{Hotwords, LlmCorrector, TextCorrector};
pub use engine::{
    DisconnectOutcome, PendingStop, ResumeOutcome, StopClaim, StopOutcome, TranscriptionEngine,
};
pub use error::TranscriptionError;
pub use finalize::{FileTranscription, FinalizationPipeline, FinalizationResult, NoProgress, ProgressSink};
pub use inference::{EngineDescriptor, InferenceEngines};
pub use session::SessionId;
pub use transcript::TranscriptSegment;
pub use vad::{SpeechActivity, VadEdge};
