use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the streaming session pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Sample rate of every buffer handled by the pipeline (mono).
    pub sample_rate: u32,
    /// VAD cadence window in milliseconds.
    pub vad_window_ms: u32,
    /// Streaming ASR cadence window in milliseconds.
    pub asr_chunk_ms: u32,
    /// Streaming engine chunk layout `[look-back, chunk, look-ahead]`, in 60ms frames.
    pub asr_chunk_size: [u32; 3],
    /// Encoder look-back passed to the streaming engine.
    pub encoder_chunk_look_back: u32,
    /// Decoder look-back passed to the streaming engine.
    pub decoder_chunk_look_back: u32,
    /// Pending characters that trigger a punctuation flush.
    pub punctuation_threshold: usize,
    /// Minimum ASR remainder that is flushed through the streaming engine on stop.
    pub final_min_remainder_ms: u32,
    /// Finalize-time VAD segments are merged forward until they reach this length.
    pub merge_min_segment_ms: u64,
    /// Merged segments shorter than this are discarded.
    pub min_segment_ms: u64,
    /// How long a disconnected, still-recording session can be resumed.
    pub grace_period_secs: u64,
    /// Interval of the held-session reaper.
    pub reaper_interval_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            vad_window_ms: 200,
            asr_chunk_ms: 600,
            asr_chunk_size: [0, 10, 5],
            encoder_chunk_look_back: 4,
            decoder_chunk_look_back: 1,
            punctuation_threshold: 20,
            final_min_remainder_ms: 300,
            merge_min_segment_ms: 60_000,
            min_segment_ms: 1_000,
            grace_period_secs: 60,
            reaper_interval_secs: 10,
        }
    }
}

impl TranscriptionConfig {
    /// Number of samples covering `ms` milliseconds.
    pub fn ms_to_samples(&self, ms: u64) -> usize {
        (ms * self.sample_rate as u64 / 1000) as usize
    }

    /// Duration in milliseconds of `samples` samples.
    pub fn samples_to_ms(&self, samples: usize) -> u64 {
        samples as u64 * 1000 / self.sample_rate as u64
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs.max(1))
    }
}

/// Connection settings for the model sidecar serving the four inference engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Base URL of the sidecar, e.g. `http://127.0.0.1:10095`.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Path to a GGML Whisper model; replaces the sidecar's accurate recognizer
    /// when the `local-whisper` feature is enabled.
    pub whisper_model_path: Option<String>,
    /// Language hint for the accurate recognizer. None = auto-detect.
    pub language: Option<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:10095".to_string(),
            timeout_secs: 120,
            whisper_model_path: None,
            language: None,
        }
    }
}

/// Settings for the LLM that reconciles the fast and accurate transcripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub enabled: bool,
    /// OpenAI-compatible chat completions endpoint.
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: "http://127.0.0.1:9997/v1/chat/completions".to_string(),
            api_key: None,
            model: "qwen3:8b".to_string(),
            temperature: 0.3,
            max_tokens: 2000,
            timeout_secs: 30,
        }
    }
}

/// Settings for the on-disk WAV copy of every finished recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Target directory. None disables backups.
    pub dir: Option<String>,
    pub retention_days: u64,
    pub reap_interval_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: None,
            retention_days: 7,
            reap_interval_secs: 3600,
        }
    }
}

impl BackupConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 3600)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}
