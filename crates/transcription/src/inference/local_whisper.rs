use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{AccurateModel, Engine};

/// High-accuracy recognizer backed by whisper.cpp via whisper-rs.
///
/// Replaces the sidecar's accurate engine when a GGML model path is configured.
pub struct LocalWhisper {
    ctx: WhisperContext,
    language: Option<String>,
}

impl LocalWhisper {
    /// Loads the model from disk.
    ///
    /// `model_path` should point to a GGML Whisper model file (e.g. ggml-base.bin).
    pub fn new(model_path: &str, language: Option<String>) -> anyhow::Result<Self> {
        info!(model_path, "Loading Whisper model");
        let ctx = WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
            .map_err(|e| anyhow::anyhow!("Failed to load Whisper model '{}': {}", model_path, e))?;
        info!("Whisper model loaded");
        Ok(Self { ctx, language })
    }
}

impl Engine for LocalWhisper {
    fn name(&self) -> &str {
        "local_whisper"
    }
}

impl AccurateModel for LocalWhisper {
    fn infer(&mut self, samples: &[f32]) -> anyhow::Result<String> {
        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| anyhow::anyhow!("Failed to create Whisper state: {}", e))?;

        let mut params = FullParams::new(SamplingStrategy::BeamSearch {
            beam_size: 5,
            patience: 1.0,
        });

        if let Some(ref lang) = self.language {
            params.set_language(Some(lang));
        } else {
            params.set_detect_language(true);
        }
        params.set_translate(false);
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_single_segment(false);
        params.set_no_speech_thold(0.6);
        params.set_suppress_blank(true);

        state
            .full(params, samples)
            .map_err(|e| anyhow::anyhow!("Whisper transcription failed: {}", e))?;

        let mut text = String::new();
        for i in 0..state.full_n_segments() {
            if let Some(segment) = state.get_segment(i)
                && let Ok(seg_text) = segment.to_str()
            {
                text.push_str(seg_text);
            }
        }

        let text = text.trim().to_string();
        debug!(text_len = text.len(), samples = samples.len(), "Whisper transcription complete");
        Ok(text)
    }
}
