use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::CorrectionConfig;

static THINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));

/// Reconciles the fast and accurate transcripts into one final text.
///
/// Implementations must bound their own latency; the finalization pass treats
/// any error as "keep the recognizer output".
pub trait TextCorrector: Send + Sync {
    fn name(&self) -> &str;

    fn correct(&self, fast: &str, accurate: &str, hints: &[String]) -> anyhow::Result<String>;
}

/// Picks the final text: corrector output when it succeeds with non-empty
/// text, otherwise the accurate transcript, otherwise the fast one.
///
/// Returns the text and whether it came from the corrector.
pub fn correct_or_fallback(
    corrector: Option<&dyn TextCorrector>,
    fast: &str,
    accurate: &str,
    hints: &[String],
) -> (String, bool) {
    let fallback = || {
        if accurate.trim().is_empty() {
            fast.to_string()
        } else {
            accurate.to_string()
        }
    };

    let Some(corrector) = corrector else {
        return (fallback(), false);
    };
    if fast.trim().is_empty() && accurate.trim().is_empty() {
        return (String::new(), false);
    }

    match corrector.correct(fast, accurate, hints) {
        Ok(text) if !text.trim().is_empty() => (text, true),
        Ok(_) => {
            warn!(corrector = corrector.name(), "Correction returned empty text, falling back");
            (fallback(), false)
        }
        Err(e) => {
            warn!(corrector = corrector.name(), "Correction failed, falling back: {}", e);
            (fallback(), false)
        }
    }
}

/// Removes reasoning blocks some chat models prepend to their answer.
pub fn strip_think(text: &str) -> String {
    THINK_RE.replace_all(text, "").trim().to_string()
}

const SYSTEM_PROMPT: &str = "You proofread speech recognition output. You receive two transcripts of the same recording:\n\
1. A real-time streaming transcript: fast, but less accurate.\n\
2. A full-recording transcript from a slower, more accurate recognizer.\n\
\n\
Prefer the accurate transcript. Use the streaming transcript only where the accurate one is clearly wrong or incomplete. \
Fix homophones, missing or repeated words, typos and punctuation, and keep sentences fluent. \
Output only the corrected text with no explanation, and never add content that was not spoken.";

/// Builds the system prompt, appending the custom vocabulary when present.
pub fn system_prompt(hints: &[String]) -> String {
    if hints.is_empty() {
        return SYSTEM_PROMPT.to_string();
    }
    format!(
        "{}\n\nWhen a recognized word plausibly stands for one of these custom terms, use the custom term: {}",
        SYSTEM_PROMPT,
        hints.join(", ")
    )
}

pub fn user_prompt(fast: &str, accurate: &str) -> String {
    format!(
        "Check, correct and merge these two transcripts.\n\n\
         Streaming transcript:\n{}\n\n\
         Accurate transcript:\n{}\n\n\
         Corrected text:",
        fast, accurate
    )
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

/// OpenAI-compatible chat completions corrector.
///
/// Like the remote engines it blocks on the runtime captured at construction
/// and must be called from a blocking thread.
pub struct LlmCorrector {
    http: reqwest::Client,
    config: CorrectionConfig,
    runtime: Handle,
}

impl LlmCorrector {
    pub fn new(config: CorrectionConfig) -> anyhow::Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| anyhow::anyhow!("LLM corrector needs a tokio runtime: {}", e))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        info!(model = %config.model, api_url = %config.api_url, "LLM corrector configured");
        Ok(Self {
            http,
            config,
            runtime,
        })
    }
}

impl TextCorrector for LlmCorrector {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn correct(&self, fast: &str, accurate: &str, hints: &[String]) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(hints),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(fast, accurate),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response: ChatResponse = self.runtime.block_on(async {
            let mut builder = self.http.post(&self.config.api_url).json(&request);
            if let Some(ref key) = self.config.api_key {
                builder = builder.bearer_auth(key);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("LLM request failed: {}", e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("LLM returned {}: {}", status, body);
            }
            response
                .json::<ChatResponse>()
                .await
                .map_err(|e| anyhow::anyhow!("Invalid LLM response: {}", e))
        })?;

        let content = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("LLM response has no choices"))?;
        let text = strip_think(&content);
        debug!(chars = text.chars().count(), "LLM correction complete");
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct HotwordsFile {
    #[serde(default)]
    hotwords: Vec<String>,
}

/// Custom vocabulary passed to the corrector, loaded from `{"hotwords": [...]}`.
#[derive(Debug, Default)]
pub struct Hotwords {
    path: Option<PathBuf>,
    words: RwLock<Vec<String>>,
}

impl Hotwords {
    /// Loads the file at `path`. A missing or unreadable file yields an empty list.
    pub fn load(path: Option<PathBuf>) -> Self {
        let hotwords = Self {
            path,
            words: RwLock::new(Vec::new()),
        };
        if let Err(e) = hotwords.reload() {
            warn!("Hotwords not loaded: {}", e);
        }
        hotwords
    }

    pub fn from_words(words: Vec<String>) -> Self {
        Self {
            path: None,
            words: RwLock::new(words),
        }
    }

    /// Re-reads the file. On a parse error the previous list is kept.
    pub fn reload(&self) -> anyhow::Result<Vec<String>> {
        let Some(path) = self.path.as_deref() else {
            return Ok(self.snapshot());
        };
        let words = read_hotwords(path)?;
        info!(path = %path.display(), count = words.len(), "Hotwords loaded");
        *self.words.write() = words.clone();
        Ok(words)
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.words.read().clone()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn read_hotwords(path: &Path) -> anyhow::Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read '{}': {}", path.display(), e))?;
    let file: HotwordsFile = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid hotwords file '{}': {}", path.display(), e))?;
    Ok(file
        .hotwords
        .into_iter()
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect())
}
