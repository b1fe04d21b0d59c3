use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, info};

use super::{
    AccurateModel, ChunkParams, Engine, EngineCache, InferenceEngines, PunctuationModel,
    StreamingAsrModel, VadModel, VadSegment,
};
use crate::config::InferenceConfig;
use crate::pipeline::audio_buffer::f32_to_pcm16le;

/// Handle of the streaming state the sidecar keeps for one session and engine.
#[derive(Debug, Clone)]
struct RemoteCacheId(String);

/// JSON-over-HTTP client for the model sidecar hosting the four engines.
///
/// The engine traits are synchronous, so calls are driven on the runtime
/// captured at construction with `Handle::block_on`. They must be made from a
/// blocking thread (`spawn_blocking`), never from inside an async task.
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
    runtime: Handle,
}

impl RemoteClient {
    pub fn new(config: &InferenceConfig) -> anyhow::Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| anyhow::anyhow!("Remote inference needs a tokio runtime: {}", e))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            runtime,
        })
    }

    fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> anyhow::Result<R> {
        let url = format!("{}{}", self.base_url, path);
        self.runtime.block_on(async {
            let response = self
                .http
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Request to '{}' failed: {}", url, e))?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                anyhow::bail!("Sidecar returned {} for '{}': {}", status, url, text);
            }
            response
                .json::<R>()
                .await
                .map_err(|e| anyhow::anyhow!("Invalid response from '{}': {}", url, e))
        })
    }
}

fn encode_audio(samples: &[f32]) -> String {
    BASE64.encode(f32_to_pcm16le(samples))
}

fn cache_id(cache: &EngineCache) -> Option<String> {
    cache.get::<RemoteCacheId>().map(|c| c.0.clone())
}

fn store_cache_id(cache: &mut EngineCache, id: Option<String>) {
    if let Some(id) = id {
        cache.insert(RemoteCacheId(id));
    }
}

#[derive(Serialize)]
struct VadRequest {
    audio: String,
    cache_id: Option<String>,
    is_final: bool,
    window_ms: u32,
}

#[derive(Deserialize)]
struct VadResponse {
    #[serde(default)]
    segments: Vec<[i64; 2]>,
    cache_id: Option<String>,
}

#[derive(Serialize)]
struct StreamRequest<'a> {
    audio: String,
    cache_id: Option<String>,
    is_final: bool,
    #[serde(flatten)]
    params: &'a ChunkParams,
}

#[derive(Serialize)]
struct PunctuateRequest<'a> {
    text: &'a str,
    cache_id: Option<String>,
}

#[derive(Deserialize)]
struct TextResponse {
    #[serde(default)]
    text: String,
    cache_id: Option<String>,
}

#[derive(Serialize)]
struct RecognizeRequest<'a> {
    audio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
}

/// Sidecar voice-activity detector (`POST /vad`).
pub struct RemoteVad {
    client: Arc<RemoteClient>,
}

impl Engine for RemoteVad {
    fn name(&self) -> &str {
        "remote_vad"
    }
}

impl VadModel for RemoteVad {
    fn infer(
        &mut self,
        samples: &[f32],
        cache: &mut EngineCache,
        is_final: bool,
        window_ms: u32,
    ) -> anyhow::Result<Vec<VadSegment>> {
        let response: VadResponse = self.client.post(
            "/vad",
            &VadRequest {
                audio: encode_audio(samples),
                cache_id: cache_id(cache),
                is_final,
                window_ms,
            },
        )?;
        store_cache_id(cache, response.cache_id);
        Ok(response
            .segments
            .into_iter()
            .map(|[beg, end]| VadSegment::from_raw(beg, end))
            .collect())
    }
}

/// Sidecar streaming recognizer (`POST /asr/stream`).
pub struct RemoteStreamingAsr {
    client: Arc<RemoteClient>,
}

impl Engine for RemoteStreamingAsr {
    fn name(&self) -> &str {
        "remote_streaming"
    }
}

impl StreamingAsrModel for RemoteStreamingAsr {
    fn infer(
        &mut self,
        samples: &[f32],
        cache: &mut EngineCache,
        is_final: bool,
        params: &ChunkParams,
    ) -> anyhow::Result<String> {
        let response: TextResponse = self.client.post(
            "/asr/stream",
            &StreamRequest {
                audio: encode_audio(samples),
                cache_id: cache_id(cache),
                is_final,
                params,
            },
        )?;
        store_cache_id(cache, response.cache_id);
        Ok(response.text)
    }
}

/// Sidecar punctuation restorer (`POST /punctuate`).
pub struct RemotePunctuation {
    client: Arc<RemoteClient>,
}

impl Engine for RemotePunctuation {
    fn name(&self) -> &str {
        "remote_punctuation"
    }
}

impl PunctuationModel for RemotePunctuation {
    fn infer(&mut self, text: &str, cache: &mut EngineCache) -> anyhow::Result<String> {
        let response: TextResponse = self.client.post(
            "/punctuate",
            &PunctuateRequest {
                text,
                cache_id: cache_id(cache),
            },
        )?;
        store_cache_id(cache, response.cache_id);
        Ok(response.text)
    }
}

/// Sidecar high-accuracy recognizer (`POST /recognize`).
pub struct RemoteAccurate {
    client: Arc<RemoteClient>,
    language: Option<String>,
}

impl Engine for RemoteAccurate {
    fn name(&self) -> &str {
        "remote_accurate"
    }
}

impl AccurateModel for RemoteAccurate {
    fn infer(&mut self, samples: &[f32]) -> anyhow::Result<String> {
        let response: TextResponse = self.client.post(
            "/recognize",
            &RecognizeRequest {
                audio: encode_audio(samples),
                language: self.language.as_deref(),
            },
        )?;
        debug!(text_len = response.text.len(), "Accurate recognition complete");
        Ok(response.text)
    }
}

/// Builds [`InferenceEngines`] backed by the sidecar.
pub struct RemoteEngines;

impl RemoteEngines {
    pub fn connect(config: &InferenceConfig) -> anyhow::Result<InferenceEngines> {
        Self::with_accurate(config, Self::accurate(config)?)
    }

    /// Like [`RemoteEngines::connect`] but with a caller-supplied accurate recognizer.
    pub fn with_accurate(
        config: &InferenceConfig,
        accurate: Box<dyn AccurateModel>,
    ) -> anyhow::Result<InferenceEngines> {
        let client = Arc::new(RemoteClient::new(config)?);
        info!(base_url = %config.base_url, accurate = accurate.name(), "Remote inference engines configured");
        Ok(InferenceEngines::new(
            Box::new(RemoteVad {
                client: client.clone(),
            }),
            Box::new(RemoteStreamingAsr {
                client: client.clone(),
            }),
            Box::new(RemotePunctuation { client }),
            accurate,
        ))
    }

    fn accurate(config: &InferenceConfig) -> anyhow::Result<Box<dyn AccurateModel>> {
        Ok(Box::new(RemoteAccurate {
            client: Arc::new(RemoteClient::new(config)?),
            language: config.language.clone(),
        }))
    }
}
