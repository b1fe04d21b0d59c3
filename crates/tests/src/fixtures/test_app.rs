use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use scribe_api::{build_router, state::AppState};
use scribe_config::Settings;
use scribe_transcription::testing;
use scribe_transcription::{
    FinalizationPipeline, Hotwords, InferenceEngines, TextCorrector, TranscriptionConfig,
    TranscriptionEngine,
};

/// Knobs for [`TestApp::spawn_with`].
#[derive(Default)]
pub struct TestOptions {
    pub config: TranscriptionConfig,
    /// Defaults to [`testing::default_engines`].
    pub engines: Option<InferenceEngines>,
    pub corrector: Option<Arc<dyn TextCorrector>>,
    pub hotwords_path: Option<PathBuf>,
}

/// The full router served on an ephemeral port with scripted engines.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    pub engine: Arc<TranscriptionEngine>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(TestOptions::default()).await
    }

    pub async fn spawn_with(options: TestOptions) -> Self {
        let engines = options.engines.unwrap_or_else(testing::default_engines);
        let hotwords = Arc::new(Hotwords::load(options.hotwords_path));

        let mut pipeline = FinalizationPipeline::new(Arc::new(engines), options.config.clone())
            .with_hotwords(hotwords.clone());
        if let Some(corrector) = options.corrector {
            pipeline = pipeline.with_corrector(corrector);
        }
        let engine = TranscriptionEngine::new(pipeline);

        let settings = Settings {
            transcription: options.config,
            ..Default::default()
        };
        let app = build_router(AppState::new(settings, engine.clone(), hotwords));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: reqwest::Client::new(),
            engine,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(self.url(path))
    }

    /// Polls until `check` holds, giving up after two seconds.
    pub async fn wait_until(&self, check: impl Fn(&TranscriptionEngine) -> bool) {
        for _ in 0..200 {
            if check(&self.engine) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }
}

/// Encodes s16le PCM bytes as a 16 kHz mono WAV file.
pub fn wav_from_pcm(pcm: &[u8]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
    for pair in pcm.chunks_exact(2) {
        writer
            .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
            .unwrap();
    }
    writer.finalize().unwrap();
    cursor.into_inner()
}
