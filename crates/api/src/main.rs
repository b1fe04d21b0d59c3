use std::path::PathBuf;
use std::sync::Arc;

use scribe_api::{build_router, state::AppState};
use scribe_config::Settings;
use scribe_transcription::inference::remote::RemoteEngines;
use scribe_transcription::worker::{BackgroundTasks, spawn_backup_reaper, spawn_session_reaper};
use scribe_transcription::{
    FinalizationPipeline, Hotwords, InferenceEngines, LlmCorrector, RecordingBackup,
    TranscriptionEngine,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    init_tracing(&settings);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting scribe");

    let engines = Arc::new(build_engines(&settings).await?);

    let hotwords = Arc::new(Hotwords::load(settings.hotwords.path.as_ref().map(PathBuf::from)));
    info!(count = hotwords.snapshot().len(), "Hotwords loaded");

    let mut pipeline = FinalizationPipeline::new(engines, settings.transcription.clone())
        .with_hotwords(hotwords.clone());

    if settings.correction.enabled {
        pipeline = pipeline.with_corrector(Arc::new(LlmCorrector::new(settings.correction.clone())?));
    }

    let backup = match settings.backup.dir.as_deref() {
        Some(dir) => match RecordingBackup::new(dir, settings.transcription.sample_rate) {
            Ok(backup) => Some(backup),
            Err(e) => {
                warn!(dir, %e, "Recording backup disabled");
                None
            }
        },
        None => None,
    };
    if let Some(backup) = &backup {
        pipeline = pipeline.with_backup(backup.clone());
    }

    let engine = TranscriptionEngine::new(pipeline);

    let mut tasks = BackgroundTasks::new(CancellationToken::new());
    tasks.push(spawn_session_reaper(
        engine.clone(),
        settings.transcription.reaper_interval(),
        tasks.token(),
    ));
    if let Some(backup) = backup {
        tasks.push(spawn_backup_reaper(
            backup,
            settings.backup.retention(),
            settings.backup.reap_interval(),
            tasks.token(),
        ));
    }

    let addr = settings.app.bind_addr();
    let state = AppState::new(settings, engine, hotwords);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tasks.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(settings: &Settings) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log.level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if settings.log.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[cfg(feature = "local-whisper")]
async fn build_engines(settings: &Settings) -> anyhow::Result<InferenceEngines> {
    use scribe_transcription::inference::local_whisper::LocalWhisper;

    let Some(model_path) = settings.inference.whisper_model_path.clone() else {
        return RemoteEngines::connect(&settings.inference);
    };
    let language = settings.inference.language.clone();
    let whisper = tokio::task::spawn_blocking(move || LocalWhisper::new(&model_path, language)).await??;
    RemoteEngines::with_accurate(&settings.inference, Box::new(whisper))
}

#[cfg(not(feature = "local-whisper"))]
async fn build_engines(settings: &Settings) -> anyhow::Result<InferenceEngines> {
    if settings.inference.whisper_model_path.is_some() {
        warn!("whisper_model_path is set but the local-whisper feature is disabled");
    }
    RemoteEngines::connect(&settings.inference)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(%e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(%e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
