use axum::{
    Json,
    extract::{Multipart, Query, State},
};
use scribe_transcription::FileTranscription;
use scribe_transcription::pipeline::{SUPPORTED_FORMATS, decode_upload};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::AppState;

const FILE_FIELD: &str = "file";

#[derive(Debug, Default, Deserialize)]
pub struct TranscribeParams {
    #[serde(default)]
    pub timestamps: bool,
}

pub async fn models(State(state): State<AppState>) -> Json<Value> {
    let correction = &state.settings.correction;
    Json(serde_json::json!({
        "engines": state.engine.engines().descriptors(),
        "correction": {
            "enabled": state.engine.pipeline().corrector_name().is_some(),
            "model": correction.model,
        },
    }))
}

pub async fn formats() -> Json<&'static [&'static str]> {
    Json(SUPPORTED_FORMATS)
}

pub async fn hotwords(State(state): State<AppState>) -> Json<Value> {
    let words = state.hotwords.snapshot();
    Json(serde_json::json!({
        "count": words.len(),
        "hotwords": words,
        "file_path": state.hotwords.path().map(|p| p.display().to_string()),
    }))
}

pub async fn reload_hotwords(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    if state.hotwords.path().is_none() {
        return Err(ApiError::BadRequest("No hotwords file configured".to_string()));
    }
    let hotwords = state.hotwords.clone();
    let words = tokio::task::spawn_blocking(move || hotwords.reload())
        .await?
        .map_err(|e| {
            warn!(%e, "Hotwords reload failed");
            ApiError::BadRequest(e.to_string())
        })?;
    info!(count = words.len(), "Hotwords reloaded");
    Ok(Json(serde_json::json!({
        "success": true,
        "count": words.len(),
        "hotwords": words,
    })))
}

/// One-shot transcription of an uploaded WAV or raw PCM file.
pub async fn transcribe(
    State(state): State<AppState>,
    Query(params): Query<TranscribeParams>,
    mut multipart: Multipart,
) -> Result<Json<FileTranscription>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload.wav").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {e}")))?;
        upload = Some((file_name, bytes));
        break;
    }
    let Some((file_name, bytes)) = upload else {
        return Err(ApiError::BadRequest(format!(
            "Missing multipart field '{FILE_FIELD}'"
        )));
    };
    info!(%file_name, size = bytes.len(), timestamps = params.timestamps, "File transcription requested");

    let samples = {
        let file_name = file_name.clone();
        tokio::task::spawn_blocking(move || decode_upload(&file_name, &bytes))
            .await?
            .map_err(|e| ApiError::Unsupported(e.to_string()))?
    };
    if samples.is_empty() {
        return Err(ApiError::BadRequest("Uploaded audio is empty".to_string()));
    }

    let engine = state.engine.clone();
    let timestamps = params.timestamps;
    let transcription = tokio::task::spawn_blocking(move || engine.transcribe_file(&samples, timestamps))
        .await?
        .map_err(|e| ApiError::Internal(format!("Transcription failed: {e}")))?;

    info!(%file_name, length = transcription.length, "File transcription complete");
    Ok(Json(transcription))
}
