use axum::{
    extract::{State, WebSocketUpgrade, ws::{Message, WebSocket}},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use futures::{SinkExt, StreamExt};
use scribe_transcription::{
    FinalizationResult, PendingStop, ProgressSink, ResumeOutcome, SessionId, StopClaim, StopOutcome,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dispatcher::{self, event};
use super::storage::WsSender;
use crate::state::AppState;

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = SessionId::new(Uuid::new_v4().to_string());
    info!(%session_id, "WebSocket connected");

    let (sender, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(Mutex::new(sender));

    state.ws_storage.add(session_id.clone(), sender.clone());

    dispatcher::send(&sender, &event("connected", json!({ "session_id": session_id }))).await;

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle_client_message(&state, &session_id, &sender, text.as_str()).await;
            }
            Ok(Message::Binary(data)) => {
                handle_audio(&state, &session_id, &sender, data.to_vec()).await;
            }
            Ok(Message::Ping(data)) => {
                let mut guard = sender.lock().await;
                let _ = guard.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => {
                break;
            }
            Err(e) => {
                warn!(%session_id, %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    // Cleanup
    state.ws_storage.remove(&session_id, &sender);

    let engine = state.engine.clone();
    let id = session_id.clone();
    match tokio::task::spawn_blocking(move || engine.disconnect(&id)).await {
        Ok(outcome) => info!(%session_id, ?outcome, "WebSocket disconnected"),
        Err(e) => warn!(%session_id, %e, "Disconnect handling failed"),
    }
}

async fn handle_client_message(state: &AppState, session_id: &SessionId, sender: &WsSender, text: &str) {
    let parsed: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            send_error(sender, "Malformed message").await;
            return;
        }
    };

    let msg_type = parsed.get("type").and_then(|t| t.as_str()).unwrap_or("");
    let data = parsed.get("data");

    debug!(%session_id, msg_type, "WS message received");

    match msg_type {
        "ping" => {
            dispatcher::send(sender, &json!({ "type": "pong" })).await;
        }
        "start_recording" => {
            handle_start(state, session_id, sender).await;
        }
        "audio_data" => {
            let Some(encoded) = data.and_then(|d| d.get("audio")).and_then(|a| a.as_str()) else {
                send_error(sender, "audio_data requires a base64 'audio' field").await;
                return;
            };
            match BASE64.decode(encoded) {
                Ok(bytes) => handle_audio(state, session_id, sender, bytes).await,
                Err(e) => send_error(sender, &format!("Invalid base64 audio: {e}")).await,
            }
        }
        "stop_recording" => {
            handle_stop(state, session_id, sender).await;
        }
        "resume_recording" => {
            match data.and_then(|d| d.get("session_id")).and_then(|s| s.as_str()) {
                Some(original) => handle_resume(state, session_id, sender, SessionId::from(original)).await,
                None => send_error(sender, "resume_recording requires 'session_id'").await,
            }
        }
        _ => {
            debug!(%session_id, msg_type, "Unknown WS message type");
        }
    }
}

async fn handle_start(state: &AppState, session_id: &SessionId, sender: &WsSender) {
    let engine = state.engine.clone();
    let id = session_id.clone();
    match tokio::task::spawn_blocking(move || engine.start(&id)).await {
        Ok(Ok(())) => {
            dispatcher::send(sender, &event("recording_started", json!({ "session_id": session_id }))).await;
        }
        Ok(Err(e)) => send_error(sender, &e.to_string()).await,
        Err(e) => send_error(sender, &format!("Start failed: {e}")).await,
    }
}

async fn handle_audio(state: &AppState, session_id: &SessionId, sender: &WsSender, bytes: Vec<u8>) {
    let engine = state.engine.clone();
    let id = session_id.clone();
    match tokio::task::spawn_blocking(move || engine.audio(&id, &bytes)).await {
        Ok(Ok(Some(tick))) => match serde_json::to_value(&tick) {
            Ok(data) => {
                dispatcher::send(sender, &event("transcription", data)).await;
            }
            Err(e) => warn!(%session_id, %e, "Failed to serialize tick result"),
        },
        Ok(Ok(None)) => {}
        Ok(Err(e)) => send_error(sender, &e.to_string()).await,
        Err(e) => warn!(%session_id, %e, "Audio task failed"),
    }
}

/// Claims the stop inline so a close right behind it finds the session
/// finalizing, then runs the pipeline on its own task so this connection
/// keeps reading.
async fn handle_stop(state: &AppState, session_id: &SessionId, sender: &WsSender) {
    match state.engine.begin_stop(session_id) {
        Ok(StopClaim::Claimed(pending)) => {
            dispatcher::send(sender, &event("recording_stopped", json!({ "session_id": session_id }))).await;
            tokio::spawn(run_finalization(state.clone(), session_id.clone(), sender.clone(), pending));
        }
        Ok(StopClaim::Settled(StopOutcome::Finalized(result) | StopOutcome::Cached(result))) => {
            send_final_result(sender, session_id, &result).await;
        }
        Ok(StopClaim::Settled(StopOutcome::AlreadyFinalizing)) => {
            debug!(%session_id, "Stop ignored, finalization already running");
        }
        Err(e) => send_error(sender, &e.to_string()).await,
    }
}

async fn run_finalization(state: AppState, session_id: SessionId, sender: WsSender, pending: PendingStop) {
    let sink = WsProgress {
        sender: sender.clone(),
        runtime: Handle::current(),
    };
    let engine = state.engine.clone();
    match tokio::task::spawn_blocking(move || engine.finish_stop(pending, &sink)).await {
        Ok(result) => send_final_result(&sender, &session_id, &result).await,
        Err(e) => {
            warn!(%session_id, %e, "Finalization task failed");
            send_error(&sender, "Finalization failed").await;
        }
    }
}

async fn send_final_result(sender: &WsSender, session_id: &SessionId, result: &FinalizationResult) {
    match serde_json::to_value(result) {
        Ok(data) => {
            dispatcher::send(sender, &event("final_result", data)).await;
        }
        Err(e) => warn!(%session_id, %e, "Failed to serialize final result"),
    }
}

async fn handle_resume(state: &AppState, session_id: &SessionId, sender: &WsSender, original: SessionId) {
    let engine = state.engine.clone();
    let new_id = session_id.clone();
    let resumed_from = original.clone();
    let outcome = match tokio::task::spawn_blocking(move || engine.resume(&resumed_from, &new_id)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(%session_id, %e, "Resume task failed");
            send_error(sender, "Resume failed").await;
            return;
        }
    };

    let data = match outcome {
        ResumeOutcome::Resumed { text, duration_ms } => json!({
            "success": true,
            "session_id": session_id,
            "current_text": text,
            "duration": duration_ms as f64 / 1000.0,
        }),
        ResumeOutcome::NotFound => json!({
            "success": false,
            "session_id": original,
            "message": "Session not found or expired",
        }),
        ResumeOutcome::Conflict => json!({
            "success": false,
            "session_id": original,
            "message": "This connection already has an active recording",
        }),
    };
    dispatcher::send(sender, &event("resume_result", data)).await;
}

async fn send_error(sender: &WsSender, message: &str) {
    dispatcher::send(sender, &event("error", json!({ "message": message }))).await;
}

/// Relays finalization progress to the client as `processing_progress`.
///
/// Reports arrive on the blocking thread running the pipeline, so sends are
/// driven on the runtime handle captured when the stop task started.
struct WsProgress {
    sender: WsSender,
    runtime: Handle,
}

impl ProgressSink for WsProgress {
    fn report(&self, current: u32, total: u32) -> anyhow::Result<()> {
        let percent = if total == 0 { 100 } else { current * 100 / total };
        let message = event(
            "processing_progress",
            json!({ "percent": percent, "current": current, "total": total }),
        );
        if self.runtime.block_on(dispatcher::send(&self.sender, &message)) {
            Ok(())
        } else {
            Err(anyhow::anyhow!("progress frame not delivered"))
        }
    }
}
