pub mod asr;

use axum::{Json, extract::State};
use serde_json::Value;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.ws_storage.connection_count(),
        "active_sessions": state.engine.active_count(),
        "held_sessions": state.engine.held_count(),
    }))
}
