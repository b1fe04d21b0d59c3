pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use state::AppState;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Upload ceiling for one-shot transcription.
pub const UPLOAD_LIMIT_BYTES: usize = 100 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let asr_routes = Router::new()
        .route("/models", get(routes::asr::models))
        .route("/formats", get(routes::asr::formats))
        .route("/hotwords", get(routes::asr::hotwords))
        .route("/hotwords/reload", post(routes::asr::reload_hotwords))
        .route("/transcribe", post(routes::asr::transcribe))
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES));

    Router::new()
        .route("/health", get(routes::health))
        .route("/ws", get(ws::handler::ws_upgrade))
        .nest("/api/asr", asr_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
