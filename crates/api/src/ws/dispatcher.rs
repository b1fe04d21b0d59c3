use axum::extract::ws::Message;
use futures::SinkExt;
use serde_json::Value;
use tracing::warn;

use super::storage::WsSender;

/// Builds the `{ "type": .., "data": .. }` envelope used for every event.
pub fn event(event_type: &str, data: Value) -> Value {
    serde_json::json!({ "type": event_type, "data": data })
}

/// Sends a JSON message on one connection. Failures are logged and swallowed;
/// the return value says whether the frame was written.
pub async fn send(sender: &WsSender, message: &Value) -> bool {
    let text = serde_json::to_string(message).unwrap_or_default();
    let mut guard = sender.lock().await;
    match guard.send(Message::text(text)).await {
        Ok(()) => true,
        Err(e) => {
            warn!(%e, "Failed to send WS message");
            false
        }
    }
}
