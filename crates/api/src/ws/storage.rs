use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::stream::SplitSink;
use scribe_transcription::SessionId;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Tracks open WebSocket connections by the session id assigned on connect.
pub struct WsStorage {
    connections: DashMap<SessionId, WsSender>,
}

impl WsStorage {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn add(&self, session_id: SessionId, sender: WsSender) {
        self.connections.insert(session_id, sender);
    }

    /// Removes the connection only if `sender` is still the registered one.
    pub fn remove(&self, session_id: &SessionId, sender: &WsSender) {
        self.connections
            .remove_if(session_id, |_, current| Arc::ptr_eq(current, sender));
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for WsStorage {
    fn default() -> Self {
        Self::new()
    }
}
