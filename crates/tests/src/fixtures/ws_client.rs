use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A client connection that has already consumed its `connected` event.
pub struct WsClient {
    ws: Socket,
    pub session_id: String,
}

impl WsClient {
    pub async fn connect(url: &str) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .expect("WS connect failed");
        let mut client = Self {
            ws,
            session_id: String::new(),
        };
        let connected = client.next_event().await;
        assert_eq!(connected["type"], "connected");
        client.session_id = connected["data"]["session_id"]
            .as_str()
            .expect("connected carries a session id")
            .to_string();
        client
    }

    pub async fn send_event(&mut self, event_type: &str, data: Value) {
        let text = serde_json::to_string(&serde_json::json!({ "type": event_type, "data": data }))
            .unwrap();
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    pub async fn send_audio(&mut self, pcm: &[u8]) {
        self.ws
            .send(Message::Binary(pcm.to_vec().into()))
            .await
            .unwrap();
    }

    /// Sends each 600 ms block as its own frame, returning the `transcription`
    /// events received in reply.
    pub async fn speak(&mut self, text: &str) -> Vec<Value> {
        let mut ticks = Vec::new();
        for ch in text.chars() {
            self.send_audio(&scribe_transcription::testing::tone(ch, 600)).await;
            let event = self.expect_event("transcription").await;
            ticks.push(event["data"].clone());
        }
        ticks
    }

    /// Next JSON event, panicking on timeout or a closed socket.
    pub async fn next_event(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(EVENT_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for WS event")
                .expect("WS stream ended")
                .expect("WS error");
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    /// Next event, asserting its type.
    pub async fn expect_event(&mut self, event_type: &str) -> Value {
        let event = self.next_event().await;
        assert_eq!(event["type"], event_type, "unexpected event: {event}");
        event
    }

    /// Skips events until one of `event_type` arrives; returns it with the skipped ones.
    pub async fn wait_for(&mut self, event_type: &str) -> (Value, Vec<Value>) {
        let mut skipped = Vec::new();
        loop {
            let event = self.next_event().await;
            if event["type"] == event_type {
                return (event, skipped);
            }
            skipped.push(event);
        }
    }

    pub async fn close(mut self) {
        self.ws.close(None).await.unwrap();
    }
}
