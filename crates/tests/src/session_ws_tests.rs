use std::sync::Arc;
use std::sync::atomic::Ordering;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use scribe_transcription::{SessionId, TranscriptionConfig};
use scribe_transcription::testing::{self, IdentityPunctuation, LetterAsr, ScriptedVad, TaggedAccurate};
use serde_json::{Value, json};

use crate::fixtures::test_app::{TestApp, TestOptions};
use crate::fixtures::ws_client::WsClient;

#[tokio::test]
async fn connect_assigns_session_id() {
    let app = TestApp::spawn().await;
    let a = WsClient::connect(&app.ws_url()).await;
    let b = WsClient::connect(&app.ws_url()).await;
    assert!(!a.session_id.is_empty());
    assert_ne!(a.session_id, b.session_id);
}

#[tokio::test]
async fn ping_pong() {
    let app = TestApp::spawn().await;
    let mut ws = WsClient::connect(&app.ws_url()).await;
    ws.send_event("ping", json!({})).await;
    ws.expect_event("pong").await;
}

#[tokio::test]
async fn streaming_then_final_result() {
    let app = TestApp::spawn().await;
    let mut ws = WsClient::connect(&app.ws_url()).await;

    ws.send_event("start_recording", json!({})).await;
    let started = ws.expect_event("recording_started").await;
    assert_eq!(started["data"]["session_id"], ws.session_id.as_str());

    let ticks = ws.speak("hello").await;
    let texts: Vec<&str> = ticks.iter().map(|t| t["text"].as_str().unwrap()).collect();
    assert_eq!(texts, vec!["h", "e", "l", "l", "o"]);
    assert_eq!(ticks[4]["full_text"], "hello");
    assert_eq!(ticks[4]["processed_ms"], 3000);
    assert_eq!(ticks[4]["speech_active"], false);

    ws.send_event("stop_recording", json!({})).await;
    ws.expect_event("recording_stopped").await;
    let (final_result, progress) = ws.wait_for("final_result").await;

    let percents: Vec<u64> = progress
        .iter()
        .filter(|e| e["type"] == "processing_progress")
        .map(|e| e["data"]["percent"].as_u64().unwrap())
        .collect();
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "progress regressed: {percents:?}");
    assert_eq!(percents.last(), Some(&100));

    let data = &final_result["data"];
    assert_eq!(data["fast_transcript"], "hello");
    assert_eq!(data["accurate_transcript"], "hello");
    assert_eq!(data["final_transcript"], "hello");
    assert_eq!(data["accurate_length"], 5);
    assert_eq!(data["duration_ms"], 3000);
    assert!(data.get("error").is_none());
    assert_eq!(app.engine.active_count(), 0);
}

#[tokio::test]
async fn base64_audio_frames() {
    let app = TestApp::spawn().await;
    let mut ws = WsClient::connect(&app.ws_url()).await;
    ws.send_event("start_recording", json!({})).await;
    ws.expect_event("recording_started").await;

    let audio = BASE64.encode(testing::tone('q', 600));
    ws.send_event("audio_data", json!({ "audio": audio })).await;
    let tick = ws.expect_event("transcription").await;
    assert_eq!(tick["data"]["text"], "q");

    ws.send_event("audio_data", json!({ "audio": "***" })).await;
    let error = ws.expect_event("error").await;
    assert!(error["data"]["message"].as_str().unwrap().contains("base64"));
}

#[tokio::test]
async fn audio_without_start_is_unknown_session() {
    let app = TestApp::spawn().await;
    let mut ws = WsClient::connect(&app.ws_url()).await;
    ws.send_audio(&testing::tone('a', 600)).await;
    let error = ws.expect_event("error").await;
    assert!(error["data"]["message"].as_str().unwrap().contains(&ws.session_id));
}

#[tokio::test]
async fn second_start_is_rejected() {
    let app = TestApp::spawn().await;
    let mut ws = WsClient::connect(&app.ws_url()).await;
    ws.send_event("start_recording", json!({})).await;
    ws.expect_event("recording_started").await;
    ws.send_event("start_recording", json!({})).await;
    ws.expect_event("error").await;
    assert_eq!(app.engine.active_count(), 1);
}

#[tokio::test]
async fn double_stop_finalizes_once() {
    let (accurate, calls) = TaggedAccurate::counted();
    let app = TestApp::spawn_with(TestOptions {
        engines: Some(testing::engines(
            ScriptedVad::new(vec![]),
            LetterAsr,
            IdentityPunctuation,
            accurate,
        )),
        ..Default::default()
    })
    .await;
    let mut ws = WsClient::connect(&app.ws_url()).await;
    ws.send_event("start_recording", json!({})).await;
    ws.expect_event("recording_started").await;
    ws.speak("abc").await;

    ws.send_event("stop_recording", json!({})).await;
    ws.send_event("stop_recording", json!({})).await;
    let (first, _) = ws.wait_for("final_result").await;
    assert_eq!(first["data"]["fast_transcript"], "abc");

    // a late third stop is answered from the finished-session cache
    ws.send_event("stop_recording", json!({})).await;
    let (cached, _) = ws.wait_for("final_result").await;
    assert_eq!(cached["data"], first["data"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn close_right_after_stop_still_finalizes() {
    let (accurate, calls) = TaggedAccurate::counted();
    let app = TestApp::spawn_with(TestOptions {
        engines: Some(testing::engines(
            ScriptedVad::new(vec![]),
            LetterAsr,
            IdentityPunctuation,
            accurate,
        )),
        ..Default::default()
    })
    .await;
    let mut ws = WsClient::connect(&app.ws_url()).await;
    let id = SessionId::from(ws.session_id.as_str());
    ws.send_event("start_recording", json!({})).await;
    ws.expect_event("recording_started").await;
    ws.speak("ab").await;

    ws.send_event("stop_recording", json!({})).await;
    ws.close().await;

    app.wait_until(|engine| engine.finished_result(&id).is_some()).await;
    let result = app.engine.finished_result(&id).unwrap();
    assert_eq!(result.fast_transcript, "ab");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(app.engine.held_count(), 0);
    assert_eq!(app.engine.active_count(), 0);
}

#[tokio::test]
async fn resume_after_disconnect_restores_text() {
    let app = TestApp::spawn().await;

    let mut first = WsClient::connect(&app.ws_url()).await;
    let original = first.session_id.clone();
    first.send_event("start_recording", json!({})).await;
    first.expect_event("recording_started").await;
    first.speak("ab").await;
    first.close().await;
    app.wait_until(|engine| engine.held_count() == 1).await;

    let mut second = WsClient::connect(&app.ws_url()).await;
    second
        .send_event("resume_recording", json!({ "session_id": original }))
        .await;
    let resumed = second.expect_event("resume_result").await;
    assert_eq!(resumed["data"]["success"], true);
    assert_eq!(resumed["data"]["session_id"], second.session_id.as_str());
    assert_eq!(resumed["data"]["current_text"], "ab");
    assert_eq!(resumed["data"]["duration"], 1.2);

    let ticks = second.speak("c").await;
    assert_eq!(ticks[0]["full_text"], "abc");

    second.send_event("stop_recording", json!({})).await;
    let (result, _) = second.wait_for("final_result").await;
    assert_eq!(result["data"]["fast_transcript"], "abc");
}

#[tokio::test]
async fn resume_after_grace_period_fails() {
    let app = TestApp::spawn_with(TestOptions {
        config: TranscriptionConfig {
            grace_period_secs: 0,
            ..Default::default()
        },
        ..Default::default()
    })
    .await;

    let mut first = WsClient::connect(&app.ws_url()).await;
    let original = first.session_id.clone();
    first.send_event("start_recording", json!({})).await;
    first.expect_event("recording_started").await;
    first.speak("x").await;
    first.close().await;
    app.wait_until(|engine| engine.held_count() == 1).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let mut second = WsClient::connect(&app.ws_url()).await;
    second
        .send_event("resume_recording", json!({ "session_id": original }))
        .await;
    let resumed = second.expect_event("resume_result").await;
    assert_eq!(resumed["data"]["success"], false);
    assert!(resumed["data"].get("current_text").is_none());
    assert_eq!(app.engine.held_count(), 0);
}

#[tokio::test]
async fn resume_unknown_session_fails() {
    let app = TestApp::spawn().await;
    let mut ws = WsClient::connect(&app.ws_url()).await;
    ws.send_event("resume_recording", json!({ "session_id": "nobody" }))
        .await;
    let resumed = ws.expect_event("resume_result").await;
    assert_eq!(resumed["data"]["success"], false);
    assert_eq!(resumed["data"]["session_id"], "nobody");
}

#[tokio::test]
async fn concurrent_connections_stay_isolated() {
    let app = Arc::new(TestApp::spawn().await);

    let mut tasks = Vec::new();
    for word in ["pqrs", "wxyz", "efgh"] {
        let app = app.clone();
        tasks.push(tokio::spawn(async move {
            let mut ws = WsClient::connect(&app.ws_url()).await;
            ws.send_event("start_recording", json!({})).await;
            ws.expect_event("recording_started").await;
            ws.speak(word).await;
            ws.send_event("stop_recording", json!({})).await;
            let (result, _) = ws.wait_for("final_result").await;
            (word, result)
        }));
    }

    for task in tasks {
        let (word, result): (&str, Value) = task.await.unwrap();
        assert_eq!(result["data"]["fast_transcript"], word);
        assert_eq!(result["data"]["accurate_transcript"], word);
    }
}

#[tokio::test]
async fn corrector_output_becomes_final_transcript() {
    let app = TestApp::spawn_with(TestOptions {
        corrector: Some(Arc::new(testing::FixedCorrector("Hello there.".to_string()))),
        ..Default::default()
    })
    .await;
    let mut ws = WsClient::connect(&app.ws_url()).await;
    ws.send_event("start_recording", json!({})).await;
    ws.expect_event("recording_started").await;
    ws.speak("hi").await;

    ws.send_event("stop_recording", json!({})).await;
    let (result, _) = ws.wait_for("final_result").await;
    assert_eq!(result["data"]["final_transcript"], "Hello there.");
    assert_eq!(result["data"]["corrected"], true);
    assert_eq!(result["data"]["accurate_transcript"], "hi");
}
