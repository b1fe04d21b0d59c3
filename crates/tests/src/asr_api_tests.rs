use scribe_transcription::testing::{self, FailingAccurate, IdentityPunctuation, LetterAsr, ScriptedVad};
use serde_json::Value;

use crate::fixtures::test_app::{TestApp, TestOptions, wav_from_pcm};

fn upload(file_name: &str, bytes: Vec<u8>) -> reqwest::multipart::Form {
    reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string()),
    )
}

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::spawn().await;
    let resp = app.get("/health").send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn transcribe_wav_without_timestamps() {
    let app = TestApp::spawn().await;
    let wav = wav_from_pcm(&testing::spoken("hey"));

    let resp = app
        .post("/api/asr/transcribe")
        .multipart(upload("clip.wav", wav))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["text"], "hey");
    assert_eq!(json["length"], 3);
    assert!(json.get("timestamps").is_none());
}

#[tokio::test]
async fn transcribe_pcm_with_timestamps() {
    let app = TestApp::spawn_with(TestOptions {
        engines: Some(testing::engines(
            ScriptedVad::new(vec![]).offline(vec![(0, 1200), (1200, 2400)]),
            LetterAsr,
            IdentityPunctuation,
            testing::TaggedAccurate::default(),
        )),
        config: scribe_transcription::TranscriptionConfig {
            merge_min_segment_ms: 600,
            min_segment_ms: 600,
            ..Default::default()
        },
        ..Default::default()
    })
    .await;

    let resp = app
        .post("/api/asr/transcribe?timestamps=true")
        .multipart(upload("clip.pcm", testing::spoken("abcd")))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["text"], "ab cd");
    let timestamps = json["timestamps"].as_array().unwrap();
    assert_eq!(timestamps.len(), 2);
    assert_eq!(timestamps[0]["text"], "ab");
    assert_eq!(timestamps[0]["start_ms"], 0);
    assert_eq!(timestamps[1]["start_ms"], 1200);
    assert_eq!(timestamps[1]["end_ms"], 2400);
}

#[tokio::test]
async fn transcribe_rejects_unsupported_format() {
    let app = TestApp::spawn().await;
    let resp = app
        .post("/api/asr/transcribe")
        .multipart(upload("clip.mp3", vec![1, 2, 3, 4]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 415);
    let json: Value = resp.json().await.unwrap();
    assert!(json["message"].as_str().unwrap().contains("wav"));
}

#[tokio::test]
async fn transcribe_requires_file_field() {
    let app = TestApp::spawn().await;
    let form = reqwest::multipart::Form::new().text("note", "no audio here");
    let resp = app
        .post("/api/asr/transcribe")
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn transcribe_reports_engine_failure() {
    let app = TestApp::spawn_with(TestOptions {
        engines: Some(testing::engines(
            ScriptedVad::new(vec![]),
            LetterAsr,
            IdentityPunctuation,
            FailingAccurate,
        )),
        ..Default::default()
    })
    .await;
    let resp = app
        .post("/api/asr/transcribe")
        .multipart(upload("clip.pcm", testing::spoken("a")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 500);
}

#[tokio::test]
async fn formats_and_models() {
    let app = TestApp::spawn().await;
    let formats: Value = app
        .get("/api/asr/formats")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(formats, serde_json::json!(["wav", "pcm"]));

    let models: Value = app
        .get("/api/asr/models")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = models["engines"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"letter_asr"));
    assert!(names.contains(&"tagged_accurate"));
}

#[tokio::test]
async fn hotwords_list_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hotwords.json");
    std::fs::write(&path, r#"{ "hotwords": ["Paraformer"] }"#).unwrap();

    let app = TestApp::spawn_with(TestOptions {
        hotwords_path: Some(path.clone()),
        ..Default::default()
    })
    .await;

    let json: Value = app
        .get("/api/asr/hotwords")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["count"], 1);
    assert_eq!(json["hotwords"][0], "Paraformer");
    assert_eq!(json["file_path"], path.display().to_string());

    std::fs::write(&path, r#"{ "hotwords": ["Paraformer", "SenseVoice"] }"#).unwrap();
    let resp = app.post("/api/asr/hotwords/reload").send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["count"], 2);

    // a broken file keeps the previous list
    std::fs::write(&path, "not json").unwrap();
    let resp = app.post("/api/asr/hotwords/reload").send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let json: Value = app
        .get("/api/asr/hotwords")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["count"], 2);
}
