//! HTTP-level tests for the speech synthesizer.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use jarvis::config::TtsConfig;
use jarvis::speech::{HttpSpeechSynthesizer, SpeechSynthesizer, Voice};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> TtsConfig {
    TtsConfig {
        base_url: server.uri(),
        api_key: Some("tts-secret".into()),
        ..TtsConfig::default()
    }
}

#[tokio::test]
async fn sends_voice_and_speed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .and(header("authorization", "Bearer tts-secret"))
        .and(body_partial_json(json!({
            "model": "tts-1",
            "input": "Right away, sir.",
            "voice": "en-GB-RyanNeural",
            "response_format": "mp3",
            "speed": 1.5,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp3-bytes".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let synth = HttpSpeechSynthesizer::new(&config(&server)).unwrap();
    let audio = synth
        .synthesize("Right away, sir.", &Voice::new("en-GB-RyanNeural", "+50%"))
        .await
        .unwrap();
    assert_eq!(audio.as_ref(), b"mp3-bytes");
}

#[tokio::test]
async fn empty_audio_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let synth = HttpSpeechSynthesizer::new(&config(&server)).unwrap();
    let err = synth
        .synthesize("Hello.", &Voice::new("en-GB-RyanNeural", "+0%"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SPEECH_FAILED");
}

#[tokio::test]
async fn server_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .respond_with(ResponseTemplate::new(500).set_body_string("voice not found"))
        .mount(&server)
        .await;

    let synth = HttpSpeechSynthesizer::new(&config(&server)).unwrap();
    let err = synth
        .synthesize("Hello.", &Voice::new("missing-voice", "+0%"))
        .await
        .unwrap_err();
    assert!(err.message().contains("voice not found"));
}
