//! End-to-end tests: real HTTP server, mocked chat, search and speech APIs.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jarvis::config::AssistantConfig;
use jarvis::error::RATE_LIMIT_MESSAGE;
use jarvis::server::{self, ApiServer};
use jarvis::startup;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FAKE_AUDIO: &[u8] = b"ID3-fake-mp3-frame";

struct Harness {
    dir: TempDir,
    llm: MockServer,
    search: MockServer,
    speech: MockServer,
    api: ApiServer,
    http: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let llm = MockServer::start().await;
        let search = MockServer::start().await;
        let speech = MockServer::start().await;

        let mut config = AssistantConfig::default();
        config.llm.api_keys = vec!["gsk-test-key-0000".into()];
        config.llm.base_url = llm.uri();
        config.search.api_key = Some("tvly-test-key".into());
        config.search.base_url = search.uri();
        config.search.cache_ttl_secs = 0;
        config.tts.base_url = speech.uri();
        config.tts.drain_timeout_secs = 5;
        config.session.chats_dir = dir.path().join("chats");
        config.retrieval.learning_data_dir = dir.path().join("learning");
        config.ensure_dirs().unwrap();
        std::fs::write(
            config.retrieval.learning_data_dir.join("profile.txt"),
            "The user lives in Paris and enjoys jazz on Sunday evenings.",
        )
        .unwrap();

        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "audio/mpeg")
                    .set_body_bytes(FAKE_AUDIO),
            )
            .mount(&speech)
            .await;

        let state = startup::build_state(&config).await.unwrap();
        let app = server::router(state, true);
        let api = ApiServer::start(app, "127.0.0.1", 0, CancellationToken::new())
            .await
            .unwrap();

        Self {
            dir,
            llm,
            search,
            speech,
            api,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("http://{}{route}", self.api.addr())
    }

    fn chats_dir(&self) -> PathBuf {
        self.dir.path().join("chats")
    }

    async fn post(&self, route: &str, body: Value) -> reqwest::Response {
        self.http.post(self.url(route)).json(&body).send().await.unwrap()
    }
}

fn completion(text: &str) -> Value {
    json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": text}}]})
}

fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::new();
    for d in deltas {
        let chunk = json!({"choices": [{"delta": {"content": d}}]});
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

async fn mount_stream(server: &MockServer, deltas: &[&str]) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(deltas)),
        )
        .mount(server)
        .await;
}

/// Every `data:` frame of an SSE body, parsed as JSON.
fn frames(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim_start()).unwrap())
        .collect()
}

#[tokio::test]
async fn index_and_health() {
    let h = Harness::start().await;

    let index: Value = h.http.get(h.url("/api")).send().await.unwrap().json().await.unwrap();
    assert_eq!(index["message"], "J.A.R.V.I.S API");
    assert!(index["endpoints"]["/chat/realtime/stream"].is_string());

    let health: Value = h.http.get(h.url("/health")).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["vector_store"], true);
    assert_eq!(health["realtime_service"], true);
    assert_eq!(health["tts_service"], true);
}

#[tokio::test]
async fn chat_persists_session_and_serves_history() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Good evening, sir.")))
        .mount(&h.llm)
        .await;

    let response = h
        .http
        .post(h.url("/chat"))
        .header("origin", "http://localhost:5173")
        .json(&json!({"message": "Good evening"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["response"], "Good evening, sir.");
    let session_id = body["session_id"].as_str().unwrap().to_owned();

    let file = h
        .chats_dir()
        .join(format!("chat_{}.json", session_id.replace('-', "")));
    let saved: Value = serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
    assert_eq!(saved["messages"].as_array().unwrap().len(), 2);

    let history: Value = h
        .http
        .get(h.url(&format!("/chat/history/{session_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["session_id"], session_id.as_str());
    assert_eq!(
        history["messages"],
        json!([
            {"role": "user", "content": "Good evening"},
            {"role": "assistant", "content": "Good evening, sir."}
        ])
    );
}

#[tokio::test]
async fn realtime_stream_sends_search_results_before_audio() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": false, "max_tokens": 50})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("weather in Paris today")))
        .mount(&h.llm)
        .await;
    mount_stream(
        &h.llm,
        &["It is sunny in Paris today, sir. ", "Expect a high of twenty one degrees."],
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(body_partial_json(json!({"query": "weather in Paris today"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "answer": "Sunny with a high of 21C.",
            "results": [
                {"title": "Paris forecast", "url": "https://weather.example/paris", "content": "Sunny all day.", "score": 0.934}
            ]
        })))
        .expect(1)
        .mount(&h.search)
        .await;

    let response = h
        .post(
            "/chat/realtime/stream",
            json!({"message": "What's the weather in Paris?", "tts": true}),
        )
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["cache-control"], "no-cache");
    assert_eq!(response.headers()["x-accel-buffering"], "no");
    let events = frames(&response.text().await.unwrap());

    let session_id = events[0]["session_id"].as_str().unwrap().to_owned();
    assert_eq!(events[0]["done"], false);

    let search: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.get("search_results").is_some())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(search.len(), 1);
    let payload = &events[search[0]]["search_results"];
    assert_eq!(payload["query"], "weather in Paris today");
    assert_eq!(payload["results"][0]["score"], 0.93);

    let audio: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.get("audio").is_some())
        .map(|(i, _)| i)
        .collect();
    assert!(!audio.is_empty());
    assert!(search[0] < audio[0]);
    let decoded = STANDARD
        .decode(events[audio[0]]["audio"].as_str().unwrap())
        .unwrap();
    assert_eq!(decoded, FAKE_AUDIO);

    let text: String = events
        .iter()
        .filter(|e| e["done"] == false)
        .filter_map(|e| e["chunk"].as_str())
        .collect();
    assert_eq!(
        text,
        "It is sunny in Paris today, sir. Expect a high of twenty one degrees."
    );

    let last = events.last().unwrap();
    assert_eq!(last["done"], true);
    assert_eq!(last["session_id"], session_id.as_str());
    assert!(last.get("error").is_none());

    let requests = h.llm.received_requests().await.unwrap();
    let streamed = requests
        .iter()
        .find(|r| String::from_utf8_lossy(&r.body).contains("\"stream\":true"))
        .unwrap();
    let prompt = String::from_utf8_lossy(&streamed.body);
    assert!(prompt.contains("https://weather.example/paris"));
    assert!(prompt.contains("enjoys jazz"));
    assert!(!h.speech.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn general_stream_without_tts_has_no_audio() {
    let h = Harness::start().await;
    mount_stream(&h.llm, &["Certainly, sir. ", "Done."]).await;

    let response = h.post("/chat/stream", json!({"message": "Say done"})).await;
    let events = frames(&response.text().await.unwrap());

    assert!(events.iter().all(|e| e.get("audio").is_none()));
    assert!(events.iter().all(|e| e.get("search_results").is_none()));
    assert_eq!(events.last().unwrap()["done"], true);
    assert!(h.search.received_requests().await.unwrap().is_empty());
    assert!(h.speech.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn cors_preflight_is_answered() {
    let h = Harness::start().await;
    let response = h
        .http
        .request(reqwest::Method::OPTIONS, h.url("/chat/stream"))
        .header("origin", "http://localhost:5173")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert!(response.headers().contains_key("access-control-allow-methods"));
    assert!(h.llm.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn upstream_failure_before_output_ends_with_error_event() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&h.llm)
        .await;

    let response = h.post("/chat/stream", json!({"message": "hello"})).await;
    assert_eq!(response.status(), 200);
    let events = frames(&response.text().await.unwrap());
    let last = events.last().unwrap();
    assert_eq!(last["done"], true);
    assert!(last["error"].as_str().unwrap().contains("unable to process"));
}

#[tokio::test]
async fn upstream_error_after_text_ends_with_error_event() {
    let h = Harness::start().await;
    let body = format!(
        "data: {}\n\ndata: {}\n\n",
        json!({"choices": [{"delta": {"content": "Working on it, sir. "}}]}),
        json!({"error": {"message": "connection reset"}}),
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&h.llm)
        .await;

    let response = h.post("/chat/stream", json!({"message": "hello"})).await;
    assert_eq!(response.status(), 200);
    let events = frames(&response.text().await.unwrap());

    let text_at = events
        .iter()
        .position(|e| e.get("chunk").and_then(Value::as_str).is_some_and(|c| !c.is_empty()))
        .expect("text before the error");
    let errors: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.get("error").is_some())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(errors, vec![events.len() - 1]);
    assert!(text_at < events.len() - 1);
    let last = events.last().unwrap();
    assert_eq!(last["done"], true);
    assert!(last["error"].is_string());
    let text: String = events
        .iter()
        .filter_map(|e| e.get("chunk").and_then(Value::as_str))
        .collect();
    assert_eq!(text, "Working on it, sir. ");
}

#[tokio::test]
async fn rate_limited_chat_returns_429() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limit exceeded"))
        .mount(&h.llm)
        .await;

    let response = h.post("/chat", json!({"message": "hello"})).await;
    assert_eq!(response.status(), 429);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], RATE_LIMIT_MESSAGE);
}

#[tokio::test]
async fn invalid_input_is_rejected() {
    let h = Harness::start().await;

    let traversal = h
        .post("/chat", json!({"message": "hi", "session_id": "../etc/passwd"}))
        .await;
    assert_eq!(traversal.status(), 400);
    let body: Value = traversal.json().await.unwrap();
    assert!(body["detail"].is_string());

    let empty = h.post("/chat", json!({"message": ""})).await;
    assert_eq!(empty.status(), 400);

    let malformed = h.post("/chat", json!({"text": "wrong field"})).await;
    assert_eq!(malformed.status(), 422);

    assert!(h.llm.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn tts_endpoint_returns_audio() {
    let h = Harness::start().await;

    let response = h.post("/tts", json!({"text": "Good morning, sir."})).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "audio/mpeg");
    assert_eq!(response.bytes().await.unwrap().as_ref(), FAKE_AUDIO);

    let blank = h.post("/tts", json!({"text": "   "})).await;
    assert_eq!(blank.status(), 400);
    let body: Value = blank.json().await.unwrap();
    assert_eq!(body["detail"], "Text is required");
}

#[tokio::test]
async fn shutdown_stops_accepting_connections() {
    let h = Harness::start().await;
    let url = h.url("/api");
    h.api.shutdown().await;
    assert!(reqwest::get(url).await.is_err());
}
