use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chat_relay::{
    providers::{CapabilityTable, Modality, NotificationSink, StaticCredentialStore},
    router, AppState, Env,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use tower::ServiceExt;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const CHAT_PATH: &str = "/api/v1/chat/completions";
const MODELS_PATH: &str = "/api/v1/models";

#[derive(Default)]
struct RecordingSink(Mutex<Vec<String>>);

impl NotificationSink for RecordingSink {
    fn notify_model_unavailable(&self, model: &str, _raw_detail: &str) {
        self.0.lock().unwrap().push(model.to_owned());
    }
}

fn state_for(base_url: String, table: CapabilityTable) -> AppState {
    let env = Env {
        upstream_base_url: base_url,
        ..Env::default()
    };
    state_with_env(env, table)
}

fn state_with_env(env: Env, table: CapabilityTable) -> AppState {
    AppState::from_parts(
        env,
        Arc::new(StaticCredentialStore("sk-or-test".to_owned())),
        Arc::new(table),
    )
    .unwrap()
}

fn app(server: &MockServer) -> Router {
    app_with_table(server, CapabilityTable::new())
}

fn app_with_table(server: &MockServer, table: CapabilityTable) -> Router {
    router(Arc::new(state_for(format!("{}/api/v1", server.uri()), table)))
}

fn chat(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", "Bearer not-a-real-key")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(res: axum::response::Response) -> String {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(res: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(res).await).unwrap()
}

/// Payloads of every `data:` frame, in order.
fn frames(sse: &str) -> Vec<String> {
    sse.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(str::to_owned)
        .collect()
}

fn hello_request() -> Value {
    json!({
        "model": "openai/gpt-4o-mini",
        "messages": [{"role": "user", "content": "Say hello"}],
        "max_completion_tokens": 64,
    })
}

fn image_request(stream: bool) -> Value {
    json!({
        "model": "meta-llama/llama-3-8b-instruct",
        "stream": stream,
        "messages": [{
            "role": "user",
            "content": [
                {"type": "text", "text": "What is in this picture?"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
            ]
        }],
    })
}

fn text_only_table() -> CapabilityTable {
    CapabilityTable::from_entries([("meta-llama/llama-3-8b-instruct", [Modality::Text])])
}

#[tokio::test]
async fn buffered_chat_is_translated_back_to_the_requested_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(header("authorization", "Bearer sk-or-test"))
        .and(body_partial_json(json!({
            "model": "openai/gpt-4o-mini",
            "stream": false,
            "max_tokens": 64,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "gen-123",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "openai/gpt-4o-mini-2024-07-18",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello!"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let res = app(&server).oneshot(chat(hello_request())).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.headers()["access-control-allow-origin"], "*");

    let body = body_json(res).await;
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "openai/gpt-4o-mini");
    assert_eq!(body["id"], "gen-123");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello!");
    assert_eq!(body["usage"]["total_tokens"], 5);
}

#[tokio::test]
async fn missing_bearer_is_rejected_before_any_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let req = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(hello_request().to_string()))
        .unwrap();
    let res = app(&server).oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(res).await;
    assert_eq!(body["error"]["type"], "authentication_error");
    assert_eq!(body["error"]["code"], "invalid_api_key");
}

#[tokio::test]
async fn image_for_text_only_model_is_rejected_locally() {
    for stream in [false, true] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let res = app_with_table(&server, text_only_table())
            .oneshot(chat(image_request(stream)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "stream={}", stream);
        let body = body_json(res).await;
        assert_eq!(body["error"]["code"], "unsupported_image_input");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("meta-llama/llama-3-8b-instruct"));
    }
}

#[tokio::test]
async fn upstream_rate_limit_is_reported_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit exceeded: free-models-per-day", "code": 429}
        })))
        .mount(&server)
        .await;

    let res = app(&server).oneshot(chat(hello_request())).await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(res).await;
    assert_eq!(body["error"]["type"], "rate_limit_error");
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.starts_with("Rate Limited"));
    assert!(!message.contains("{\"error\""));
}

#[tokio::test]
async fn streaming_success_ends_with_a_single_marker() {
    let server = MockServer::start().await;
    let sse = concat!(
        ": OPENROUTER PROCESSING\n\n",
        "data: {\"id\":\"gen-9\",\"created\":1,\"model\":\"x\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
        "data: {\"id\":\"gen-9\",\"created\":1,\"model\":\"x\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let mut request = hello_request();
    request["stream"] = json!(true);
    let res = app(&server).oneshot(chat(request)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "text/event-stream");

    let frames = frames(&body_text(res).await);
    assert_eq!(frames.len(), 3);
    assert_eq!(frames.iter().filter(|f| *f == "[DONE]").count(), 1);
    assert_eq!(frames.last().unwrap(), "[DONE]");
    let first: Value = serde_json::from_str(&frames[0]).unwrap();
    assert_eq!(first["model"], "openai/gpt-4o-mini");
    assert_eq!(first["choices"][0]["delta"]["content"], "Hel");
}

#[tokio::test]
async fn streaming_unavailable_model_becomes_a_chunk_and_notifies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"message": "No endpoints found for foo/bar.", "code": 404}
        })))
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let mut state = state_for(format!("{}/api/v1", server.uri()), CapabilityTable::new());
    let notifier: Arc<dyn NotificationSink> = sink.clone();
    state.notifier = notifier;
    let app = router(Arc::new(state));

    let res = app
        .oneshot(chat(json!({
            "model": "foo/bar",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}],
        })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let frames = frames(&body_text(res).await);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1], "[DONE]");
    let chunk: Value = serde_json::from_str(&frames[0]).unwrap();
    let content = chunk["choices"][0]["delta"]["content"].as_str().unwrap();
    assert!(content.starts_with("Model Unavailable"));
    assert!(content.contains("Suggested alternatives"));
    assert_eq!(*sink.0.lock().unwrap(), vec!["foo/bar".to_owned()]);
}

#[tokio::test]
async fn streaming_to_an_unreachable_upstream_still_completes() {
    let app = router(Arc::new(state_for(
        "http://127.0.0.1:1/api/v1".to_owned(),
        CapabilityTable::new(),
    )));
    let mut request = hello_request();
    request["stream"] = json!(true);

    let res = app.oneshot(chat(request)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let frames = frames(&body_text(res).await);
    assert_eq!(frames.len(), 2);
    let chunk: Value = serde_json::from_str(&frames[0]).unwrap();
    assert!(chunk["choices"][0]["delta"]["content"]
        .as_str()
        .unwrap()
        .starts_with("Network Error"));
    assert_eq!(frames[1], "[DONE]");
}

#[tokio::test]
async fn identical_requests_are_both_served() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "gen-1",
            "created": 1,
            "choices": [{"index": 0, "message": {"content": "ok"}, "finish_reason": "stop"}]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let app = app(&server);
    for _ in 0..2 {
        let res = app.clone().oneshot(chat(hello_request())).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    }
}

#[tokio::test]
async fn preflight_is_answered_without_routing() {
    let server = MockServer::start().await;
    let req = Request::builder()
        .method("OPTIONS")
        .uri("/v1/chat/completions")
        .header("origin", "vscode-webview://abc")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();
    let res = app(&server).oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
    assert!(res.headers()["access-control-allow-methods"]
        .to_str()
        .unwrap()
        .contains("POST"));
    assert!(res.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn models_are_filtered_and_feed_capability_checks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MODELS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": "meta-llama/llama-3-8b-instruct", "name": "Llama 3 8B", "created": 1,
                 "pricing": {"prompt": "0.00000003", "completion": "0.00000006"},
                 "architecture": {"input_modalities": ["text"]}},
                {"id": "google/gemma-3-27b-it:free", "name": "Gemma 3 27B (free)", "created": 2,
                 "pricing": {"prompt": "0", "completion": "0"},
                 "architecture": {"input_modalities": ["text", "image"]}}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let app = app(&server);
    let res = app.clone().oneshot(get("/v1/models?mode=free")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["object"], "list");
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["id"], "google/gemma-3-27b-it:free");
    assert_eq!(data[0]["owned_by"], "google");

    // Served from cache through the alias.
    let res = app.clone().oneshot(get("/models?provider=meta-llama")).await.unwrap();
    assert_eq!(body_json(res).await["data"].as_array().unwrap().len(), 1);

    let res = app.oneshot(chat(image_request(false))).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_mode_is_a_validation_error() {
    let server = MockServer::start().await;
    let res = app(&server).oneshot(get("/v1/models?mode=cheap")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn health_reports_version() {
    let server = MockServer::start().await;
    let res = app(&server).oneshot(get("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn buffered_non_json_success_is_an_internal_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>maintenance</html>", "text/html"))
        .mount(&server)
        .await;

    let res = app(&server).oneshot(chat(hello_request())).await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(res).await;
    assert_eq!(body["error"]["code"], "internal_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("could not be parsed"));
    assert!(body.get("choices").is_none());
}

#[tokio::test]
async fn buffered_upstream_failures_keep_status_and_code() {
    for (status, code) in [(503, "upstream_unreachable"), (500, "internal_error")] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": {"message": "Service temporarily unavailable"}
            })))
            .mount(&server)
            .await;

        let res = app(&server).oneshot(chat(hello_request())).await.unwrap();
        assert_eq!(res.status().as_u16(), status);
        let body = body_json(res).await;
        assert_eq!(body["error"]["code"], code, "status {}", status);
        assert!(body["error"]["message"].as_str().unwrap().contains("retry"));
    }
}

#[tokio::test]
async fn buffered_timeout_is_reported_as_408() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "late"}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let env = Env {
        upstream_base_url: format!("{}/api/v1", server.uri()),
        chat_timeout: Duration::from_millis(200),
        ..Env::default()
    };
    let app = router(Arc::new(state_with_env(env, CapabilityTable::new())));
    let res = app.oneshot(chat(hello_request())).await.unwrap();
    assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);
    let body = body_json(res).await;
    assert_eq!(body["error"]["code"], "upstream_timeout");
    assert_eq!(body["error"]["type"], "network_error");
}

/// Serves one streaming response that promises more bytes than it sends, so
/// the client sees a frame and then a broken body.
async fn truncated_stream_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_lowercase();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length: usize = text
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0);
                if request.len() >= head_end + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }
        let frame = "data: {\"id\":\"gen-1\",\"created\":1,\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n";
        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\n\r\n",
            frame.len() + 1000
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(frame.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        socket.shutdown().await.ok();
    });
    format!("http://{}/api/v1", addr)
}

#[tokio::test]
async fn stream_broken_after_frames_ends_with_one_error_chunk() {
    let base_url = truncated_stream_upstream().await;
    let app = router(Arc::new(state_for(base_url, CapabilityTable::new())));
    let mut request = hello_request();
    request["stream"] = json!(true);

    let res = app.oneshot(chat(request)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let frames = frames(&body_text(res).await);
    assert_eq!(frames.len(), 3, "{:?}", frames);

    let first: Value = serde_json::from_str(&frames[0]).unwrap();
    assert_eq!(first["choices"][0]["delta"]["content"], "Hel");
    let error: Value = serde_json::from_str(&frames[1]).unwrap();
    assert!(error["choices"][0]["delta"]["content"]
        .as_str()
        .unwrap()
        .starts_with("Network Error"));
    assert_eq!(frames[2], "[DONE]");
    assert_eq!(frames.iter().filter(|f| *f == "[DONE]").count(), 1);
}

#[tokio::test]
async fn each_response_carries_its_own_request_id() {
    let server = MockServer::start().await;
    let app = app(&server);

    let mut ids = Vec::new();
    for _ in 0..2 {
        let res = app.clone().oneshot(get("/health")).await.unwrap();
        let id = res.headers()["x-request-id"].to_str().unwrap().to_owned();
        assert!(uuid::Uuid::parse_str(&id).is_ok(), "{}", id);
        ids.push(id);
    }
    assert_ne!(ids[0], ids[1]);
}
