//! # 中继服务端到端测试
//!
//! 路由绑定到临时端口，上游由 wiremock 提供。

use pretty_assertions::assert_eq;
use relay_gateway::config::parse_config;
use relay_gateway::error::HIDDEN_UPSTREAM_MESSAGE;
use relay_gateway::relay::PING_FRAME;
use relay_gateway::server::{RelayState, create_router};
use serde_json::{Value, json};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_toml(upstream: &str, extra_relay: &str) -> String {
    format!(
        r#"
[relay]
ping_interval_seconds = 1
{extra_relay}

[[channels]]
id = 1
type = "openai"
base_url = "{upstream}"
keys = ["sk-openai"]
models = ["gpt-4o", "whisper-1"]

[channels.model_mapping]
"gpt-4o" = "gpt-4o-2024-08-06"

[[channels]]
id = 14
type = "claude"
base_url = "{upstream}"
keys = ["sk-ant"]
models = ["claude-3-5-haiku-20241022"]

[[channels]]
id = 99
type = "openai"
base_url = "http://127.0.0.1:1"
keys = ["sk-dead"]
models = ["dead-model"]
"#
    )
}

async fn spawn_relay(upstream: &str, extra_relay: &str) -> SocketAddr {
    let config = parse_config(&config_toml(upstream, extra_relay)).unwrap();
    let state = RelayState::from_config(&config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn health_reports_channel_count() {
    let upstream = MockServer::start().await;
    let addr = spawn_relay(&upstream.uri(), "").await;

    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "ok", "channels": 3}));
}

#[tokio::test]
async fn chat_completion_is_relayed_with_mapped_model() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-openai"))
        .and(wiremock::matchers::body_partial_json(json!({"model": "gpt-4o-2024-08-06"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-9",
            "choices": [],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}
        })))
        .expect(1)
        .mount(&upstream)
        .await;
    let addr = spawn_relay(&upstream.uri(), "").await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], "chatcmpl-9");
}

#[tokio::test]
async fn upstream_error_status_is_preserved() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(529).set_body_json(json!({"type": "error", "error": {"type": "overloaded_error"}})),
        )
        .mount(&upstream)
        .await;
    let addr = spawn_relay(&upstream.uri(), "").await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/v1/messages"))
        .json(&json!({"model": "claude-3-5-haiku-20241022", "max_tokens": 16, "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 529);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "overloaded_error");
}

#[tokio::test]
async fn unknown_model_has_no_channel() {
    let upstream = MockServer::start().await;
    let addr = spawn_relay(&upstream.uri(), "").await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({"model": "llama-3", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "no_available_channel");
}

#[tokio::test]
async fn transport_failure_returns_hidden_message() {
    let upstream = MockServer::start().await;
    let addr = spawn_relay(&upstream.uri(), "").await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({"model": "dead-model", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], HIDDEN_UPSTREAM_MESSAGE);
    assert!(!body.to_string().contains("127.0.0.1"));
}

#[tokio::test]
async fn stream_starts_with_pings_while_upstream_is_slow() {
    let upstream = MockServer::start().await;
    let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(std::time::Duration::from_millis(2500))
                .set_body_raw(sse, "text/event-stream"),
        )
        .mount(&upstream)
        .await;
    let addr = spawn_relay(&upstream.uri(), "").await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4o", "stream": true, "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.headers()["content-type"], "text/event-stream");

    let text = response.text().await.unwrap();
    let ping = std::str::from_utf8(PING_FRAME).unwrap();
    assert!(text.starts_with(ping));
    let data_at = text.find("data:").unwrap();
    assert!(!text[data_at..].contains(ping));
    assert!(text.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn audio_transcription_is_forwarded_as_form() {
    let upstream = MockServer::start().await;
    let content_type = "multipart/form-data; boundary=audio-b0undary";
    let form = "--audio-b0undary\r\nContent-Disposition: form-data; name=\"model\"\r\n\r\nwhisper-1\r\n--audio-b0undary--\r\n";
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .and(header("content-type", content_type))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "hello"})))
        .expect(1)
        .mount(&upstream)
        .await;
    let addr = spawn_relay(&upstream.uri(), "").await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/v1/audio/transcriptions"))
        .header("content-type", content_type)
        .body(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["text"], "hello");
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let upstream = MockServer::start().await;
    let addr = spawn_relay(&upstream.uri(), "debug = true").await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/v1/chat/completions"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}
