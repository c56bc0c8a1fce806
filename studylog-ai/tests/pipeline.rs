//! End-to-end pipeline tests: tier → parameters → provider stream → chunk
//! protocol → validated payload.
//!
//! The provider is a one-shot HTTP server on localhost that replays a canned
//! server-sent-event body, so no network or API key is needed. Run with
//! `RUST_LOG=studylog_ai=debug` to see pipeline decisions.

use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use studylog_ai::{
    AiError, AiMessage, ChatRequest, ConfigResolver, DeploymentTier, Feature, LlmClient, LlmProvider,
    StreamAccumulator, StreamChunk, StreamState, collect_stream,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExerciseSuggestion {
    title: String,
    minutes: u32,
}

fn safe_suggestion() -> ExerciseSuggestion {
    ExerciseSuggestion {
        title: "Review yesterday's notes".into(),
        minutes: 10,
    }
}

// ---------------------------------------------------------------------------
// Fake provider
// ---------------------------------------------------------------------------

fn sse_delta(piece: &str) -> String {
    let event = json!({ "choices": [{ "delta": { "content": piece }, "finish_reason": null }] });
    format!("data: {event}\n\n")
}

fn sse_finish() -> String {
    let event = json!({ "choices": [{ "delta": {}, "finish_reason": "stop" }] });
    format!("data: {event}\n\n")
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_request(sock: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        let n = sock.read(&mut tmp).await.expect("read request");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Serve one response, returning the base URL and the captured request.
async fn serve_once(status_line: &'static str, body: String) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (req_tx, req_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.expect("accept");
        let request = read_request(&mut sock).await;
        let _ = req_tx.send(request);
        let response = format!(
            "{status_line}\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        sock.write_all(response.as_bytes()).await.expect("write response");
        let _ = sock.shutdown().await;
    });

    (format!("http://{addr}"), req_rx)
}

/// Accept one connection, read the request, then never answer.
async fn serve_silent() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.expect("accept");
        let _ = read_request(&mut sock).await;
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        drop(sock);
    });

    format!("http://{addr}")
}

fn client_for(base_url: String) -> LlmClient {
    let http = reqwest::Client::builder().no_proxy().build().expect("http client");
    LlmClient::with_http(
        LlmProvider::OpenAiCompatible {
            base_url,
            api_key: "test-key".into(),
        },
        0,
        http,
    )
}

fn suggestion_request(tier: DeploymentTier) -> ChatRequest {
    let params = ConfigResolver::global().params(tier, Feature::Evaluation).clone();
    ChatRequest::new(
        params,
        vec![
            AiMessage::system("Suggest one exercise as JSON."),
            AiMessage::user("I struggled with integrals today."),
        ],
    )
    .with_timeout(5_000)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fenced_json_across_deltas_becomes_typed_value() {
    init_tracing();
    let body = [
        sse_delta("Here is one:\n```js"),
        sse_delta("on\n{\"title\": \"Integration by parts\", "),
        sse_delta("\"minutes\": 25, \"confidence\": 0.9}\n``"),
        sse_delta("`\nGood luck!"),
        sse_finish(),
        "data: [DONE]\n\n".to_string(),
    ]
    .concat();
    let (url, captured) = serve_once("HTTP/1.1 200 OK", body).await;

    let rx = client_for(url).stream(suggestion_request(DeploymentTier::Production));
    let acc = collect_stream(rx).await;
    assert_eq!(acc.state(), &StreamState::Done);

    let suggestion = acc.finish_validated(safe_suggestion()).expect("done stream");
    assert_eq!(
        suggestion,
        ExerciseSuggestion {
            title: "Integration by parts".into(),
            minutes: 25
        }
    );

    let request = captured.await.expect("captured request");
    assert!(request.contains("authorization: Bearer test-key") || request.contains("Authorization: Bearer test-key"));
    assert!(request.contains("\"stream\":true"));
    assert!(request.contains("\"model\":\"gpt-4o\""));
}

#[tokio::test]
async fn malformed_payload_degrades_to_fallback() {
    init_tracing();
    let body = [sse_delta("I think you should "), sse_delta("{\"title\": 5"), sse_finish()].concat();
    let (url, _captured) = serve_once("HTTP/1.1 200 OK", body).await;

    let acc = collect_stream(client_for(url).stream(suggestion_request(DeploymentTier::Local))).await;
    let suggestion = acc.finish_validated(safe_suggestion()).expect("finished without [DONE]");
    assert_eq!(suggestion, safe_suggestion());
}

#[tokio::test]
async fn http_failure_is_single_retryable_error_chunk() {
    init_tracing();
    let (url, _captured) = serve_once("HTTP/1.1 503 Service Unavailable", "overloaded".into()).await;

    let mut rx = client_for(url).stream(suggestion_request(DeploymentTier::Staging));
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    assert_eq!(chunks.len(), 1);
    assert!(matches!(&chunks[0], StreamChunk::Error { error } if error.contains("503")));

    let mut acc = StreamAccumulator::new();
    acc.push(chunks.remove(0)).expect("valid chunk");
    let err = acc.finish().expect_err("provider failure");
    assert!(matches!(err, AiError::Provider(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn truncated_stream_keeps_partial_but_never_parses() {
    init_tracing();
    let body = [sse_delta("{\"title\": \"Limits\", "), sse_delta("\"minutes\": 1")].concat();
    let (url, _captured) = serve_once("HTTP/1.1 200 OK", body).await;

    let acc = collect_stream(client_for(url).stream(suggestion_request(DeploymentTier::Local))).await;
    assert!(matches!(acc.state(), StreamState::Failed(_)));
    assert_eq!(acc.text(), "{\"title\": \"Limits\", \"minutes\": 1");
    assert!(acc.finish_validated(safe_suggestion()).is_err());
}

#[tokio::test]
async fn provider_error_event_ends_stream() {
    init_tracing();
    let body = [
        sse_delta("partial"),
        format!("data: {}\n\n", json!({ "error": { "message": "context length exceeded" } })),
        sse_delta("never delivered"),
    ]
    .concat();
    let (url, _captured) = serve_once("HTTP/1.1 200 OK", body).await;

    let acc = collect_stream(client_for(url).stream(suggestion_request(DeploymentTier::Local))).await;
    assert_eq!(acc.text(), "partial");
    assert!(acc.violation().is_none());
    assert!(matches!(acc.finish(), Err(AiError::Provider(m)) if m.contains("context length")));
}

#[tokio::test]
async fn complete_returns_message_content() {
    init_tracing();
    let body = json!({ "choices": [{ "message": { "role": "assistant", "content": "```json\n{\"title\":\"Flashcards\",\"minutes\":5}\n```" } }] })
        .to_string();
    let (url, captured) = serve_once("HTTP/1.1 200 OK", body).await;

    let text = client_for(url)
        .complete(&suggestion_request(DeploymentTier::Local))
        .await
        .expect("completion");
    let suggestion = studylog_ai::parse_validated(&text, safe_suggestion());
    assert_eq!(suggestion.title, "Flashcards");

    let request = captured.await.expect("captured request");
    assert!(request.contains("\"stream\":false"));
    assert!(request.contains("gpt-4o-mini"));
}

#[tokio::test]
async fn complete_exhausts_retries() {
    init_tracing();
    let (url, _captured) = serve_once("HTTP/1.1 500 Internal Server Error", String::new()).await;

    // Only one connection is served; the listener is gone for the retry.
    let http = reqwest::Client::builder().no_proxy().build().expect("http client");
    let client = LlmClient::with_http(
        LlmProvider::OpenAiCompatible {
            base_url: url,
            api_key: "k".into(),
        },
        1,
        http,
    );
    let err = client
        .complete(&suggestion_request(DeploymentTier::Local))
        .await
        .expect_err("all attempts fail");
    assert!(matches!(err, AiError::RetriesExhausted { attempts: 2, .. }));
}

#[tokio::test]
async fn complete_surfaces_error_body_on_success_status() {
    init_tracing();
    let body = json!({ "error": { "message": "model overloaded" } }).to_string();
    let (url, _captured) = serve_once("HTTP/1.1 200 OK", body).await;

    let err = client_for(url)
        .complete(&suggestion_request(DeploymentTier::Local))
        .await
        .expect_err("error body is not a completion");
    assert!(matches!(&err, AiError::Provider(m) if m.contains("overloaded")));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn complete_without_content_is_parse_error() {
    init_tracing();
    let body = json!({ "choices": [] }).to_string();
    let (url, _captured) = serve_once("HTTP/1.1 200 OK", body).await;

    let err = client_for(url)
        .complete(&suggestion_request(DeploymentTier::Local))
        .await
        .expect_err("no content");
    assert!(matches!(err, AiError::Parse(_)));
}

#[tokio::test]
async fn complete_does_not_retry_client_errors() {
    init_tracing();
    let (url, _captured) = serve_once("HTTP/1.1 401 Unauthorized", "bad key".into()).await;

    // A retry would hit the closed listener and end in RetriesExhausted.
    let http = reqwest::Client::builder().no_proxy().build().expect("http client");
    let client = LlmClient::with_http(
        LlmProvider::OpenAiCompatible {
            base_url: url,
            api_key: "k".into(),
        },
        2,
        http,
    );
    let err = client
        .complete(&suggestion_request(DeploymentTier::Local))
        .await
        .expect_err("rejected");
    assert!(matches!(&err, AiError::RequestFailed(m) if m.contains("401") && m.contains("bad key")));
}

#[tokio::test]
async fn stalled_stream_reports_configured_timeout() {
    init_tracing();
    let url = serve_silent().await;

    let request = suggestion_request(DeploymentTier::Local).with_timeout(200);
    let acc = collect_stream(client_for(url).stream(request)).await;
    assert!(matches!(acc.state(), StreamState::Failed(m) if m.contains("200ms")));
    let err = acc.finish().expect_err("timed out");
    assert!(matches!(&err, AiError::Provider(m) if m.contains("timed out after 200ms")));
}

#[tokio::test]
async fn stalled_completion_reports_configured_timeout() {
    init_tracing();
    let url = serve_silent().await;

    let request = suggestion_request(DeploymentTier::Local).with_timeout(200);
    let err = client_for(url).complete(&request).await.expect_err("timed out");
    assert!(matches!(&err, AiError::RetriesExhausted { last_error, .. } if last_error.contains("200ms")));
}

#[test]
fn wire_events_from_adapter_drive_state_machine() {
    init_tracing();
    let lines = [
        r#"{"type":"text","content":"Photo"}"#,
        r#"{"type":"text","content":"synthesis"}"#,
        r#"{"type":"done"}"#,
    ];
    let mut acc = StreamAccumulator::new();
    for line in lines {
        acc.push_wire(line).expect("valid event");
    }
    assert_eq!(acc.finish().expect("done"), "Photosynthesis");
}

#[test]
fn staging_and_production_share_parameters() {
    let resolver = ConfigResolver::global();
    for feature in Feature::all() {
        assert_eq!(
            resolver.params(DeploymentTier::Staging, *feature),
            resolver.params(DeploymentTier::Production, *feature)
        );
    }
}
