//! Provider adapter — turns an OpenAI-compatible chat endpoint into the
//! chunk protocol.
//!
//! [`LlmClient::stream`] spawns a task that reads the server-sent-event body
//! and forwards each delta as a `text` chunk, then exactly one terminal
//! chunk: `done` on a clean finish, `error` on any HTTP, transport or
//! framing failure. Timeouts live here, not in the consumer.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{AiError, Result};
use crate::stream::StreamChunk;
use crate::types::ChatRequest;

/// Capacity of the chunk channel handed to consumers.
const CHANNEL_CAPACITY: usize = 64;

/// Longest SSE line buffered before the stream is declared broken.
pub const MAX_SSE_LINE_BYTES: usize = 1 << 20;

/// Provider backend for model calls.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// OpenAI-compatible API (OpenAI, Together, vLLM, Ollama's `/v1`...).
    OpenAiCompatible {
        /// Base URL without the `/v1/...` suffix.
        base_url: String,
        /// Bearer token.
        api_key: String,
    },
    /// No provider configured — every call fails, every stream is one `error`.
    None,
}

/// Client that issues chat requests and frames the results.
#[derive(Debug, Clone)]
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    max_retries: u32,
}

impl LlmClient {
    /// Create a new client.
    #[must_use]
    pub fn new(provider: LlmProvider, max_retries: u32) -> Self {
        Self {
            provider,
            http: Client::new(),
            max_retries,
        }
    }

    /// Create a client around a preconfigured HTTP client (proxy, TLS roots).
    #[must_use]
    pub fn with_http(provider: LlmProvider, max_retries: u32, http: Client) -> Self {
        Self {
            provider,
            http,
            max_retries,
        }
    }

    /// Create a client with no backend.
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, 0)
    }

    /// Whether a backend is configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }

    /// Non-streaming completion with retry.
    ///
    /// # Errors
    ///
    /// - [`AiError::Unavailable`] without a provider.
    /// - [`AiError::Provider`] if a 2xx body carries an `error` object.
    /// - [`AiError::Parse`] if a 2xx body has no message content.
    /// - [`AiError::RequestFailed`] for a 4xx status other than 429, without retrying.
    /// - [`AiError::RetriesExhausted`] once every attempt failed on a 5xx, 429
    ///   or transport error.
    pub async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let LlmProvider::OpenAiCompatible { base_url, api_key } = &self.provider else {
            return Err(AiError::Unavailable("No model provider configured".into()));
        };

        let url = completions_url(base_url);
        let body = request.to_body(false);

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!("Retrying model call (attempt {}/{})", attempt + 1, self.max_retries + 1);
            }

            let start = Instant::now();
            let result = self
                .http
                .post(&url)
                .bearer_auth(api_key)
                .json(&body)
                .timeout(Duration::from_millis(request.timeout_ms))
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let json: Value = resp.json().await.map_err(|e| AiError::Parse(e.to_string()))?;
                    let text = completion_text(&json)?;
                    debug!(
                        model = %request.params.model,
                        latency_ms = start.elapsed().as_millis() as u64,
                        "model call complete"
                    );
                    return Ok(text);
                }
                Ok(resp) if is_retryable_status(resp.status()) => {
                    last_error = format!("HTTP {}", resp.status());
                    warn!("Model API returned error: {}", last_error);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let detail = resp.text().await.unwrap_or_default();
                    warn!("Model API rejected request: HTTP {}", status);
                    return Err(AiError::RequestFailed(format!("HTTP {status}: {detail}")));
                }
                Err(e) => {
                    let err = transport_error(e, request.timeout_ms);
                    warn!("Model request failed: {}", err);
                    last_error = err.to_string();
                }
            }
        }

        Err(AiError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }

    /// Start a streaming completion.
    ///
    /// The returned channel yields `text` chunks followed by exactly one
    /// terminal chunk. Dropping the receiver cancels the transport.
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn stream(&self, request: ChatRequest) -> mpsc::Receiver<StreamChunk> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let http = self.http.clone();
        let provider = self.provider.clone();

        tokio::spawn(async move {
            let terminal = match pump(&http, &provider, &request, &tx).await {
                Ok(()) => StreamChunk::done(),
                Err(err) => {
                    warn!(error = %err, model = %request.params.model, "model stream failed");
                    StreamChunk::error(err.to_string())
                }
            };
            if tx.send(terminal).await.is_err() {
                debug!("stream consumer gone before terminal chunk");
            }
        });

        rx
    }
}

fn completions_url(base_url: &str) -> String {
    format!("{}/v1/chat/completions", base_url.trim_end_matches('/'))
}

/// Server-side and rate-limit failures may clear up; other 4xx cannot.
fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Classify a transport error, keeping the configured timeout.
fn transport_error(err: reqwest::Error, timeout_ms: u64) -> AiError {
    if err.is_timeout() {
        AiError::Timeout(timeout_ms)
    } else {
        err.into()
    }
}

/// Message content of a non-streaming completion body.
fn completion_text(json: &Value) -> Result<String> {
    if let Some(message) = json["error"]["message"].as_str() {
        return Err(AiError::Provider(message.to_string()));
    }
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AiError::Parse("completion has no choices[0].message.content".into()))
}

/// Forward deltas until the provider finishes. `Ok` means send `done`.
async fn pump(
    http: &Client,
    provider: &LlmProvider,
    request: &ChatRequest,
    tx: &mpsc::Sender<StreamChunk>,
) -> Result<()> {
    let LlmProvider::OpenAiCompatible { base_url, api_key } = provider else {
        return Err(AiError::Unavailable("No model provider configured".into()));
    };

    let mut resp = http
        .post(completions_url(base_url))
        .bearer_auth(api_key)
        .json(&request.to_body(true))
        .timeout(Duration::from_millis(request.timeout_ms))
        .send()
        .await
        .map_err(|e| transport_error(e, request.timeout_ms))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let detail = resp.text().await.unwrap_or_default();
        return Err(AiError::RequestFailed(format!("HTTP {status}: {detail}")));
    }

    let mut decoder = SseDecoder::default();
    let mut finished = false;
    while let Some(bytes) = resp
        .chunk()
        .await
        .map_err(|e| transport_error(e, request.timeout_ms))?
    {
        for event in decoder.feed(&bytes) {
            match event {
                SseEvent::Delta(text) => {
                    if tx.send(StreamChunk::text(text)).await.is_err() {
                        debug!("stream consumer gone, dropping transport");
                        return Ok(());
                    }
                }
                SseEvent::Finished => finished = true,
                SseEvent::Done => return Ok(()),
                SseEvent::Error(message) => return Err(AiError::Provider(message)),
            }
        }
    }

    if finished {
        Ok(())
    } else {
        Err(AiError::RequestFailed("provider closed stream before completion".into()))
    }
}

// ---------------------------------------------------------------------------
// SSE framing
// ---------------------------------------------------------------------------

/// One decoded server-sent event from a chat completion stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Non-empty content delta.
    Delta(String),
    /// A choice reported a `finish_reason`.
    Finished,
    /// The `[DONE]` sentinel.
    Done,
    /// Provider error object or an undecodable `data:` payload.
    Error(String),
}

/// Incremental SSE line decoder.
///
/// Network reads split lines (and UTF-8 sequences) arbitrarily; bytes are
/// buffered until a full line is available. Bytes already searched for a
/// newline are not searched again, and a line longer than
/// [`MAX_SSE_LINE_BYTES`] is dropped with an [`SseEvent::Error`].
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    scanned: usize,
}

impl SseDecoder {
    /// Consume a network read, returning the events it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.scanned = 0;
            let line = String::from_utf8_lossy(&line);
            events.extend(decode_line(line.trim_end_matches(['\n', '\r'])));
        }
        self.scanned = self.pending.len();

        if self.pending.len() > MAX_SSE_LINE_BYTES {
            events.push(SseEvent::Error(format!(
                "provider event exceeds {MAX_SSE_LINE_BYTES} bytes without a line break"
            )));
            self.pending.clear();
            self.scanned = 0;
        }
        events
    }
}

fn decode_line(line: &str) -> Vec<SseEvent> {
    // Comments, `event:`/`id:` fields and blank separators carry nothing.
    let Some(payload) = line.strip_prefix("data:") else {
        return Vec::new();
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Vec::new();
    }
    if payload == "[DONE]" {
        return vec![SseEvent::Done];
    }

    let json: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => return vec![SseEvent::Error(format!("malformed provider event: {e}"))],
    };

    if let Some(message) = json["error"]["message"].as_str() {
        return vec![SseEvent::Error(message.to_string())];
    }

    let choice = &json["choices"][0];
    let mut events = Vec::new();
    if let Some(text) = choice["delta"]["content"].as_str() {
        if !text.is_empty() {
            events.push(SseEvent::Delta(text.to_string()));
        }
    }
    if !choice["finish_reason"].is_null() {
        events.push(SseEvent::Finished);
    }
    events
}
