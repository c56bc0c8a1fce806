//! Error types for the AI response pipeline.

use thiserror::Error;

/// Errors that can occur while talking to a model or normalizing its output.
#[derive(Debug, Error)]
pub enum AiError {
    /// Cleaned model text was not valid JSON.
    #[error("Failed to parse model output as JSON: {0}")]
    Parse(String),

    /// Model output was valid JSON but did not match the expected shape.
    #[error("Model output schema validation failed: {0}")]
    SchemaValidation(String),

    /// The provider reported a failure through a terminal `error` chunk.
    #[error("Model provider reported an error: {0}")]
    Provider(String),

    /// The chunk stream broke the protocol (adapter or transport defect).
    #[error("Stream protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// The stream ended without a terminal chunk (cancelled or still running).
    #[error("Stream ended without a terminal chunk ({partial_len} bytes buffered)")]
    Incomplete {
        /// Bytes of text accumulated before the stream stopped.
        partial_len: usize,
    },

    /// HTTP request failed.
    #[error("Model request failed: {0}")]
    RequestFailed(String),

    /// Request timed out.
    #[error("Model request timed out after {0}ms")]
    Timeout(u64),

    /// Model provider is unavailable.
    #[error("Model provider unavailable: {0}")]
    Unavailable(String),

    /// All retry attempts exhausted.
    #[error("All model retry attempts exhausted after {attempts} tries: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error text of the final attempt.
        last_error: String,
    },

    /// Configuration error.
    #[error("Model configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AiError {
    /// Whether the caller may reasonably retry the request.
    ///
    /// Provider and transport failures are retryable. Protocol violations and
    /// configuration errors point at a defect and are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(_)
                | Self::Incomplete { .. }
                | Self::RequestFailed(_)
                | Self::Timeout(_)
                | Self::Unavailable(_)
                | Self::RetriesExhausted { .. }
        )
    }
}

/// The request timeout is not known here, so a timeout maps to `Timeout(0)`.
/// The client classifies its own transport errors with the configured value.
impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AiError::Timeout(0)
        } else if err.is_connect() {
            AiError::Unavailable(err.to_string())
        } else {
            AiError::RequestFailed(err.to_string())
        }
    }
}

/// Ways a chunk stream can break the framing protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// A chunk arrived after the stream already reached `done` or `error`.
    #[error("chunk of type '{kind}' arrived after terminal chunk")]
    ChunkAfterTerminal {
        /// Wire type of the offending chunk.
        kind: &'static str,
    },

    /// A wire event could not be decoded (malformed JSON or unknown `type`).
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    /// The stream was already poisoned by an earlier violation.
    #[error("stream rejected after earlier violation")]
    Poisoned,
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, AiError>;
