//! Stream chunk protocol — framing of a streamed model response.
//!
//! A provider adapter emits a sequence of [`StreamChunk`]s for one request:
//! any number of `text` chunks followed by at most one terminal chunk
//! (`done` or `error`). A [`StreamAccumulator`] consumes them in order:
//!
//! ```text
//! Streaming ──text──▶ Streaming
//! Streaming ──done──▶ Done      (terminal)
//! Streaming ──error─▶ Failed    (terminal)
//! ```
//!
//! Anything after a terminal chunk, or a wire event that does not decode,
//! is a [`ProtocolViolation`]. It is rejected, logged, and poisons the
//! stream: the buffer is left as it was and [`StreamAccumulator::finish`]
//! reports the violation instead of the text.
//!
//! Chunk boundaries carry no meaning; text is concatenated in arrival order.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{AiError, ProtocolViolation, Result};
use crate::extract::parse_validated;
use crate::outcome::map;

/// One event of a streamed model response.
///
/// Wire form: `{"type":"text","content":..}`, `{"type":"error","error":..}`,
/// `{"type":"done"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamChunk {
    /// A run of generated text.
    Text {
        /// The text, possibly empty.
        #[serde(default)]
        content: String,
    },
    /// The provider failed; terminal.
    Error {
        /// Human-readable failure message.
        #[serde(default)]
        error: String,
    },
    /// Generation finished; terminal.
    Done,
}

impl StreamChunk {
    /// A `text` chunk.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    /// An `error` chunk.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// A `done` chunk.
    #[must_use]
    pub fn done() -> Self {
        Self::Done
    }

    /// Whether this chunk ends the stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done)
    }

    /// Wire `type` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }

    /// Decode one wire event.
    ///
    /// # Errors
    ///
    /// [`ProtocolViolation::InvalidChunk`] for malformed JSON or an unknown
    /// `type`.
    pub fn from_wire(line: &str) -> std::result::Result<Self, ProtocolViolation> {
        serde_json::from_str(line.trim()).map_err(|e| ProtocolViolation::InvalidChunk(e.to_string()))
    }

    /// Encode as one wire event.
    ///
    /// # Errors
    ///
    /// Returns [`AiError::Parse`] if serialization fails.
    pub fn to_wire(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| AiError::Parse(e.to_string()))
    }
}

/// Where a stream is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    /// No terminal chunk seen yet.
    Streaming,
    /// `done` received.
    Done,
    /// `error` received, with the provider's message.
    Failed(String),
}

impl StreamState {
    /// Whether no further chunks are accepted.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Streaming)
    }
}

/// Ordered consumer for one chunk stream.
#[derive(Debug, Clone)]
pub struct StreamAccumulator {
    buffer: String,
    state: StreamState,
    chunks: usize,
    violation: Option<ProtocolViolation>,
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAccumulator {
    /// Fresh accumulator in the `Streaming` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            state: StreamState::Streaming,
            chunks: 0,
            violation: None,
        }
    }

    /// Apply one chunk.
    ///
    /// # Errors
    ///
    /// Returns the violation if the stream is already terminal or poisoned.
    /// The buffer is not touched in that case.
    pub fn push(&mut self, chunk: StreamChunk) -> std::result::Result<&StreamState, ProtocolViolation> {
        if self.violation.is_some() {
            return Err(ProtocolViolation::Poisoned);
        }
        if self.state.is_terminal() {
            return Err(self.poison(ProtocolViolation::ChunkAfterTerminal { kind: chunk.kind() }));
        }

        self.chunks += 1;
        match chunk {
            StreamChunk::Text { content } => self.buffer.push_str(&content),
            StreamChunk::Done => {
                debug!(chunks = self.chunks, len = self.buffer.len(), "stream done");
                self.state = StreamState::Done;
            }
            StreamChunk::Error { error } => {
                warn!(chunks = self.chunks, error = %error, "provider reported stream error");
                self.state = StreamState::Failed(error);
            }
        }
        Ok(&self.state)
    }

    /// Decode and apply one wire event.
    ///
    /// # Errors
    ///
    /// Returns the violation for undecodable events, late chunks, or a
    /// poisoned stream. An undecodable event poisons the stream.
    pub fn push_wire(&mut self, line: &str) -> std::result::Result<&StreamState, ProtocolViolation> {
        if self.violation.is_some() {
            return Err(ProtocolViolation::Poisoned);
        }
        match StreamChunk::from_wire(line) {
            Ok(chunk) => self.push(chunk),
            Err(violation) => Err(self.poison(violation)),
        }
    }

    fn poison(&mut self, violation: ProtocolViolation) -> ProtocolViolation {
        warn!(%violation, state = ?self.state, "stream protocol violation");
        self.violation = Some(violation.clone());
        violation
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Whether a terminal chunk was seen.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// The first protocol violation, if any.
    #[must_use]
    pub fn violation(&self) -> Option<&ProtocolViolation> {
        self.violation.as_ref()
    }

    /// Text accumulated so far. Not validated output unless the state is `Done`.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Number of chunks accepted.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Give up the buffer regardless of state, e.g. to show partial output
    /// after a cancel.
    #[must_use]
    pub fn into_partial(self) -> String {
        self.buffer
    }

    /// The complete text of a stream that ended with `done`.
    ///
    /// # Errors
    ///
    /// - [`AiError::Protocol`] if the stream was poisoned.
    /// - [`AiError::Provider`] if it ended with `error`.
    /// - [`AiError::Incomplete`] if no terminal chunk arrived.
    pub fn finish(self) -> Result<String> {
        if let Some(violation) = self.violation {
            return Err(violation.into());
        }
        match self.state {
            StreamState::Done => Ok(self.buffer),
            StreamState::Failed(error) => Err(AiError::Provider(error)),
            StreamState::Streaming => Err(AiError::Incomplete {
                partial_len: self.buffer.len(),
            }),
        }
    }

    /// Feed a completed stream into [`parse_validated`].
    ///
    /// Only a `done` stream reaches the parser; every other outcome is
    /// returned as an error so partial text is never taken as a payload.
    ///
    /// # Errors
    ///
    /// Same as [`finish`](Self::finish).
    pub fn finish_validated<T: DeserializeOwned>(self, fallback: T) -> Result<T> {
        map(self.finish(), |text| parse_validated(&text, fallback))
    }
}

/// Drain a chunk channel in order until a terminal chunk or channel close.
///
/// Chunks already queued behind the terminal one are still checked, so a
/// misbehaving producer shows up as a violation. A channel that closes
/// without a terminal chunk leaves the accumulator `Streaming`.
pub async fn collect_stream(mut rx: mpsc::Receiver<StreamChunk>) -> StreamAccumulator {
    let mut acc = StreamAccumulator::new();

    while let Some(chunk) = rx.recv().await {
        if acc.push(chunk).is_err() || acc.is_terminal() {
            break;
        }
    }

    if acc.violation().is_none() {
        while let Ok(extra) = rx.try_recv() {
            if acc.push(extra).is_err() {
                break;
            }
        }
    }

    if !acc.is_terminal() {
        debug!(len = acc.text().len(), "chunk channel closed before terminal chunk");
    }
    acc
}
