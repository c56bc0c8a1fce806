//! Conversation and request types.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::ModelParameters;

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions framing the conversation.
    System,
    /// The learner.
    User,
    /// The model.
    Assistant,
}

/// One turn in a conversation. Order within a `Vec<AiMessage>` is history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiMessage {
    /// Who produced the turn.
    pub role: Role,
    /// Turn text.
    pub content: String,
    /// Optional image attached to the turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl AiMessage {
    /// A system turn.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// A user turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// An assistant turn.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Attach an image URL.
    #[must_use]
    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image_url: None,
        }
    }

    /// OpenAI-compatible message object. Image turns use the content-parts form.
    fn to_provider_json(&self) -> Value {
        match &self.image_url {
            None => json!({ "role": self.role, "content": self.content }),
            Some(url) => json!({
                "role": self.role,
                "content": [
                    { "type": "text", "text": self.content },
                    { "type": "image_url", "image_url": { "url": url } },
                ],
            }),
        }
    }
}

/// A model call: resolved parameters plus ordered conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Model parameters for the feature making the call.
    pub params: ModelParameters,
    /// Conversation history, oldest first.
    pub messages: Vec<AiMessage>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl ChatRequest {
    /// Create a request with a 30s timeout.
    #[must_use]
    pub fn new(params: ModelParameters, messages: Vec<AiMessage>) -> Self {
        Self {
            params,
            messages,
            timeout_ms: 30_000,
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// OpenAI-compatible chat completion body.
    #[must_use]
    pub fn to_body(&self, stream: bool) -> Value {
        let messages: Vec<Value> = self.messages.iter().map(AiMessage::to_provider_json).collect();
        json!({
            "model": self.params.model,
            "messages": messages,
            "max_tokens": self.params.max_tokens,
            "temperature": self.params.temperature,
            "stream": stream,
        })
    }
}
