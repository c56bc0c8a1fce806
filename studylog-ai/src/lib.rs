//! # studylog-ai — AI response normalization for studylog
//!
//! Everything between "a feature wants a model answer" and "the feature
//! holds a typed value or a clear failure" goes through this crate:
//!
//!   - **Config resolution** — which model, temperature and token ceiling a
//!     feature uses on a given deployment tier.
//!   - **Chunk protocol** — a closed `text` / `error` / `done` event stream
//!     from the provider adapter, accumulated in order.
//!   - **Validated parsing** — strip Markdown fences, parse JSON, check the
//!     shape, and fall back to a caller default on any failure.
//!   - **Outcome helpers** — `map` / `chain` / `unwrap_or` / `fold` over
//!     `Result` so each step's failure stays explicit.
//!
//! # Flow
//!
//! ```text
//! DeploymentTier ─▶ ConfigResolver ─▶ ModelParameters
//!                                          │
//!                    ChatRequest ◀─────────┘
//!                         │  LlmClient::stream
//!                         ▼
//!      StreamChunk* ─▶ StreamAccumulator ─▶ done ─▶ parse_validated ─▶ T
//!                                       └─▶ error ─▶ AiError::Provider
//! ```

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod outcome;
pub mod stream;
pub mod types;

pub use client::{LlmClient, LlmProvider};
pub use config::{ConfigResolver, DeploymentTier, Feature, FeatureConfig, ModelParameters, ModelTables, resolve};
pub use error::{AiError, ProtocolViolation};
pub use extract::{parse_validated, parse_validated_with, strip_code_fence, try_parse_validated};
pub use stream::{StreamAccumulator, StreamChunk, StreamState, collect_stream};
pub use types::{AiMessage, ChatRequest, Role};
