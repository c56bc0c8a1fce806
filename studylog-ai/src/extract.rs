//! Structured output recovery from free-form model text.
//!
//! Models asked for JSON often wrap it in a Markdown fence, prefix it with
//! commentary, or emit something that is not JSON at all. The functions here
//! turn that text into a typed value in three steps:
//!
//! 1. [`strip_code_fence`] — take the interior of the first fenced block,
//!    or the whole trimmed input when there is no fence.
//! 2. parse the remainder as JSON.
//! 3. validate it against the target type's `Deserialize` impl, which is the
//!    declared shape. Missing required fields, wrong primitive types and
//!    unknown enum variants fail; extra fields are dropped.
//!
//! [`parse_validated`] never fails: any failure along the way yields the
//! caller's fallback. [`try_parse_validated`] exposes the reason instead.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{AiError, Result};
use crate::outcome::{Fold, chain};

const FENCE: &str = "```";
const JSON_TAG: &str = "json";

/// Strip an incidental Markdown code fence from model output.
///
/// Returns the trimmed interior of the first complete fenced block (the
/// `json` language tag is optional), otherwise the trimmed input.
#[must_use]
pub fn strip_code_fence(raw: &str) -> &str {
    fenced_interior(raw).unwrap_or(raw).trim()
}

fn fenced_interior(raw: &str) -> Option<&str> {
    let open = raw.find(FENCE)?;
    let after = &raw[open + FENCE.len()..];
    let body = after.strip_prefix(JSON_TAG).unwrap_or(after);
    let close = body.find(FENCE)?;
    Some(&body[..close])
}

fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| AiError::Parse(e.to_string()))
}

fn validate_shape<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| AiError::SchemaValidation(e.to_string()))
}

/// Strip, parse and validate, reporting which stage failed.
///
/// # Errors
///
/// [`AiError::Parse`] if the cleaned text is not JSON,
/// [`AiError::SchemaValidation`] if it does not fit `T`.
pub fn try_parse_validated<T: DeserializeOwned>(raw: &str) -> Result<T> {
    chain(parse_json(strip_code_fence(raw)), validate_shape::<T>)
}

/// Recover a `T` from model text, or return `fallback`.
///
/// Total over every input: empty, whitespace, truncated or wrongly-shaped
/// text all produce `fallback`.
pub fn parse_validated<T: DeserializeOwned>(raw: &str, fallback: T) -> T {
    parse_validated_with(raw, || fallback)
}

/// Like [`parse_validated`], building the fallback only when it is needed.
pub fn parse_validated_with<T: DeserializeOwned>(raw: &str, fallback: impl FnOnce() -> T) -> T {
    try_parse_validated(raw).fold(
        |value| value,
        |err| {
            debug!(error = %err, raw_len = raw.len(), "model output rejected, using fallback");
            fallback()
        },
    )
}
