//! Gateway to the hosted vision/text model.
//!
//! Two operations back the whole product: extracting text from an uploaded
//! image and annotating a selected span of that text. Both demand strict
//! JSON from the model, retry transient overload with backoff, and fall
//! back to [`normalize_json_candidate`] when the response drifts from the
//! requested format.

mod client;
mod normalize;

pub use client::{GeminiClient, GeminiConfig, OcrOutcome, TextModel};
pub use normalize::normalize_json_candidate;

use thiserror::Error;

/// Errors surfaced by model gateway operations.
///
/// The upstream error surface is unstructured text, so downstream
/// classification works on the rendered message (see [`is_overload_signal`]
/// and [`is_auth_signal`]), not on variants.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The client has no usable API key.
    #[error("model client not initialized: check API key")]
    NotInitialized,

    /// Transport-level failure talking to the model endpoint.
    #[error("model request failed: {0}")]
    Http(String),

    /// The API answered with a non-success status or an error body.
    #[error("model API error: {0}")]
    Api(String),

    /// The model returned a zero-length response. Always terminal.
    #[error("empty response from model")]
    EmptyResponse,

    /// The response could not be parsed even after normalization.
    #[error("failed to parse model response: {0}")]
    Parse(String),
}

impl GatewayError {
    /// Whether this failure is worth retrying after a backoff.
    pub fn is_overloaded(&self) -> bool {
        match self {
            GatewayError::Http(msg) | GatewayError::Api(msg) => is_overload_signal(msg),
            _ => false,
        }
    }
}

/// Keywords signalling transient overload (rate limiting, temporary
/// unavailability, exhausted quota). Checked before auth signals wherever
/// both are consulted.
const OVERLOAD_SIGNALS: &[&str] = &[
    "429",
    "503",
    "rate limit",
    "unavailable",
    "overloaded",
    "quota",
    "resource_exhausted",
];

/// Keywords signalling a credential or client-configuration problem.
const AUTH_SIGNALS: &[&str] = &["401", "403", "unauthorized", "forbidden", "api key", "not initialized"];

/// Case-insensitive check for transient-overload wording in an error message.
pub fn is_overload_signal(message: &str) -> bool {
    let msg = message.to_lowercase();
    OVERLOAD_SIGNALS.iter().any(|kw| msg.contains(kw))
}

/// Case-insensitive check for credential/config wording in an error message.
pub fn is_auth_signal(message: &str) -> bool {
    let msg = message.to_lowercase();
    AUTH_SIGNALS.iter().any(|kw| msg.contains(kw))
}
