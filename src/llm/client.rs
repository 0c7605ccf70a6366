//! Gemini client for OCR and span annotation.
//!
//! Talks to the Generative Language REST API. Both operations request a
//! schema-constrained JSON response, retry transient overload with
//! exponential backoff, and go through a two-stage parse (strict, then
//! normalize-and-reparse) because the model does not always honor the
//! requested format.
//!
//! Requires GEMINI_API_KEY (or `[gemini] api_key` in the config file).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::normalize::normalize_json_candidate;
use super::GatewayError;
use crate::models::AnnotationContent;

/// Maximum attempts per gateway operation (initial call plus retries).
const MAX_ATTEMPTS: u32 = 3;

/// Base backoff before the first retry; doubles per attempt.
const BACKOFF_BASE_MS: u64 = 500;

/// Upper bound (exclusive) of the uniform jitter added to each backoff.
const JITTER_MS: u64 = 250;

/// Language tag used when a degraded OCR response carries no language.
const DEFAULT_LANGUAGE: &str = "ja";

/// Prompt for the text-extraction operation.
const OCR_PROMPT: &str = "Extract all Japanese text from this image. Return ONLY a JSON object with keys 'raw_text' (the extracted text) and 'language' (detected language code). Preserve line breaks and formatting. Do not include markdown, code fences, or any extra text.";

/// Prompt for the span-annotation operation. Uses {full_text} and
/// {selected_text} placeholders.
const ANNOTATION_PROMPT: &str = r#"You are helping a Japanese language learner understand text in a professional/work context.

Full OCR text:
{full_text}

Selected text to annotate:
{selected_text}

Provide a detailed annotation in JSON format with these exact fields:
- meaning: Direct translation of the selected text
- usage_example: Example sentence showing how to use this in a professional/work context
- when_to_use: When and in what situation this phrase is used
- word_breakdown: Explanation of each word/component in the selected text
- alternative_meanings: Alternative meanings in different fields or contexts

Return only valid JSON, no markdown formatting."#;

/// Configuration for the Gemini gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key; taken from GEMINI_API_KEY when absent from the file.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model to use for both operations.
    #[serde(default = "default_model")]
    pub model: String,
    /// API endpoint base, overridable for tests.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Tag recorded on rows produced with the current prompts.
    #[serde(default = "default_prompt_version")]
    pub prompt_version: String,
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_prompt_version() -> String {
    "1.0".to_string()
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            prompt_version: default_prompt_version(),
        }
    }
}

impl GeminiConfig {
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Result of the text-extraction operation.
#[derive(Debug, Clone)]
pub struct OcrOutcome {
    /// The extracted text.
    pub raw_text: String,
    /// Detected language code, if the response carried one.
    pub language: Option<String>,
    /// JSON echo of the parsed raw/language pair; absent on degraded parses.
    pub structured_json: Option<String>,
}

/// The model operations the rest of the system depends on.
///
/// A trait seam so services can be exercised against scripted fakes.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Extract text from an image.
    async fn extract_text(
        &self,
        image: &[u8],
        mime_type: &str,
        cancel: &CancellationToken,
    ) -> Result<OcrOutcome, GatewayError>;

    /// Annotate a selected span of previously extracted text.
    async fn annotate(
        &self,
        full_text: &str,
        selected_text: &str,
        cancel: &CancellationToken,
    ) -> Result<AnnotationContent, GatewayError>;

    /// Model identifier recorded on produced rows.
    fn model_name(&self) -> &str;

    /// Prompt-version tag recorded on produced rows.
    fn prompt_version(&self) -> &str;
}

/// Gemini-backed implementation of [`TextModel`].
pub struct GeminiClient {
    config: GeminiConfig,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
    #[serde(rename = "responseSchema")]
    response_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Expected shape of the OCR response body.
#[derive(Debug, Serialize, Deserialize)]
struct OcrPayload {
    raw_text: String,
    #[serde(default)]
    language: String,
}

impl GeminiClient {
    /// Create a new client with the given configuration.
    pub fn new(config: GeminiConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, http }
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn api_key(&self) -> Result<&str, GatewayError> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(GatewayError::NotInitialized)
    }

    /// One generateContent call. Returns the concatenated response text.
    async fn generate(&self, request: &GenerateContentRequest) -> Result<String, GatewayError> {
        let api_key = self.api_key()?;
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.endpoint, self.config.model
        );

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("HTTP {}: {}", status, body)));
        }

        let payload: GenerateContentResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;

        if let Some(error) = payload.error {
            return Err(GatewayError::Api(error.message));
        }

        response_text(payload)
    }
}

#[async_trait]
impl TextModel for GeminiClient {
    async fn extract_text(
        &self,
        image: &[u8],
        mime_type: &str,
        cancel: &CancellationToken,
    ) -> Result<OcrOutcome, GatewayError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: OCR_PROMPT.to_string(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: mime_type.to_string(),
                            data: base64::engine::general_purpose::STANDARD.encode(image),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: ocr_response_schema(),
            },
        };

        debug!(image_bytes = image.len(), mime_type, "requesting text extraction");
        let text = with_overload_retries(cancel, || self.generate(&request)).await?;
        Ok(parse_ocr_text(&text))
    }

    async fn annotate(
        &self,
        full_text: &str,
        selected_text: &str,
        cancel: &CancellationToken,
    ) -> Result<AnnotationContent, GatewayError> {
        let prompt = ANNOTATION_PROMPT
            .replace("{full_text}", full_text)
            .replace("{selected_text}", selected_text);

        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part::Text { text: prompt }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: annotation_response_schema(),
            },
        };

        debug!(span_len = selected_text.len(), "requesting span annotation");
        let text = with_overload_retries(cancel, || self.generate(&request)).await?;
        parse_annotation_text(&text)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn prompt_version(&self) -> &str {
        &self.config.prompt_version
    }
}

/// Run an operation up to [`MAX_ATTEMPTS`] times, backing off between
/// overload-classified failures.
///
/// Terminal failures abort immediately. The backoff sleep races the
/// cancellation token; cancellation returns the last observed error
/// rather than retrying.
async fn with_overload_retries<T, F, Fut>(
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, GatewayError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_overloaded() || attempt + 1 >= MAX_ATTEMPTS {
                    return Err(err);
                }
                let wait = backoff_delay(attempt) + jitter();
                debug!(attempt, ?wait, "model overloaded, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(err),
                    _ = tokio::time::sleep(wait) => {}
                }
                attempt += 1;
            }
        }
    }
}

/// Exponential backoff for a zero-based attempt counter.
fn backoff_delay(attempt: u32) -> Duration {
    let delay_ms = BACKOFF_BASE_MS * 2u64.pow(attempt);
    Duration::from_millis(delay_ms.min(60_000))
}

fn jitter() -> Duration {
    Duration::from_millis(rand::rng().random_range(0..JITTER_MS))
}

/// Concatenate candidate part text. Zero-length output is terminal.
fn response_text(payload: GenerateContentResponse) -> Result<String, GatewayError> {
    let text: String = payload
        .candidates
        .into_iter()
        .flatten()
        .flat_map(|c| c.content.parts)
        .filter_map(|p| p.text)
        .collect();

    if text.is_empty() {
        return Err(GatewayError::EmptyResponse);
    }
    Ok(text)
}

/// Parse an OCR response: strict, then normalized, then degrade to the
/// raw text with a default language tag and no structured echo.
fn parse_ocr_text(text: &str) -> OcrOutcome {
    if let Ok(payload) = serde_json::from_str::<OcrPayload>(text) {
        return ocr_outcome(payload);
    }

    let normalized = normalize_json_candidate(text);
    if normalized != text {
        if let Ok(payload) = serde_json::from_str::<OcrPayload>(&normalized) {
            return ocr_outcome(payload);
        }
    }

    OcrOutcome {
        raw_text: text.to_string(),
        language: Some(DEFAULT_LANGUAGE.to_string()),
        structured_json: None,
    }
}

fn ocr_outcome(payload: OcrPayload) -> OcrOutcome {
    let structured_json = serde_json::to_string(&payload).ok();
    let language = if payload.language.is_empty() {
        None
    } else {
        Some(payload.language)
    };
    OcrOutcome {
        raw_text: payload.raw_text,
        language,
        structured_json,
    }
}

/// Parse an annotation response: strict, then normalized. There is no
/// degraded form; a failed parse is terminal.
fn parse_annotation_text(text: &str) -> Result<AnnotationContent, GatewayError> {
    match serde_json::from_str::<AnnotationContent>(text) {
        Ok(content) => Ok(content),
        Err(err) => {
            let normalized = normalize_json_candidate(text);
            if normalized != text {
                if let Ok(content) = serde_json::from_str::<AnnotationContent>(&normalized) {
                    return Ok(content);
                }
            }
            Err(GatewayError::Parse(err.to_string()))
        }
    }
}

fn ocr_response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "raw_text": { "type": "STRING" },
            "language": { "type": "STRING" },
        },
        "required": ["raw_text", "language"],
        "propertyOrdering": ["raw_text", "language"],
    })
}

fn annotation_response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "meaning": { "type": "STRING" },
            "usage_example": { "type": "STRING" },
            "when_to_use": { "type": "STRING" },
            "word_breakdown": { "type": "STRING" },
            "alternative_meanings": { "type": "STRING" },
        },
        "required": [
            "meaning",
            "usage_example",
            "when_to_use",
            "word_breakdown",
            "alternative_meanings",
        ],
        "propertyOrdering": [
            "meaning",
            "usage_example",
            "when_to_use",
            "word_breakdown",
            "alternative_meanings",
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn overloaded() -> GatewayError {
        GatewayError::Api("HTTP 503 Service Unavailable: model overloaded".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhaust_with_backoff_bounds() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let start = Instant::now();
        let result: Result<String, _> = with_overload_retries(&cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(overloaded()) }
        })
        .await;
        let elapsed = start.elapsed();

        assert!(result.unwrap_err().is_overloaded());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two waits: 500ms + 1000ms, each with up to 250ms of jitter.
        assert!(elapsed >= Duration::from_millis(1500), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(2000), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result = with_overload_retries(&cancel, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(overloaded())
                } else {
                    Ok("extracted".to_string())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "extracted");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_aborts_on_first_attempt() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let start = Instant::now();
        let result: Result<String, _> = with_overload_retries(&cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::Api("HTTP 403: invalid api key".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // No backoff happened.
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let calls = std::sync::Arc::new(AtomicU32::new(0));

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = std::time::Instant::now();
        let result: Result<String, _> = with_overload_retries(&cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(overloaded()) }
        })
        .await;
        let elapsed = start.elapsed();

        // Returned during the first 500ms+ backoff, well before it finished.
        assert!(result.unwrap_err().is_overloaded());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(elapsed < Duration::from_millis(400), "elapsed {:?}", elapsed);
    }

    #[test]
    fn test_backoff_delay_doubles() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
    }

    #[test]
    fn test_parse_ocr_strict() {
        let outcome = parse_ocr_text(r#"{"raw_text":"こんにちは","language":"ja"}"#);
        assert_eq!(outcome.raw_text, "こんにちは");
        assert_eq!(outcome.language.as_deref(), Some("ja"));
        assert!(outcome.structured_json.is_some());
    }

    #[test]
    fn test_parse_ocr_fenced() {
        let outcome = parse_ocr_text("```json\n{\"raw_text\":\"text\",\"language\":\"en\"}\n```");
        assert_eq!(outcome.raw_text, "text");
        assert_eq!(outcome.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_parse_ocr_degrades_to_raw_text() {
        let outcome = parse_ocr_text("plain prose the model returned instead of JSON");
        assert_eq!(outcome.raw_text, "plain prose the model returned instead of JSON");
        assert_eq!(outcome.language.as_deref(), Some("ja"));
        assert!(outcome.structured_json.is_none());
    }

    #[test]
    fn test_parse_annotation_strict_and_fenced() {
        let body = r#"{"meaning":"m","usage_example":"u","when_to_use":"w","word_breakdown":"b","alternative_meanings":"a"}"#;
        assert_eq!(parse_annotation_text(body).unwrap().meaning, "m");

        let fenced = format!("```json\n{}\n```", body);
        assert_eq!(parse_annotation_text(&fenced).unwrap().word_breakdown, "b");
    }

    #[test]
    fn test_parse_annotation_failure_is_terminal() {
        let err = parse_annotation_text("not json at all").unwrap_err();
        assert!(matches!(err, GatewayError::Parse(_)));
    }

    #[test]
    fn test_response_text_empty_is_error() {
        let empty = GenerateContentResponse {
            candidates: Some(vec![]),
            error: None,
        };
        assert!(matches!(
            response_text(empty),
            Err(GatewayError::EmptyResponse)
        ));

        let blank = GenerateContentResponse {
            candidates: Some(vec![Candidate {
                content: CandidateContent {
                    parts: vec![CandidatePart {
                        text: Some(String::new()),
                    }],
                },
            }]),
            error: None,
        };
        assert!(matches!(
            response_text(blank),
            Err(GatewayError::EmptyResponse)
        ));
    }

    #[test]
    fn test_missing_api_key_is_not_initialized() {
        let client = GeminiClient::new(GeminiConfig::default());
        assert!(matches!(
            client.api_key(),
            Err(GatewayError::NotInitialized)
        ));

        let client = GeminiClient::new(GeminiConfig::default().with_api_key(""));
        assert!(matches!(
            client.api_key(),
            Err(GatewayError::NotInitialized)
        ));
    }
}
