//! Annotation model: an explanatory gloss for a selected text span.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A generated explanation of one user-selected span of OCR text.
///
/// Any number may exist per scan; rows are immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    pub scan_id: String,
    pub ocr_result_id: String,
    /// The exact span the user selected.
    pub selected_text: String,
    /// Direct translation of the selected text.
    pub meaning: String,
    /// Example sentence in a professional context.
    pub usage_example: String,
    /// When and in what situation the phrase is used.
    pub when_to_use: String,
    /// Per-word explanation of the span.
    pub word_breakdown: String,
    /// Alternative meanings in other fields or contexts.
    pub alternative_meanings: String,
    pub model: String,
    pub prompt_version: String,
    pub created_at: DateTime<Utc>,
}

/// The five explanation fields produced by the model for a span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationContent {
    pub meaning: String,
    pub usage_example: String,
    pub when_to_use: String,
    pub word_breakdown: String,
    pub alternative_meanings: String,
}

impl Annotation {
    /// Create a new annotation from generated content.
    pub fn new(
        scan_id: String,
        ocr_result_id: String,
        selected_text: String,
        content: AnnotationContent,
        model: String,
        prompt_version: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            scan_id,
            ocr_result_id,
            selected_text,
            meaning: content.meaning,
            usage_example: content.usage_example,
            when_to_use: content.when_to_use,
            word_breakdown: content.word_breakdown,
            alternative_meanings: content.alternative_meanings,
            model,
            prompt_version,
            created_at: Utc::now(),
        }
    }
}
