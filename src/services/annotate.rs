//! Span annotation service: the synchronous, request-scoped counterpart
//! to the ingestion job.
//!
//! Preconditions are checked before any model call: the scan must have a
//! persisted OCR result and the selected span must be non-empty and under
//! the length ceiling. Nothing is persisted on generation failure.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::llm::TextModel;
use crate::models::Annotation;
use crate::repository::{AnnotationRepository, DieselError, ScanRepository};

/// Longest span a user may select, in characters.
const MAX_SELECTION_CHARS: usize = 1000;

/// Errors from the annotation path.
#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("please select some text to annotate")]
    EmptySelection,

    #[error("selected text is too long (maximum {MAX_SELECTION_CHARS} characters)")]
    SelectionTooLong,

    #[error("scan is not ready for annotation yet")]
    NotReady,

    /// Generation failed; the caller may retry the request.
    #[error("failed to generate annotation: {0}")]
    Generation(String),

    #[error("database error: {0}")]
    Database(#[from] DieselError),
}

/// Service for generating and persisting span annotations.
pub struct AnnotationService {
    scans: ScanRepository,
    annotations: AnnotationRepository,
    model: Arc<dyn TextModel>,
    shutdown: CancellationToken,
}

impl AnnotationService {
    pub fn new(
        scans: ScanRepository,
        annotations: AnnotationRepository,
        model: Arc<dyn TextModel>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            scans,
            annotations,
            model,
            shutdown,
        }
    }

    /// Generate an annotation for a selected span of a scan's OCR text.
    pub async fn annotate(
        &self,
        scan_id: &str,
        selected_text: &str,
    ) -> Result<Annotation, AnnotateError> {
        if selected_text.trim().is_empty() {
            return Err(AnnotateError::EmptySelection);
        }
        if selected_text.chars().count() > MAX_SELECTION_CHARS {
            return Err(AnnotateError::SelectionTooLong);
        }

        let ocr = self
            .scans
            .get_ocr_result(scan_id)
            .await?
            .ok_or(AnnotateError::NotReady)?;

        let content = self
            .model
            .annotate(&ocr.raw_text, selected_text, &self.shutdown)
            .await
            .map_err(|err| {
                warn!(scan_id, error = %err, "annotation generation failed");
                AnnotateError::Generation(err.to_string())
            })?;

        let annotation = Annotation::new(
            scan_id.to_string(),
            ocr.id,
            selected_text.to_string(),
            content,
            self.model.model_name().to_string(),
            self.model.prompt_version().to_string(),
        );
        self.annotations.create_annotation(&annotation).await?;

        info!(scan_id, annotation_id = %annotation.id, "annotation created");
        Ok(annotation)
    }

    /// List a scan's annotations, oldest first.
    pub async fn list(&self, scan_id: &str) -> Result<Vec<Annotation>, DieselError> {
        self.annotations.list_annotations_by_scan(scan_id).await
    }
}
