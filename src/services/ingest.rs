//! The ingestion orchestrator: one detached background job per upload.
//!
//! A job makes a single pass: call the model gateway, then either record
//! the OCR result and publish `ocr_done`, or classify the failure into a
//! terminal status. The job's cancellation is tied to process shutdown,
//! never to the HTTP request that spawned it.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::llm::{is_auth_signal, is_overload_signal, TextModel};
use crate::models::{OcrResult, ScanStatus};
use crate::repository::ScanRepository;

/// Map a gateway failure message to a terminal scan status.
///
/// Prioritized substring predicates in a fixed order: overload signals are
/// checked before auth signals, so a message carrying both (a 403 that
/// also mentions "quota") classifies as overloaded.
pub fn failure_status(message: &str) -> ScanStatus {
    if is_overload_signal(message) {
        ScanStatus::FailedOverloaded
    } else if is_auth_signal(message) {
        ScanStatus::FailedAuth
    } else {
        ScanStatus::Failed
    }
}

/// Run OCR ingestion for one scan.
///
/// Exactly one status transition and at most one OCR result row per scan,
/// ever. Persistence failures abort the job with no further writes; a
/// status-write failure after the OCR result was stored leaves the scan
/// in `uploaded` with an orphaned result row, resolved only by hand.
pub async fn run_ingestion(
    scans: ScanRepository,
    model: Arc<dyn TextModel>,
    cancel: CancellationToken,
    scan_id: String,
    image: Vec<u8>,
    mime_type: String,
) {
    let span = info_span!("ingest", scan_id = %scan_id);
    async move {
        info!(image_bytes = image.len(), mime_type = %mime_type, "starting OCR ingestion");

        let outcome = match model.extract_text(&image, &mime_type, &cancel).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let status = failure_status(&err.to_string());
                warn!(error = %err, status = status.as_str(), "OCR failed");
                if let Err(db_err) = scans.update_scan_status(&scan_id, status).await {
                    error!(error = %db_err, "failed to record failed scan status");
                }
                return;
            }
        };

        info!(
            text_len = outcome.raw_text.len(),
            language = outcome.language.as_deref().unwrap_or(""),
            "OCR succeeded"
        );

        let result = OcrResult::new(
            scan_id.clone(),
            model.model_name().to_string(),
            outcome.language,
            outcome.raw_text,
            outcome.structured_json,
            model.prompt_version().to_string(),
        );

        if let Err(err) = scans.create_ocr_result(&result).await {
            error!(error = %err, "failed to store OCR result");
            return;
        }

        // Result row first, status flip second: a reader that observes
        // ocr_done can always also find the OCR result.
        if let Err(err) = scans.update_scan_status(&scan_id, ScanStatus::OcrDone).await {
            error!(
                error = %err,
                ocr_result_id = %result.id,
                "scan left in uploaded with an orphaned OCR result"
            );
            return;
        }

        info!("scan ingestion complete");
    }
    .instrument(span)
    .await
}
