//! Scan service: upload validation, scan creation, and status reads.
//!
//! `upload` is the only entry point that spawns the ingestion job. The
//! job runs on a child of the process-shutdown token so it outlives the
//! originating request.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::ingest;
use crate::llm::TextModel;
use crate::models::{OcrResult, Scan, ScanImage};
use crate::repository::{DieselError, ScanRepository};
use crate::storage::ImageStore;

/// MIME types accepted for upload.
const ALLOWED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/webp"];

/// Errors from the upload path. Validation errors never reach the
/// ingestion pipeline.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid image type, please use JPEG, PNG, or WebP")]
    InvalidImageType,

    #[error("file too large, maximum size is {max_mb} MB")]
    TooLarge { max_mb: u64 },

    #[error("database error: {0}")]
    Database(#[from] DieselError),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

/// Service for creating scans and reading their processing state.
pub struct ScanService {
    scans: ScanRepository,
    store: ImageStore,
    model: Arc<dyn TextModel>,
    shutdown: CancellationToken,
    max_upload_bytes: u64,
}

impl ScanService {
    pub fn new(
        scans: ScanRepository,
        store: ImageStore,
        model: Arc<dyn TextModel>,
        shutdown: CancellationToken,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            scans,
            store,
            model,
            shutdown,
            max_upload_bytes,
        }
    }

    /// Validate and persist an upload, then kick off OCR in the background.
    ///
    /// Returns as soon as the scan row and image are stored; OCR progress
    /// is observable only through status polls.
    pub async fn upload(
        &self,
        session_id: &str,
        image: Vec<u8>,
        mime_type: &str,
    ) -> Result<Scan, UploadError> {
        validate_image_type(mime_type, &image)?;
        if image.len() as u64 > self.max_upload_bytes {
            return Err(UploadError::TooLarge {
                max_mb: self.max_upload_bytes / (1024 * 1024),
            });
        }

        let scan = Scan::new(session_id.to_string(), "upload".to_string());
        self.scans.create_scan(&scan).await?;

        let (storage_path, _sha256) = self.store.save_image(&scan.id, &image, mime_type)?;
        let record = ScanImage::new(
            scan.id.clone(),
            storage_path,
            mime_type.to_string(),
            &image,
        );
        self.scans.create_scan_image(&record).await?;

        info!(scan_id = %scan.id, image_bytes = image.len(), mime_type, "scan created, starting OCR");

        // Detached job: cancellation follows process shutdown, not the
        // request that triggered the upload.
        tokio::spawn(ingest::run_ingestion(
            self.scans.clone(),
            Arc::clone(&self.model),
            self.shutdown.child_token(),
            scan.id.clone(),
            image,
            mime_type.to_string(),
        ));

        Ok(scan)
    }

    /// Status poll: the scan and, once terminal-success, its OCR result.
    pub async fn get_scan(
        &self,
        scan_id: &str,
    ) -> Result<Option<(Scan, Option<OcrResult>)>, DieselError> {
        self.scans.get_scan_with_ocr(scan_id).await
    }

    /// Page through a session's scans, newest first.
    pub async fn list_scans(
        &self,
        session_id: &str,
        page: u32,
        size: u32,
    ) -> Result<Vec<Scan>, DieselError> {
        self.scans.list_scans_by_session(session_id, page, size).await
    }

    /// Load a scan's stored image bytes for serving.
    pub async fn get_image(
        &self,
        scan_id: &str,
    ) -> Result<Option<(ScanImage, Vec<u8>)>, UploadError> {
        let image = match self.scans.get_scan_image(scan_id).await? {
            Some(image) => image,
            None => return Ok(None),
        };
        let data = self.store.open_image(&image.storage_path)?;
        Ok(Some((image, data)))
    }
}

/// Reject uploads whose declared type isn't an accepted image type, or
/// whose content sniffs as something other than what was declared.
fn validate_image_type(mime_type: &str, content: &[u8]) -> Result<(), UploadError> {
    if !ALLOWED_IMAGE_TYPES.contains(&mime_type) {
        return Err(UploadError::InvalidImageType);
    }
    if let Some(kind) = infer::get(content) {
        if !ALLOWED_IMAGE_TYPES.contains(&kind.mime_type()) {
            return Err(UploadError::InvalidImageType);
        }
    }
    Ok(())
}
