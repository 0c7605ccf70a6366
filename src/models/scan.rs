//! Scan models for uploaded images and their processing lifecycle.
//!
//! A scan is one uploaded image. Its status is driven by the background
//! ingestion job; everything derived from the image (stored blob, OCR
//! result, annotations) references the scan by id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Processing status of a scan.
///
/// `Uploaded` is the only non-terminal state. The ingestion job moves a
/// scan out of it exactly once; there is no retry path from a terminal
/// state — a failed scan stays failed and the user uploads again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Uploaded,
    OcrDone,
    Failed,
    FailedOverloaded,
    FailedAuth,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::OcrDone => "ocr_done",
            Self::Failed => "failed",
            Self::FailedOverloaded => "failed_overloaded",
            Self::FailedAuth => "failed_auth",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(Self::Uploaded),
            "ocr_done" => Some(Self::OcrDone),
            "failed" => Some(Self::Failed),
            "failed_overloaded" => Some(Self::FailedOverloaded),
            "failed_auth" => Some(Self::FailedAuth),
            _ => None,
        }
    }

    /// Whether the ingestion job is done with this scan. Pollers stop here.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Uploaded)
    }
}

/// One uploaded image and its processing lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    /// Unique identifier for this scan.
    pub id: String,
    /// Session that owns the scan.
    pub session_id: String,
    /// How the image arrived ("upload").
    pub source: String,
    /// Current processing status.
    pub status: ScanStatus,
    /// When the scan was created.
    pub created_at: DateTime<Utc>,
}

impl Scan {
    /// Create a new scan in the initial `Uploaded` state.
    pub fn new(session_id: String, source: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            source,
            status: ScanStatus::Uploaded,
            created_at: Utc::now(),
        }
    }
}

/// The stored image blob backing a scan. Created once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanImage {
    pub id: String,
    pub scan_id: String,
    /// Path relative to the uploads directory.
    pub storage_path: String,
    pub mime_type: String,
    /// SHA-256 of the image bytes.
    pub sha256: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl ScanImage {
    /// Compute SHA-256 hash of image content.
    pub fn compute_hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    /// Create a new scan image record.
    pub fn new(scan_id: String, storage_path: String, mime_type: String, content: &[u8]) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            scan_id,
            storage_path,
            mime_type,
            sha256: Some(Self::compute_hash(content)),
            width: None,
            height: None,
            created_at: Utc::now(),
        }
    }
}

/// Text extracted from a scan by the vision model.
///
/// At most one per scan, written by the ingestion job on success. A row
/// existing implies the scan reached `ocr_done`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    pub id: String,
    pub scan_id: String,
    /// Model that produced the extraction.
    pub model: String,
    /// Detected language code, if the model reported one.
    pub language: Option<String>,
    /// The extracted text.
    pub raw_text: String,
    /// JSON echo of the raw/language pair when the response parsed cleanly.
    pub structured_json: Option<String>,
    pub prompt_version: String,
    pub created_at: DateTime<Utc>,
}

impl OcrResult {
    pub fn new(
        scan_id: String,
        model: String,
        language: Option<String>,
        raw_text: String,
        structured_json: Option<String>,
        prompt_version: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            scan_id,
            model,
            language,
            raw_text,
            structured_json,
            prompt_version,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ScanStatus::Uploaded,
            ScanStatus::OcrDone,
            ScanStatus::Failed,
            ScanStatus::FailedOverloaded,
            ScanStatus::FailedAuth,
        ] {
            assert_eq!(ScanStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(ScanStatus::from_str("bogus"), None);
    }

    #[test]
    fn test_only_uploaded_is_non_terminal() {
        assert!(!ScanStatus::Uploaded.is_terminal());
        assert!(ScanStatus::OcrDone.is_terminal());
        assert!(ScanStatus::Failed.is_terminal());
        assert!(ScanStatus::FailedOverloaded.is_terminal());
        assert!(ScanStatus::FailedAuth.is_terminal());
    }

    #[test]
    fn test_new_scan_starts_uploaded() {
        let scan = Scan::new("sess-1".to_string(), "upload".to_string());
        assert_eq!(scan.status, ScanStatus::Uploaded);
        assert!(!scan.id.is_empty());
    }

    #[test]
    fn test_image_hash_is_stable() {
        let a = ScanImage::compute_hash(b"bytes");
        let b = ScanImage::compute_hash(b"bytes");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
