//! Scan repository: scans, their stored images, and OCR results.
//!
//! Uses diesel-async's SyncConnectionWrapper for async SQLite support.
//! Row-level writes are atomic through SQLite; callers that need
//! write-then-publish ordering issue the writes in order.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::{AsyncSqlitePool, DieselError};
use super::records::{NewOcrResult, NewScan, NewScanImage, OcrResultRecord, ScanImageRecord, ScanRecord};
use super::parse_datetime;
use crate::models::{OcrResult, Scan, ScanImage, ScanStatus};
use crate::schema::{ocr_results, scan_images, scans};

/// Repository for scans and everything derived from them except annotations.
#[derive(Clone)]
pub struct ScanRepository {
    pool: AsyncSqlitePool,
}

impl ScanRepository {
    /// Create a new scan repository.
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new scan row.
    pub async fn create_scan(&self, scan: &Scan) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        let created_at = scan.created_at.to_rfc3339();
        diesel::insert_into(scans::table)
            .values(NewScan {
                id: &scan.id,
                session_id: &scan.session_id,
                source: &scan.source,
                status: scan.status.as_str(),
                created_at: &created_at,
            })
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Get a scan by ID.
    pub async fn get_scan(&self, id: &str) -> Result<Option<Scan>, DieselError> {
        let mut conn = self.pool.get().await?;

        let record: Option<ScanRecord> = scans::table
            .find(id)
            .first(&mut conn)
            .await
            .optional()?;

        Ok(record.map(record_to_scan))
    }

    /// Update a scan's status.
    pub async fn update_scan_status(&self, id: &str, status: ScanStatus) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(scans::table.find(id))
            .set(scans::status.eq(status.as_str()))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Get a scan together with its OCR result, if one exists yet.
    pub async fn get_scan_with_ocr(
        &self,
        id: &str,
    ) -> Result<Option<(Scan, Option<OcrResult>)>, DieselError> {
        let scan = match self.get_scan(id).await? {
            Some(scan) => scan,
            None => return Ok(None),
        };
        let ocr = self.get_ocr_result(id).await?;
        Ok(Some((scan, ocr)))
    }

    /// List a session's scans, newest first, one page at a time.
    ///
    /// `page` is 1-based.
    pub async fn list_scans_by_session(
        &self,
        session_id: &str,
        page: u32,
        size: u32,
    ) -> Result<Vec<Scan>, DieselError> {
        let mut conn = self.pool.get().await?;

        let page = page.max(1) as i64;
        let offset = (page - 1) * size as i64;

        let records: Vec<ScanRecord> = scans::table
            .filter(scans::session_id.eq(session_id))
            .order(scans::created_at.desc())
            .limit(size as i64)
            .offset(offset)
            .load(&mut conn)
            .await?;

        Ok(records.into_iter().map(record_to_scan).collect())
    }

    /// Insert the stored-image row for a scan.
    pub async fn create_scan_image(&self, image: &ScanImage) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        let created_at = image.created_at.to_rfc3339();
        diesel::insert_into(scan_images::table)
            .values(NewScanImage {
                id: &image.id,
                scan_id: &image.scan_id,
                storage_path: &image.storage_path,
                mime_type: &image.mime_type,
                sha256: image.sha256.as_deref(),
                width: image.width,
                height: image.height,
                created_at: &created_at,
            })
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Get the stored image for a scan.
    pub async fn get_scan_image(&self, scan_id: &str) -> Result<Option<ScanImage>, DieselError> {
        let mut conn = self.pool.get().await?;

        let record: Option<ScanImageRecord> = scan_images::table
            .filter(scan_images::scan_id.eq(scan_id))
            .first(&mut conn)
            .await
            .optional()?;

        Ok(record.map(record_to_scan_image))
    }

    /// Insert the OCR result for a scan. At most one ever exists; the
    /// unique index on scan_id rejects a second insert.
    pub async fn create_ocr_result(&self, result: &OcrResult) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        let created_at = result.created_at.to_rfc3339();
        diesel::insert_into(ocr_results::table)
            .values(NewOcrResult {
                id: &result.id,
                scan_id: &result.scan_id,
                model: &result.model,
                language: result.language.as_deref(),
                raw_text: &result.raw_text,
                structured_json: result.structured_json.as_deref(),
                prompt_version: &result.prompt_version,
                created_at: &created_at,
            })
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Get the OCR result for a scan.
    pub async fn get_ocr_result(&self, scan_id: &str) -> Result<Option<OcrResult>, DieselError> {
        let mut conn = self.pool.get().await?;

        let record: Option<OcrResultRecord> = ocr_results::table
            .filter(ocr_results::scan_id.eq(scan_id))
            .first(&mut conn)
            .await
            .optional()?;

        Ok(record.map(record_to_ocr_result))
    }
}

fn record_to_scan(record: ScanRecord) -> Scan {
    Scan {
        status: ScanStatus::from_str(&record.status).unwrap_or(ScanStatus::Failed),
        id: record.id,
        session_id: record.session_id,
        source: record.source,
        created_at: parse_datetime(&record.created_at),
    }
}

fn record_to_scan_image(record: ScanImageRecord) -> ScanImage {
    ScanImage {
        id: record.id,
        scan_id: record.scan_id,
        storage_path: record.storage_path,
        mime_type: record.mime_type,
        sha256: record.sha256,
        width: record.width,
        height: record.height,
        created_at: parse_datetime(&record.created_at),
    }
}

fn record_to_ocr_result(record: OcrResultRecord) -> OcrResult {
    OcrResult {
        id: record.id,
        scan_id: record.scan_id,
        model: record.model,
        language: record.language,
        raw_text: record.raw_text,
        structured_json: record.structured_json,
        prompt_version: record.prompt_version,
        created_at: parse_datetime(&record.created_at),
    }
}
