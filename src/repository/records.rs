//! Diesel ORM records for database tables.
//!
//! These provide compile-time type checking for database operations.
//! Timestamps are stored as RFC3339 text and converted at the repository
//! boundary.

use diesel::prelude::*;

use crate::schema;

/// Scan record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::scans)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ScanRecord {
    pub id: String,
    pub session_id: String,
    pub source: String,
    pub status: String,
    pub created_at: String,
}

/// New scan for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::scans)]
pub struct NewScan<'a> {
    pub id: &'a str,
    pub session_id: &'a str,
    pub source: &'a str,
    pub status: &'a str,
    pub created_at: &'a str,
}

/// Scan image record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::scan_images)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ScanImageRecord {
    pub id: String,
    pub scan_id: String,
    pub storage_path: String,
    pub mime_type: String,
    pub sha256: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub created_at: String,
}

/// New scan image for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::scan_images)]
pub struct NewScanImage<'a> {
    pub id: &'a str,
    pub scan_id: &'a str,
    pub storage_path: &'a str,
    pub mime_type: &'a str,
    pub sha256: Option<&'a str>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub created_at: &'a str,
}

/// OCR result record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::ocr_results)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct OcrResultRecord {
    pub id: String,
    pub scan_id: String,
    pub model: String,
    pub language: Option<String>,
    pub raw_text: String,
    pub structured_json: Option<String>,
    pub prompt_version: String,
    pub created_at: String,
}

/// New OCR result for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::ocr_results)]
pub struct NewOcrResult<'a> {
    pub id: &'a str,
    pub scan_id: &'a str,
    pub model: &'a str,
    pub language: Option<&'a str>,
    pub raw_text: &'a str,
    pub structured_json: Option<&'a str>,
    pub prompt_version: &'a str,
    pub created_at: &'a str,
}

/// Annotation record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::annotations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AnnotationRecord {
    pub id: String,
    pub scan_id: String,
    pub ocr_result_id: String,
    pub selected_text: String,
    pub meaning: String,
    pub usage_example: String,
    pub when_to_use: String,
    pub word_breakdown: String,
    pub alternative_meanings: String,
    pub model: String,
    pub prompt_version: String,
    pub created_at: String,
}

/// New annotation for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::annotations)]
pub struct NewAnnotation<'a> {
    pub id: &'a str,
    pub scan_id: &'a str,
    pub ocr_result_id: &'a str,
    pub selected_text: &'a str,
    pub meaning: &'a str,
    pub usage_example: &'a str,
    pub when_to_use: &'a str,
    pub word_breakdown: &'a str,
    pub alternative_meanings: &'a str,
    pub model: &'a str,
    pub prompt_version: &'a str,
    pub created_at: &'a str,
}
