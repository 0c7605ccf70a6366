//! Annotation repository.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::{AsyncSqlitePool, DieselError};
use super::records::{AnnotationRecord, NewAnnotation};
use super::parse_datetime;
use crate::models::Annotation;
use crate::schema::annotations;

/// Repository for span annotations. Rows are immutable once written.
#[derive(Clone)]
pub struct AnnotationRepository {
    pool: AsyncSqlitePool,
}

impl AnnotationRepository {
    /// Create a new annotation repository.
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new annotation row.
    pub async fn create_annotation(&self, annotation: &Annotation) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        let created_at = annotation.created_at.to_rfc3339();
        diesel::insert_into(annotations::table)
            .values(NewAnnotation {
                id: &annotation.id,
                scan_id: &annotation.scan_id,
                ocr_result_id: &annotation.ocr_result_id,
                selected_text: &annotation.selected_text,
                meaning: &annotation.meaning,
                usage_example: &annotation.usage_example,
                when_to_use: &annotation.when_to_use,
                word_breakdown: &annotation.word_breakdown,
                alternative_meanings: &annotation.alternative_meanings,
                model: &annotation.model,
                prompt_version: &annotation.prompt_version,
                created_at: &created_at,
            })
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// List all annotations for a scan, oldest first.
    pub async fn list_annotations_by_scan(
        &self,
        scan_id: &str,
    ) -> Result<Vec<Annotation>, DieselError> {
        let mut conn = self.pool.get().await?;

        let records: Vec<AnnotationRecord> = annotations::table
            .filter(annotations::scan_id.eq(scan_id))
            .order(annotations::created_at.asc())
            .load(&mut conn)
            .await?;

        Ok(records.into_iter().map(record_to_annotation).collect())
    }

    /// Count annotations for a scan.
    pub async fn count_by_scan(&self, scan_id: &str) -> Result<u64, DieselError> {
        let mut conn = self.pool.get().await?;

        use diesel::dsl::count_star;
        let count: i64 = annotations::table
            .filter(annotations::scan_id.eq(scan_id))
            .select(count_star())
            .first(&mut conn)
            .await?;

        Ok(count as u64)
    }
}

fn record_to_annotation(record: AnnotationRecord) -> Annotation {
    Annotation {
        id: record.id,
        scan_id: record.scan_id,
        ocr_result_id: record.ocr_result_id,
        selected_text: record.selected_text,
        meaning: record.meaning,
        usage_example: record.usage_example,
        when_to_use: record.when_to_use,
        word_breakdown: record.word_breakdown,
        alternative_meanings: record.alternative_meanings,
        model: record.model,
        prompt_version: record.prompt_version,
        created_at: parse_datetime(&record.created_at),
    }
}
