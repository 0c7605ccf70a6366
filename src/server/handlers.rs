//! JSON API handlers.
//!
//! Validation errors surface synchronously with a JSON error body;
//! ingestion failures are only observable through status polling.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::models::{Annotation, OcrResult, Scan};
use crate::repository::DieselError;
use crate::services::{AnnotateError, UploadError};

/// Header carrying the caller's session identity.
const SESSION_HEADER: &str = "x-session-id";

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// An error response with a status code and message.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self
                .status
                .canonical_reason()
                .unwrap_or("error")
                .to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<DieselError> for ApiError {
    fn from(err: DieselError) -> Self {
        tracing::error!(error = %err, "database error");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "database error")
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match &err {
            UploadError::InvalidImageType => ApiError::new(StatusCode::BAD_REQUEST, err.to_string()),
            UploadError::TooLarge { .. } => {
                ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
            }
            UploadError::Database(db_err) => {
                tracing::error!(error = %db_err, "upload database error");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to initialize scan")
            }
            UploadError::Storage(io_err) => {
                tracing::error!(error = %io_err, "upload storage error");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to save uploaded image",
                )
            }
        }
    }
}

impl From<AnnotateError> for ApiError {
    fn from(err: AnnotateError) -> Self {
        match &err {
            AnnotateError::EmptySelection | AnnotateError::SelectionTooLong => {
                ApiError::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            AnnotateError::NotReady => ApiError::new(StatusCode::CONFLICT, err.to_string()),
            AnnotateError::Generation(_) => ApiError::new(
                StatusCode::BAD_GATEWAY,
                "failed to generate annotation, please try again",
            ),
            AnnotateError::Database(db_err) => {
                tracing::error!(error = %db_err, "annotation database error");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to save annotation")
            }
        }
    }
}

/// Require a non-empty session id header.
fn session_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "session required"))
}

/// Scan as returned to clients.
#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub id: String,
    pub status: String,
    pub image_url: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl ScanResponse {
    fn from_scan(scan: &Scan, ocr: Option<&OcrResult>) -> Self {
        Self {
            image_url: format!("/v1/scans/{}/image", scan.id),
            id: scan.id.clone(),
            status: scan.status.as_str().to_string(),
            created_at: scan.created_at.to_rfc3339(),
            full_text: ocr.map(|o| o.raw_text.clone()),
            language: ocr.and_then(|o| o.language.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub current_page: u32,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_page: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ScanListResponse {
    pub data: Vec<ScanResponse>,
    pub meta: PaginationMeta,
}

#[derive(Debug, Deserialize)]
pub struct AnnotateRequest {
    pub selected_text: String,
}

/// Liveness probe.
pub async fn healthz() -> impl IntoResponse {
    "ok"
}

/// `POST /v1/scans`: multipart upload with an `image` field. Returns 201
/// with the scan in its initial `uploaded` state; OCR happens in the
/// background.
pub async fn create_scan(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ScanResponse>), ApiError> {
    let session = session_id(&headers)?;

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("failed to parse form: {}", e)))?
    {
        if field.name() == Some("image") {
            let mime = field.content_type().unwrap_or("").to_string();
            let bytes = field.bytes().await.map_err(|e| {
                ApiError::new(StatusCode::BAD_REQUEST, format!("failed to read upload: {}", e))
            })?;
            upload = Some((mime, bytes.to_vec()));
            break;
        }
    }

    let (mime_type, image) = upload
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "please select an image to upload"))?;

    let scan = state.scans.upload(&session, image, &mime_type).await?;
    Ok((
        StatusCode::CREATED,
        Json(ScanResponse::from_scan(&scan, None)),
    ))
}

/// `GET /v1/scans`: page through the session's scans, newest first.
pub async fn list_scans(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Result<Json<ScanListResponse>, ApiError> {
    let session = session_id(&headers)?;

    let page = params.page.unwrap_or(1).max(1);
    let size = params
        .size
        .unwrap_or(state.default_page_size)
        .clamp(1, 100);

    let scans = state.scans.list_scans(&session, page, size).await?;

    let data: Vec<ScanResponse> = scans
        .iter()
        .map(|scan| ScanResponse::from_scan(scan, None))
        .collect();

    let meta = PaginationMeta {
        current_page: page,
        page_size: size,
        next_page: (scans.len() as u32 == size).then_some(page + 1),
        previous_page: (page > 1).then(|| page - 1),
    };

    Ok(Json(ScanListResponse { data, meta }))
}

/// `GET /v1/scans/:id`: status poll. The OCR text is included once the
/// scan reaches `ocr_done`.
pub async fn get_scan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(scan_id): Path<String>,
) -> Result<Json<ScanResponse>, ApiError> {
    let session = session_id(&headers)?;

    let (scan, ocr) = state
        .scans
        .get_scan(&scan_id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "scan not found"))?;

    if scan.session_id != session {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "access denied"));
    }

    Ok(Json(ScanResponse::from_scan(&scan, ocr.as_ref())))
}

/// `GET /v1/scans/:id/image`: the stored image bytes.
pub async fn get_scan_image(
    State(state): State<AppState>,
    Path(scan_id): Path<String>,
) -> Result<Response, ApiError> {
    let (image, data) = state
        .scans
        .get_image(&scan_id)
        .await
        .map_err(|err| match err {
            UploadError::Storage(io_err) => {
                tracing::error!(error = %io_err, scan_id, "failed to open stored image");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to load image")
            }
            other => ApiError::from(other),
        })?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "image not found"))?;

    Ok((
        [
            (header::CONTENT_TYPE, image.mime_type),
            (
                header::CACHE_CONTROL,
                "public, max-age=31536000".to_string(),
            ),
        ],
        data,
    )
        .into_response())
}

/// `POST /v1/scans/:id/annotate`: generate and persist a gloss for a
/// selected span of the scan's OCR text.
pub async fn annotate_scan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(scan_id): Path<String>,
    Json(request): Json<AnnotateRequest>,
) -> Result<(StatusCode, Json<Annotation>), ApiError> {
    let session = session_id(&headers)?;
    let scan = require_owned_scan(&state, &scan_id, &session).await?;

    let annotation = state
        .annotations
        .annotate(&scan.id, &request.selected_text)
        .await?;

    Ok((StatusCode::CREATED, Json(annotation)))
}

/// `GET /v1/scans/:id/annotations`: all annotations for a scan.
pub async fn list_annotations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(scan_id): Path<String>,
) -> Result<Json<Vec<Annotation>>, ApiError> {
    let session = session_id(&headers)?;
    let scan = require_owned_scan(&state, &scan_id, &session).await?;

    let annotations = state.annotations.list(&scan.id).await?;
    Ok(Json(annotations))
}

async fn require_owned_scan(
    state: &AppState,
    scan_id: &str,
    session: &str,
) -> Result<Scan, ApiError> {
    let (scan, _) = state
        .scans
        .get_scan(scan_id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "scan not found"))?;

    if scan.session_id != session {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "access denied"));
    }
    Ok(scan)
}
