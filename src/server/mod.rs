//! JSON API server for scan upload, status polling, and annotation.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::llm::{GeminiClient, TextModel};
use crate::repository::{AnnotationRepository, AsyncSqlitePool, ScanRepository};
use crate::services::{AnnotationService, ScanService};
use crate::storage::ImageStore;

/// Shared state for the API server.
#[derive(Clone)]
pub struct AppState {
    pub scans: Arc<ScanService>,
    pub annotations: Arc<AnnotationService>,
    pub default_page_size: u32,
    pub max_upload_bytes: u64,
}

impl AppState {
    /// Build the full production state from settings.
    pub fn new(settings: &Settings, shutdown: CancellationToken) -> anyhow::Result<Self> {
        settings.ensure_dirs()?;
        let model: Arc<dyn TextModel> = Arc::new(GeminiClient::new(settings.gemini.clone()));
        Ok(Self::with_model(settings, model, shutdown))
    }

    /// Build state around a specific model gateway. Tests inject fakes here.
    pub fn with_model(
        settings: &Settings,
        model: Arc<dyn TextModel>,
        shutdown: CancellationToken,
    ) -> Self {
        let pool = AsyncSqlitePool::new(&settings.database_url());
        let scan_repo = ScanRepository::new(pool.clone());
        let annotation_repo = AnnotationRepository::new(pool);
        let store = ImageStore::new(settings.uploads_dir());

        let scans = ScanService::new(
            scan_repo.clone(),
            store,
            Arc::clone(&model),
            shutdown.clone(),
            settings.max_upload_bytes(),
        );
        let annotations =
            AnnotationService::new(scan_repo, annotation_repo, model, shutdown);

        Self {
            scans: Arc::new(scans),
            annotations: Arc::new(annotations),
            default_page_size: settings.default_page_size,
            max_upload_bytes: settings.max_upload_bytes(),
        }
    }
}

/// Start the API server. Runs until the shutdown token fires or Ctrl+C
/// arrives; in-flight background jobs observe the token and stop promptly.
pub async fn serve(
    settings: &Settings,
    host: &str,
    port: u16,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let state = AppState::new(settings, shutdown.clone())?;
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::tempdir;
    use tower::ServiceExt;

    use crate::llm::{GatewayError, OcrOutcome};
    use crate::models::{AnnotationContent, Scan};
    use crate::repository::run_migrations;

    const BOUNDARY: &str = "------------------------kotoscan";
    const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    /// Instant-success model so handler tests don't touch the network.
    struct FakeModel {
        fail_ocr: bool,
    }

    #[async_trait]
    impl crate::llm::TextModel for FakeModel {
        async fn extract_text(
            &self,
            _image: &[u8],
            _mime_type: &str,
            _cancel: &CancellationToken,
        ) -> Result<OcrOutcome, GatewayError> {
            if self.fail_ocr {
                return Err(GatewayError::Api("HTTP 503: overloaded".to_string()));
            }
            Ok(OcrOutcome {
                raw_text: "会議の資料を確認してください".to_string(),
                language: Some("ja".to_string()),
                structured_json: None,
            })
        }

        async fn annotate(
            &self,
            _full_text: &str,
            selected_text: &str,
            _cancel: &CancellationToken,
        ) -> Result<AnnotationContent, GatewayError> {
            Ok(AnnotationContent {
                meaning: format!("meaning of {}", selected_text),
                usage_example: "usage".to_string(),
                when_to_use: "when".to_string(),
                word_breakdown: "breakdown".to_string(),
                alternative_meanings: "alternatives".to_string(),
            })
        }

        fn model_name(&self) -> &str {
            "fake-model"
        }

        fn prompt_version(&self) -> &str {
            "test"
        }
    }

    async fn setup_test_app(
        fail_ocr: bool,
    ) -> (axum::Router, crate::config::Settings, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let settings = crate::config::Settings::with_data_dir(dir.path().to_path_buf());
        settings.ensure_dirs().unwrap();
        run_migrations(&settings.database_url()).await.unwrap();

        let model: Arc<dyn TextModel> = Arc::new(FakeModel { fail_ocr });
        let state = AppState::with_model(&settings, model, CancellationToken::new());
        let app = create_router(state);
        (app, settings, dir)
    }

    fn multipart_body(mime: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; \
                 filename=\"scan.png\"\r\nContent-Type: {mime}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(session: &str, mime: &str, bytes: &[u8]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/scans")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header("x-session-id", session)
            .body(Body::from(multipart_body(mime, bytes)))
            .unwrap()
    }

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    /// Poll the status endpoint until the scan leaves `uploaded`.
    async fn poll_until_terminal(
        app: &axum::Router,
        session: &str,
        scan_id: &str,
    ) -> serde_json::Value {
        for _ in 0..100 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri(format!("/v1/scans/{}", scan_id))
                        .header("x-session-id", session)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let json = response_json(response).await;
            if json["status"] != "uploaded" {
                return json;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("scan never left uploaded");
    }

    #[tokio::test]
    async fn test_healthz() {
        let (app, _settings, _dir) = setup_test_app(false).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upload_requires_session() {
        let (app, _settings, _dir) = setup_test_app(false).await;

        let mut request = upload_request("s", "image/png", PNG_MAGIC);
        request.headers_mut().remove("x-session-id");

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_upload_rejects_invalid_type() {
        let (app, _settings, _dir) = setup_test_app(false).await;

        let response = app
            .oneshot(upload_request("sess-a", "application/pdf", b"%PDF-1.4"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert!(json["message"].as_str().unwrap().contains("image type"));
    }

    #[tokio::test]
    async fn test_upload_poll_annotate_happy_path() {
        let (app, _settings, _dir) = setup_test_app(false).await;

        let response = app
            .clone()
            .oneshot(upload_request("sess-a", "image/png", PNG_MAGIC))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = response_json(response).await;
        assert_eq!(created["status"], "uploaded");
        let scan_id = created["id"].as_str().unwrap().to_string();

        let done = poll_until_terminal(&app, "sess-a", &scan_id).await;
        assert_eq!(done["status"], "ocr_done");
        assert_eq!(done["full_text"], "会議の資料を確認してください");
        assert_eq!(done["language"], "ja");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/scans/{}/annotate", scan_id))
                    .header("content-type", "application/json")
                    .header("x-session-id", "sess-a")
                    .body(Body::from(r#"{"selected_text":"資料"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let annotation = response_json(response).await;
        assert_eq!(annotation["selected_text"], "資料");
        assert_eq!(annotation["meaning"], "meaning of 資料");
        assert_eq!(annotation["model"], "fake-model");

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/scans/{}/annotations", scan_id))
                    .header("x-session-id", "sess-a")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let list = response_json(response).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_ocr_surfaces_through_status() {
        let (app, _settings, _dir) = setup_test_app(true).await;

        let response = app
            .clone()
            .oneshot(upload_request("sess-a", "image/png", PNG_MAGIC))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = response_json(response).await;
        let scan_id = created["id"].as_str().unwrap().to_string();

        let done = poll_until_terminal(&app, "sess-a", &scan_id).await;
        assert_eq!(done["status"], "failed_overloaded");
        assert!(done.get("full_text").is_none());
    }

    #[tokio::test]
    async fn test_foreign_session_is_forbidden() {
        let (app, _settings, _dir) = setup_test_app(false).await;

        let response = app
            .clone()
            .oneshot(upload_request("sess-a", "image/png", PNG_MAGIC))
            .await
            .unwrap();
        let created = response_json(response).await;
        let scan_id = created["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/scans/{}", scan_id))
                    .header("x-session-id", "sess-b")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unknown_scan_is_not_found() {
        let (app, _settings, _dir) = setup_test_app(false).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/scans/no-such-scan")
                    .header("x-session-id", "sess-a")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_annotate_before_ocr_is_conflict() {
        let (app, settings, _dir) = setup_test_app(false).await;

        // A scan inserted directly, bypassing upload: no background job
        // runs, so no OCR result will ever exist.
        let repo = crate::repository::ScanRepository::new(
            crate::repository::AsyncSqlitePool::new(&settings.database_url()),
        );
        let scan = Scan::new("sess-a".to_string(), "upload".to_string());
        repo.create_scan(&scan).await.unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/scans/{}/annotate", scan.id))
                    .header("content-type", "application/json")
                    .header("x-session-id", "sess-a")
                    .body(Body::from(r#"{"selected_text":"資料"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_annotate_empty_selection_is_rejected() {
        let (app, _settings, _dir) = setup_test_app(false).await;

        let response = app
            .clone()
            .oneshot(upload_request("sess-a", "image/png", PNG_MAGIC))
            .await
            .unwrap();
        let created = response_json(response).await;
        let scan_id = created["id"].as_str().unwrap().to_string();
        poll_until_terminal(&app, "sess-a", &scan_id).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/scans/{}/annotate", scan_id))
                    .header("content-type", "application/json")
                    .header("x-session-id", "sess-a")
                    .body(Body::from(r#"{"selected_text":"   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_scans_pagination_meta() {
        let (app, _settings, _dir) = setup_test_app(false).await;

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(upload_request("sess-a", "image/png", PNG_MAGIC))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/scans?page=1&size=2")
                    .header("x-session-id", "sess-a")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["data"].as_array().unwrap().len(), 2);
        assert_eq!(json["meta"]["current_page"], 1);
        assert_eq!(json["meta"]["page_size"], 2);
        assert_eq!(json["meta"]["next_page"], 2);
        assert!(json["meta"].get("previous_page").is_none());
    }
}
