//! HTTP endpoints for facegated using axum.
//!
//! Endpoints:
//! - POST   /api/student/face-registration          - enroll one face sample
//! - GET    /api/student/:student_id/registered-faces - list a student's samples
//! - DELETE /api/student/face                        - delete one sample
//! - POST   /api/attendance/face-verification       - verify a face image
//! - GET    /health                                  - liveness and engine status

use std::future::Future;
use std::time::Duration;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use facegate_core::matcher::MatchOutcome;
use facegate_core::service::{RegisterOutcome, ServiceStatus, VerifyOutcome, VerifyReport};
use facegate_core::types::{EmbeddingSummary, IdentityId};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::engine::{EngineError, EngineHandle};
use crate::error::ApiError;
use crate::payload;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

/// Build the axum router with all endpoints.
pub fn router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_body_bytes);
    Router::new()
        .route("/health", get(health))
        .route("/api/student/face-registration", post(register_face))
        .route(
            "/api/student/:student_id/registered-faces",
            get(registered_faces),
        )
        .route("/api/student/face", delete(delete_face))
        .route("/api/attendance/face-verification", post(verify_face))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Request / Response types ────────────────────────────────────────

/// JSON envelope shared by every `/api` response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub student_id: i64,
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct RegistrationData {
    pub student_id: IdentityId,
    pub embedding_id: String,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    /// Absent for a search over every registered student.
    pub student_id: Option<i64>,
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct VerificationData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<IdentityId>,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_id: Option<String>,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct RegisteredFaces {
    pub student_id: IdentityId,
    pub face_count: usize,
    pub faces: Vec<EmbeddingSummary>,
}

#[derive(Deserialize)]
pub struct DeleteRequest {
    pub student_id: i64,
    #[serde(default)]
    pub embedding_id: String,
}

#[derive(Debug, Serialize)]
pub struct DeletedFace {
    pub student_id: IdentityId,
    pub embedding_id: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    #[serde(flatten)]
    engine: ServiceStatus,
}

// ── Handlers ────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let engine = within(&state, state.engine.status()).await?;
    Ok(Json(HealthResponse {
        status: "healthy",
        service: "facegated",
        engine,
    }))
}

async fn register_face(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<RegistrationData>>, ApiError> {
    let Json(req) = body?;
    let student_id = IdentityId::new(req.student_id)?;
    let image = payload::decode_image(&req.image)?;
    tracing::info!(
        %student_id,
        width = image.width(),
        height = image.height(),
        "face registration request"
    );

    match within(&state, state.engine.register(student_id, image)).await? {
        RegisterOutcome::Registered { record, confidence } => Ok(Json(ApiResponse::ok(
            "Face registered successfully",
            RegistrationData {
                student_id,
                embedding_id: record.embedding_id,
                confidence,
                created_at: record.created_at,
            },
        ))),
        RegisterOutcome::Rejected(reason) => Ok(Json(ApiResponse::failure(reason.to_string()))),
    }
}

async fn verify_face(
    State(state): State<AppState>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<VerificationData>>, ApiError> {
    let Json(req) = body?;
    let student_id = req.student_id.map(IdentityId::new).transpose()?;
    let image = payload::decode_image(&req.image)?;
    tracing::info!(student_id = ?student_id.map(IdentityId::get), "face verification request");

    let outcome = match within(&state, state.engine.verify(student_id, image)).await? {
        VerifyOutcome::Rejected(reason) => {
            return Ok(Json(ApiResponse::failure(reason.to_string())));
        }
        VerifyOutcome::Completed(MatchOutcome::NoCandidates) => {
            return Err(ApiError::NotFound(match student_id {
                Some(id) => format!("No registered faces for student {id}"),
                None => "No registered faces found".to_string(),
            }));
        }
        VerifyOutcome::Completed(outcome) => outcome,
    };

    let report = VerifyReport::from(&outcome);
    let data = VerificationData {
        student_id: report.student_id.or(student_id),
        verified: report.matched,
        embedding_id: report.embedding_id,
        confidence: report.confidence,
        distance: report.distance,
    };
    let message = if data.verified {
        "Face verification successful"
    } else {
        "Face verification failed"
    };

    Ok(Json(ApiResponse {
        success: data.verified,
        message: message.to_string(),
        data: Some(data),
    }))
}

async fn registered_faces(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<ApiResponse<RegisteredFaces>>, ApiError> {
    let Path(student_id) = path?;
    let student_id = IdentityId::new(student_id)?;
    let faces = within(&state, state.engine.list(student_id)).await?;

    let message = if faces.is_empty() {
        "No registered faces found".to_string()
    } else {
        format!("Found {} registered faces", faces.len())
    };

    Ok(Json(ApiResponse::ok(
        message,
        RegisteredFaces {
            student_id,
            face_count: faces.len(),
            faces,
        },
    )))
}

async fn delete_face(
    State(state): State<AppState>,
    body: Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<DeletedFace>>, ApiError> {
    let Json(req) = body?;
    let student_id = IdentityId::new(req.student_id)?;

    let deleted = within(
        &state,
        state.engine.delete(student_id, req.embedding_id.clone()),
    )
    .await?;

    if !deleted {
        return Err(ApiError::NotFound(format!(
            "Embedding not found for student {student_id}"
        )));
    }

    Ok(Json(ApiResponse::ok(
        "Successfully deleted face data",
        DeletedFace {
            student_id,
            embedding_id: req.embedding_id,
        },
    )))
}

/// Await an engine call under the request timeout.
async fn within<T>(
    state: &AppState,
    call: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, ApiError> {
    match tokio::time::timeout(state.request_timeout, call).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => {
            tracing::warn!(timeout = ?state.request_timeout, "engine did not answer in time");
            Err(ApiError::Unavailable("Request timed out".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::payload::tests::encode_png;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use facegate_core::analyzer::{AnalyzerError, FaceAnalyzer};
    use facegate_core::detector::DetectorError;
    use facegate_core::service::{FaceService, ServiceConfig};
    use facegate_core::store::{SqliteStore, StoreOptions};
    use facegate_core::types::{DetectorOutput, Embedding};
    use image::{Rgb, RgbImage};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Reads its answer from the image: pixel (0,0) red = face count,
    /// pixel (1,0) = embedding, pixel (2,0) red = confidence × 255.
    struct PixelAnalyzer;

    impl FaceAnalyzer for PixelAnalyzer {
        fn analyze(&mut self, image: &RgbImage) -> Result<DetectorOutput, AnalyzerError> {
            let count = image.get_pixel(0, 0)[0] as usize;
            if count == 0 {
                return Ok(DetectorOutput::no_face());
            }
            let vector = image.get_pixel(1, 0).0.iter().map(|&c| c as f32).collect();
            let confidence = image.get_pixel(2, 0)[0] as f32 / 255.0;
            let mut output = DetectorOutput::single(confidence, Embedding::new(vector));
            output.face_count = count;
            Ok(output)
        }

        fn model_tag(&self) -> &str {
            "pixel-model"
        }

        fn detector_tag(&self) -> &str {
            "pixel-detector"
        }
    }

    /// Answers like [`PixelAnalyzer`], but only after `delay`.
    struct SlowAnalyzer {
        delay: Duration,
    }

    impl FaceAnalyzer for SlowAnalyzer {
        fn analyze(&mut self, image: &RgbImage) -> Result<DetectorOutput, AnalyzerError> {
            std::thread::sleep(self.delay);
            PixelAnalyzer.analyze(image)
        }

        fn model_tag(&self) -> &str {
            "pixel-model"
        }

        fn detector_tag(&self) -> &str {
            "pixel-detector"
        }
    }

    struct BrokenAnalyzer;

    impl FaceAnalyzer for BrokenAnalyzer {
        fn analyze(&mut self, _image: &RgbImage) -> Result<DetectorOutput, AnalyzerError> {
            Err(DetectorError::InferenceFailed("session poisoned".to_string()).into())
        }

        fn model_tag(&self) -> &str {
            "pixel-model"
        }

        fn detector_tag(&self) -> &str {
            "pixel-detector"
        }
    }

    const BODY_LIMIT: usize = 16 * 1024 * 1024;
    const VERIFY_URI: &str = "/api/attendance/face-verification";

    fn mark(image: &mut RgbImage, faces: u8, embedding: [u8; 3], confidence: u8) {
        image.put_pixel(0, 0, Rgb([faces, 0, 0]));
        image.put_pixel(1, 0, Rgb(embedding));
        image.put_pixel(2, 0, Rgb([confidence, 0, 0]));
    }

    fn photo(faces: u8, embedding: [u8; 3], confidence: u8) -> String {
        let mut image = RgbImage::from_pixel(120, 120, Rgb([128, 128, 128]));
        mark(&mut image, faces, embedding, confidence);
        encode_png(&image)
    }

    /// Square single-face photo filled with xorshift noise, so PNG cannot
    /// compress it and the payload grows with `side`.
    fn noisy_photo(side: u32) -> String {
        let mut image = RgbImage::new(side, side);
        let mut seed: u32 = 0x2545_f491;
        for pixel in image.pixels_mut() {
            for channel in pixel.0.iter_mut() {
                seed ^= seed << 13;
                seed ^= seed >> 17;
                seed ^= seed << 5;
                *channel = (seed >> 24) as u8;
            }
        }
        mark(&mut image, 1, [255, 0, 0], 230);
        encode_png(&image)
    }

    fn create_app_with<A>(
        analyzer: A,
        request_timeout: Duration,
        max_body_bytes: usize,
    ) -> (TempDir, Router)
    where
        A: FaceAnalyzer + Send + 'static,
    {
        let dir = TempDir::new().unwrap();
        let store =
            SqliteStore::open(&dir.path().join("faces.db"), StoreOptions::default()).unwrap();
        let service = FaceService::new(store, analyzer, ServiceConfig::default());
        let engine = spawn_engine(service).unwrap();
        let app = router(AppState {
            engine,
            request_timeout,
            max_body_bytes,
        });
        (dir, app)
    }

    fn create_test_app() -> (TempDir, Router) {
        create_app_with(PixelAnalyzer, Duration::from_secs(5), BODY_LIMIT)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let resp = app.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn register(app: &Router, student_id: i64, image: String) -> (StatusCode, Value) {
        send(
            app,
            "POST",
            "/api/student/face-registration",
            Some(json!({ "student_id": student_id, "image": image })),
        )
        .await
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, app) = create_test_app();
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "facegated");
        assert_eq!(body["model"], "pixel-model");
        assert_eq!(body["total_embeddings"], 0);
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let (_dir, app) = create_test_app();

        let (status, body) = register(&app, 7, photo(1, [255, 0, 0], 230)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["student_id"], 7);
        let embedding_id = body["data"]["embedding_id"].as_str().unwrap().to_string();
        assert!(!embedding_id.is_empty());

        let (status, body) = send(&app, "GET", "/api/student/7/registered-faces", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["face_count"], 1);
        assert_eq!(body["data"]["faces"][0]["embedding_id"], embedding_id);
        assert_eq!(body["data"]["faces"][0]["model"], "pixel-model");
    }

    #[tokio::test]
    async fn test_register_rejections_are_not_errors() {
        let (_dir, app) = create_test_app();

        let (status, body) = register(&app, 7, photo(0, [0, 0, 0], 0)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "No face detected");
        assert!(body["data"].is_null());

        let (_, body) = register(&app, 7, photo(2, [255, 0, 0], 230)).await;
        assert_eq!(
            body["message"],
            "Multiple faces detected, please provide an image with only one face"
        );

        let (_, body) = register(&app, 7, photo(1, [255, 0, 0], 100)).await;
        assert_eq!(body["success"], false);

        let (_, body) = send(&app, "GET", "/api/student/7/registered-faces", None).await;
        assert_eq!(body["data"]["face_count"], 0);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (_dir, app) = create_test_app();

        let (status, body) = register(&app, 0, photo(1, [255, 0, 0], 230)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = register(&app, 7, "not an image".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = register(&app, 7, String::new()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            "POST",
            "/api/student/face-registration",
            Some(json!({ "image": photo(1, [255, 0, 0], 230) })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_data_url_image() {
        let (_dir, app) = create_test_app();
        let image = format!("data:image/png;base64,{}", photo(1, [255, 0, 0], 230));
        let (status, body) = register(&app, 3, image).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn test_verify_scoped() {
        let (_dir, app) = create_test_app();
        register(&app, 7, photo(1, [255, 0, 0], 230)).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/attendance/face-verification",
            Some(json!({ "student_id": 7, "image": photo(1, [255, 0, 0], 200) })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["verified"], true);
        assert_eq!(body["data"]["student_id"], 7);
        assert!(body["data"]["confidence"].as_f64().unwrap() > 0.99);

        let (status, body) = send(
            &app,
            "POST",
            "/api/attendance/face-verification",
            Some(json!({ "student_id": 7, "image": photo(1, [0, 255, 0], 200) })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Face verification failed");
        assert_eq!(body["data"]["verified"], false);
        assert_eq!(body["data"]["confidence"], 0.0);
        assert!(body["data"]["distance"].as_f64().unwrap() > 0.6);
    }

    #[tokio::test]
    async fn test_verify_global() {
        let (_dir, app) = create_test_app();

        let request = json!({ "image": photo(1, [0, 0, 255], 200) });
        let (status, body) = send(&app, "POST", VERIFY_URI, Some(request.clone())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        register(&app, 1, photo(1, [255, 0, 0], 230)).await;
        register(&app, 2, photo(1, [0, 0, 255], 230)).await;

        let (status, body) = send(&app, "POST", VERIFY_URI, Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["verified"], true);
        assert_eq!(body["data"]["student_id"], 2);
    }

    #[tokio::test]
    async fn test_verify_unknown_student() {
        let (_dir, app) = create_test_app();
        register(&app, 1, photo(1, [255, 0, 0], 230)).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/attendance/face-verification",
            Some(json!({ "student_id": 99, "image": photo(1, [255, 0, 0], 230) })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "No registered faces for student 99");
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, app) = create_test_app();
        let (_, body) = register(&app, 7, photo(1, [255, 0, 0], 230)).await;
        let embedding_id = body["data"]["embedding_id"].clone();

        let request = json!({ "student_id": 7, "embedding_id": embedding_id });
        let (status, body) = send(&app, "DELETE", "/api/student/face", Some(request.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["embedding_id"], embedding_id);

        let (status, body) = send(&app, "DELETE", "/api/student/face", Some(request)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, _) = send(
            &app,
            "DELETE",
            "/api/student/face",
            Some(json!({ "student_id": 7, "embedding_id": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_engine_gone_is_unavailable() {
        let app = router(AppState {
            engine: EngineHandle::disconnected(),
            request_timeout: Duration::from_secs(1),
            max_body_bytes: BODY_LIMIT,
        });
        let (status, body) = send(&app, "GET", "/api/student/7/registered-faces", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_register_photo_over_two_megabytes() {
        let (_dir, app) = create_test_app();
        let image = noisy_photo(1000);
        assert!(image.len() > 2 * 1024 * 1024);

        let (status, body) = register(&app, 11, image).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["student_id"], 11);
    }

    #[tokio::test]
    async fn test_body_over_limit_is_rejected() {
        let (_dir, app) = create_app_with(PixelAnalyzer, Duration::from_secs(5), 64 * 1024);
        let (status, body) = register(&app, 11, noisy_photo(200)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["success"], false);
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn test_slow_engine_times_out() {
        let analyzer = SlowAnalyzer {
            delay: Duration::from_millis(500),
        };
        let (_dir, app) = create_app_with(analyzer, Duration::from_millis(100), BODY_LIMIT);

        let (status, body) = register(&app, 7, photo(1, [255, 0, 0], 230)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Request timed out");
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn test_analyzer_failure_is_internal_error() {
        let (_dir, app) = create_app_with(BrokenAnalyzer, Duration::from_secs(5), BODY_LIMIT);

        let (status, body) = register(&app, 7, photo(1, [255, 0, 0], 230)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("session poisoned"));

        let request = json!({ "student_id": 7, "image": photo(1, [255, 0, 0], 230) });
        let (status, _) =
            send(&app, "POST", "/api/attendance/face-verification", Some(request)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_non_numeric_student_path() {
        let (_dir, app) = create_test_app();
        let (status, body) = send(&app, "GET", "/api/student/abc/registered-faces", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["data"].is_null());

        let (status, _) = send(&app, "GET", "/api/student/0/registered-faces", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
