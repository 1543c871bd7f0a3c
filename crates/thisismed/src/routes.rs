use crate::audit::{AuditHandle, InferenceRecord};
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thisisme_core::{ArtifactKey, RecognitionError, Recognizer};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub recognizer: Arc<Recognizer>,
    pub audit: Option<AuditHandle>,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/status", get(status))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error body: `{"error": "<reason>"}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<RecognitionError> for ApiError {
    fn from(e: RecognitionError) -> Self {
        if e.is_client_error() {
            Self::bad_request(e.to_string())
        } else {
            Self::internal(e.to_string())
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self {
            status: e.status(),
            message: e.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        } else {
            tracing::info!(status = %self.status, error = %self.message, "request rejected");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct RankingEntry {
    position: String,
    identity: String,
    confidence: String,
}

#[derive(Debug, Serialize)]
struct PredictResponse {
    ranking_top_5: Vec<RankingEntry>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    version: &'static str,
    policy: String,
    classes: usize,
    cached: Vec<ArtifactKey>,
}

/// Accept `"40"` and integral decimals such as `"40.0"`; anything else,
/// including zero, is rejected.
fn parse_n_components(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let n = match raw.parse::<u32>() {
        Ok(n) => n,
        Err(_) => {
            let v: f64 = raw.parse().ok()?;
            if !v.is_finite() || v.fract() != 0.0 || v < 1.0 || v > u32::MAX as f64 {
                return None;
            }
            v as u32
        }
    };
    (n > 0).then_some(n)
}

fn format_confidence(probability: f64) -> String {
    format!("{:.2}%", probability * 100.0)
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

async fn predict(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<PredictResponse>, ApiError> {
    let mut upload: Option<Upload> = None;
    let mut n_components_raw: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?.to_vec();
                upload = Some(Upload { filename, bytes });
            }
            "n_components" => n_components_raw = Some(field.text().await?),
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| ApiError::bad_request("no file uploaded"))?;
    if upload.filename.trim().is_empty() {
        return Err(ApiError::bad_request("empty filename"));
    }
    let raw = n_components_raw.ok_or_else(|| ApiError::bad_request("parameter 'n_components' (integer) is required"))?;
    let n_components = parse_n_components(&raw)
        .ok_or_else(|| ApiError::bad_request(format!("n_components must be a positive integer, got '{raw}'")))?;

    let recognizer = Arc::clone(&state.recognizer);
    let (recognition, upload) = tokio::task::spawn_blocking(move || {
        let result = recognizer.recognize_bytes(&upload.bytes, n_components);
        (result, upload)
    })
    .await
    .map_err(|e| ApiError::internal(format!("recognition task failed: {e}")))?;
    let recognition = recognition?;

    if let Some(audit) = &state.audit {
        let record = InferenceRecord::new(&upload.filename, &upload.bytes, &recognition);
        let archived = audit.archiving().then_some(upload.bytes);
        audit.submit(record, archived);
    }

    let ranking_top_5 = recognition
        .ranking
        .iter()
        .enumerate()
        .map(|(i, entry)| RankingEntry {
            position: format!("Top {}", i + 1),
            identity: entry.label.clone(),
            confidence: format_confidence(entry.probability),
        })
        .collect();

    Ok(Json(PredictResponse { ranking_top_5 }))
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        policy: state.recognizer.policy().to_string(),
        classes: state.recognizer.labels().len(),
        cached: state.recognizer.cached_keys(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::io::Cursor;
    use thisisme_core::artifacts::{ClassifierModel, MeanVector, ProjectionModel};
    use thisisme_core::detector::DetectorError;
    use thisisme_core::types::FACE_LEN;
    use thisisme_core::{
        ArtifactError, ArtifactId, ArtifactStore, BoundingBox, Channel, CombinationPolicy, FaceDetector, GrayFrame,
        LabelTable,
    };
    use tower::ServiceExt;

    const BOUNDARY: &str = "thisisme-test-boundary";

    struct StubDetector(Vec<BoundingBox>);

    impl FaceDetector for StubDetector {
        fn detect(&self, _frame: &GrayFrame) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    /// Zero projections and an intercept-only classifier; `n = 13` is missing.
    struct StubStore;

    impl ArtifactStore for StubStore {
        fn projection(&self, channel: Channel, n: u32) -> Result<ProjectionModel, ArtifactError> {
            if n == 13 {
                return Err(ArtifactError::NotFound {
                    id: ArtifactId::Projection { channel, n_components: n },
                    path: "/models/pca".into(),
                });
            }
            Ok(ProjectionModel::new(vec![0.0; FACE_LEN], vec![vec![0.0; FACE_LEN]; n as usize], None, false).unwrap())
        }

        fn classifier(&self, policy: CombinationPolicy, n: u32) -> Result<ClassifierModel, ArtifactError> {
            let features = n as usize * policy.channels().len();
            Ok(ClassifierModel::new(vec![vec![0.0; features]; 6], vec![3.0, 0.0, 2.0, 0.0, 1.0, 0.0]).unwrap())
        }

        fn mean(&self, _channel: Channel) -> Result<MeanVector, ArtifactError> {
            Ok(MeanVector::new(vec![0.0; FACE_LEN]).unwrap())
        }
    }

    fn app(boxes: Vec<BoundingBox>) -> Router {
        let labels = LabelTable::new(["Ana", "Bruno", "Caio", "Dora", "Élio", "Fábio"].map(String::from).to_vec()).unwrap();
        let recognizer = Recognizer::new(
            Arc::new(StubDetector(boxes)),
            Arc::new(StubStore),
            labels,
            CombinationPolicy::OriginalHistogramGabor,
        );
        router(
            AppState {
                recognizer: Arc::new(recognizer),
                audit: None,
            },
            1024 * 1024,
        )
    }

    fn png() -> Vec<u8> {
        let img = image::GrayImage::from_fn(120, 140, |x, y| image::Luma([((x + y) % 256) as u8]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn multipart_body(file: Option<(&str, &[u8])>, n_components: Option<&str>) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some((filename, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        if let Some(n) = n_components {
            body.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"n_components\"\r\n\r\n{n}\r\n").as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn post_predict(app: Router, body: Vec<u8>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/predict")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn face_box() -> Vec<BoundingBox> {
        vec![BoundingBox::new(20, 20, 80, 100)]
    }

    #[test]
    fn test_parse_n_components() {
        assert_eq!(parse_n_components("40"), Some(40));
        assert_eq!(parse_n_components(" 7 "), Some(7));
        assert_eq!(parse_n_components("40.0"), Some(40));
        assert_eq!(parse_n_components("40.5"), None);
        assert_eq!(parse_n_components("0"), None);
        assert_eq!(parse_n_components("-3"), None);
        assert_eq!(parse_n_components("abc"), None);
        assert_eq!(parse_n_components(""), None);
    }

    #[test]
    fn test_format_confidence() {
        assert_eq!(format_confidence(0.4217), "42.17%");
        assert_eq!(format_confidence(1.0), "100.00%");
    }

    #[tokio::test]
    async fn test_predict_returns_top_five() {
        let png = png();
        let (status, body) = post_predict(app(face_box()), multipart_body(Some(("face.png", &png)), Some("2"))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let ranking = body["ranking_top_5"].as_array().unwrap();
        assert_eq!(ranking.len(), 5);
        assert_eq!(ranking[0]["position"], "Top 1");
        assert_eq!(ranking[0]["identity"], "Ana");
        assert_eq!(ranking[1]["identity"], "Caio");
        assert_eq!(ranking[2]["identity"], "Élio");
        assert!(ranking[0]["confidence"].as_str().unwrap().ends_with('%'));
    }

    #[tokio::test]
    async fn test_predict_missing_file() {
        let (status, body) = post_predict(app(face_box()), multipart_body(None, Some("2"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "no file uploaded");
    }

    #[tokio::test]
    async fn test_predict_empty_filename() {
        let png = png();
        let (status, body) = post_predict(app(face_box()), multipart_body(Some(("", &png)), Some("2"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "empty filename");
    }

    #[tokio::test]
    async fn test_predict_missing_n_components() {
        let png = png();
        let (status, body) = post_predict(app(face_box()), multipart_body(Some(("face.png", &png)), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("n_components"));
    }

    #[tokio::test]
    async fn test_predict_no_face() {
        let png = png();
        let (status, body) = post_predict(app(vec![]), multipart_body(Some(("face.png", &png)), Some("2"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "no face detected");
    }

    #[tokio::test]
    async fn test_predict_missing_artifacts_is_server_error() {
        let png = png();
        let (status, body) = post_predict(app(face_box()), multipart_body(Some(("face.png", &png)), Some("13"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("n_components=13"), "{body}");
    }

    #[tokio::test]
    async fn test_predict_undecodable_image() {
        let (status, body) =
            post_predict(app(face_box()), multipart_body(Some(("face.png", b"not an image")), Some("2"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("malformed input"), "{body}");
    }

    #[tokio::test]
    async fn test_status_reports_cache() {
        let app = app(face_box());
        let png = png();
        let (status, _) = post_predict(app.clone(), multipart_body(Some(("face.png", &png)), Some("3"))).await;
        assert_eq!(status, StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["policy"], "original_histograma_gabor");
        assert_eq!(body["classes"], 6);
        assert_eq!(body["cached"][0]["n_components"], 3);
        assert_eq!(body["cached"][0]["policy"], "original_histograma_gabor");
    }
}
