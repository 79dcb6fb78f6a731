//! Axum routes and handlers.

use crate::dispatcher::HistoryDispatcher;
use crate::dto::*;
use crate::engine::{EngineError, EngineHandle};
use crate::source::{resolve_image_source, JsonImageRequest, RequestBody, UploadField};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use moodlens_core::{EmotionPipeline, PipelineError};
use moodlens_store::StoreError;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 1000;

/// Application state shared across handlers.
pub struct AppState {
    pub engine: EngineHandle,
    pub dispatcher: HistoryDispatcher,
    pub models_ready: bool,
    pub unavailable_reason: Option<String>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: EngineHandle, dispatcher: HistoryDispatcher, pipeline: &EmotionPipeline) -> Self {
        Self {
            engine,
            dispatcher,
            models_ready: pipeline.is_available(),
            unavailable_reason: pipeline.unavailable_reason().map(str::to_string),
            start_time: Instant::now(),
        }
    }
}

/// Build the HTTP router with all endpoints.
pub fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        // Detection
        .route("/api/emotion-detection/detect", post(detect_handler))
        .route("/api/emotion-detection/detect-anonymous", post(detect_anonymous_handler))
        // Identities
        .route("/api/identities", post(create_identity_handler))
        .route("/api/identities/{id}/history", get(history_handler))
        // System
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        // Middleware
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error response carrying an HTTP status and a stable error code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, message: &str, code: &str) -> Self {
        Self { status, body: ErrorResponse::new(message, code) }
    }

    fn malformed(status: StatusCode, message: &str) -> Self {
        Self::new(status, message, "MALFORMED_REQUEST")
    }

    fn store(e: StoreError) -> Self {
        match e {
            StoreError::IdentityNotFound(id) => Self::new(
                StatusCode::NOT_FOUND,
                &format!("identity not found: {id}"),
                "IDENTITY_NOT_FOUND",
            ),
            other => {
                tracing::error!(error = %other, "history store error");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, &other.to_string(), "STORE_FAILED")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let message = e.to_string();
        match e {
            PipelineError::NoImageData => Self::new(StatusCode::BAD_REQUEST, &message, "NO_IMAGE_DATA"),
            PipelineError::Decode(_) => Self::new(StatusCode::BAD_REQUEST, &message, "DECODE_ERROR"),
            PipelineError::ClassifierUnavailable(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, &message, "CLASSIFIER_UNAVAILABLE")
            }
            PipelineError::Detector(_) | PipelineError::Classifier(_) | PipelineError::Patch(_) => {
                tracing::error!(error = %message, "inference failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, &message, "INFERENCE_FAILED")
            }
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Pipeline(inner) => inner.into(),
            other => {
                tracing::error!(error = %other, "inference engine unavailable");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, &other.to_string(), "ENGINE_UNAVAILABLE")
            }
        }
    }
}

/// Collect the request body into the shape the source resolver understands.
async fn read_body(request: Request) -> Result<RequestBody, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let kind = content_type.as_deref().map(str::to_ascii_lowercase).unwrap_or_default();

    if kind.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ApiError::malformed(e.status(), &e.body_text()))?;
        let mut fields = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::malformed(e.status(), &e.body_text()))?
        {
            let name = field.name().unwrap_or("").to_string();
            let content_type = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::malformed(e.status(), &e.body_text()))?;
            fields.push(UploadField { name, content_type, data: data.to_vec() });
        }
        return Ok(RequestBody::Multipart(fields));
    }

    let bytes = Bytes::from_request(request, &())
        .await
        .map_err(|e| ApiError::malformed(e.status(), &e.body_text()))?;

    if kind.starts_with("application/json") {
        let req: JsonImageRequest = serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::malformed(StatusCode::BAD_REQUEST, &format!("invalid JSON body: {e}")))?;
        return Ok(RequestBody::Json(req));
    }

    Ok(RequestBody::Raw { content_type, bytes: bytes.to_vec() })
}

/// Detect the dominant face's emotion; records history when an identity is named.
pub async fn detect_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<DetectResponse>, ApiError> {
    let source = resolve_image_source(read_body(request).await?)?;
    let result = state.engine.infer(source.image).await?;

    let history_updated = match source.identity_id.as_deref() {
        Some(identity_id) => Some(state.dispatcher.dispatch(identity_id, &result).await),
        None => None,
    };

    Ok(Json(DetectResponse { result, history_updated }))
}

/// Detect without touching any identity's history.
pub async fn detect_anonymous_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<DetectResponse>, ApiError> {
    let source = resolve_image_source(read_body(request).await?)?;
    if source.identity_id.is_some() {
        tracing::debug!("identity ignored on anonymous detection");
    }
    let result = state.engine.infer(source.image).await?;
    Ok(Json(DetectResponse { result, history_updated: None }))
}

pub async fn create_identity_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateIdentityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let store = require_store(&state)?;
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "name must not be empty", "INVALID_NAME"));
    }
    let identity = store.create_identity(name).await.map_err(ApiError::store)?;
    Ok((StatusCode::CREATED, Json(identity)))
}

/// Most recent history entries (oldest first) plus the identity's current emotion.
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let store = require_store(&state)?;
    let identity = store
        .get_identity(&id)
        .await
        .map_err(ApiError::store)?
        .ok_or_else(|| ApiError::store(StoreError::IdentityNotFound(id.clone())))?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT);
    let history = store.history(&id, limit).await.map_err(ApiError::store)?;
    Ok(Json(HistoryResponse { identity, history }))
}

pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        models_loaded: state.models_ready,
        models_unavailable_reason: state.unavailable_reason.clone(),
        engine_workers: state.engine.workers(),
        history_store: state.dispatcher.store().is_some(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

fn require_store(state: &AppState) -> Result<&Arc<dyn moodlens_store::HistoryStore>, ApiError> {
    state.dispatcher.store().ok_or_else(|| {
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "history store unavailable", "STORE_UNAVAILABLE")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::testutil::{observed_pipeline, pipeline_with, png, FailingStore, StaticClassifier, StaticDetector, HAPPY};
    use axum::body::Body;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use moodlens_core::{FaceRegion, ModelState, Outcome, PipelineConfig};
    use moodlens_store::{HistoryStore, IdentityEmotion, SqliteHistoryStore};
    use std::sync::atomic::Ordering;

    const BOUNDARY: &str = "moodlens-test-boundary";

    struct Harness {
        state: Arc<AppState>,
        store: Arc<SqliteHistoryStore>,
        detector: Arc<StaticDetector>,
        classifier: Arc<StaticClassifier>,
    }

    async fn harness(regions: Vec<FaceRegion>) -> Harness {
        let (pipeline, detector, classifier) = observed_pipeline(regions, HAPPY);
        let pipeline = Arc::new(pipeline);
        let engine = spawn_engine(pipeline.clone(), 1, 4, None).unwrap();
        let store = Arc::new(SqliteHistoryStore::open_in_memory().await.unwrap());
        let dispatcher = HistoryDispatcher::new(store.clone());
        Harness {
            state: Arc::new(AppState::new(engine, dispatcher, &pipeline)),
            store,
            detector,
            classifier,
        }
    }

    fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> Request {
        let mut body = Vec::new();
        for (name, content_type, data) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match content_type {
                Some(ct) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"upload\"\r\nContent-Type: {ct}\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        axum::http::Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    fn json(value: serde_json::Value) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap()
    }

    fn raw(content_type: &str, bytes: Vec<u8>) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(bytes))
            .unwrap()
    }

    #[tokio::test]
    async fn test_blank_image_without_identity_omits_history_flag() {
        let h = harness(vec![]).await;
        let image = png(10, 10).bytes;
        let Json(resp) = detect_handler(State(h.state.clone()), multipart(&[("image", Some("image/png"), &image)]))
            .await
            .unwrap();

        assert_eq!(resp.result.outcome, Outcome::NoFace);
        assert_eq!(resp.result.confidence, 0.0);
        assert!(resp.history_updated.is_none());

        let body = serde_json::to_value(&resp).unwrap();
        assert_eq!(body["emotion"], "no_face");
        assert!(body.get("history_updated").is_none());
        assert!(body.get("region").is_none());

        // strict and relaxed tiers both ran, the classifier never did
        assert_eq!(h.detector.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_identity_detection_appends_history() {
        let h = harness(vec![FaceRegion::new(50, 50, 120, 120)]).await;
        let id = h.store.create_identity("subject").await.unwrap().id;
        let image = png(300, 300).bytes;

        let Json(resp) = detect_handler(
            State(h.state.clone()),
            multipart(&[("file", Some("image/png"), &image), ("identity_id", None, id.as_bytes())]),
        )
        .await
        .unwrap();

        assert_eq!(resp.result.outcome.as_str(), "happy");
        assert_eq!(resp.history_updated, Some(true));
        let history = h.store.history(&id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].emotion, IdentityEmotion::Happy);

        let body = serde_json::to_value(&resp).unwrap();
        assert_eq!(body["history_updated"], true);
        assert!(body["probabilities"]["happy"].as_f64().unwrap() > 0.8);
    }

    #[tokio::test]
    async fn test_json_base64_request() {
        let h = harness(vec![FaceRegion::new(0, 0, 60, 60)]).await;
        let payload = format!("data:image/png;base64,{}", STANDARD.encode(png(120, 120).bytes));
        let Json(resp) = detect_handler(State(h.state.clone()), json(serde_json::json!({ "image": payload })))
            .await
            .unwrap();
        assert!(matches!(resp.result.outcome, Outcome::Emotion(_)));
        assert!(resp.history_updated.is_none());
    }

    #[tokio::test]
    async fn test_malformed_base64_is_decode_error() {
        let h = harness(vec![FaceRegion::new(0, 0, 60, 60)]).await;
        let err = detect_handler(State(h.state.clone()), json(serde_json::json!({ "image": "%%%not-base64%%%" })))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.body.code, "DECODE_ERROR");
        assert_eq!(h.detector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_image_is_no_image_data() {
        let h = harness(vec![]).await;
        let err = detect_handler(State(h.state.clone()), multipart(&[("note", None, b"hello")]))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.body.code, "NO_IMAGE_DATA");
    }

    #[tokio::test]
    async fn test_raw_image_body() {
        let h = harness(vec![]).await;
        let Json(resp) = detect_anonymous_handler(State(h.state.clone()), raw("image/png", png(20, 20).bytes))
            .await
            .unwrap();
        assert!(resp.result.is_no_face());
    }

    #[tokio::test]
    async fn test_anonymous_ignores_identity() {
        let h = harness(vec![FaceRegion::new(50, 50, 120, 120)]).await;
        let id = h.store.create_identity("subject").await.unwrap().id;
        let image = png(300, 300).bytes;

        let Json(resp) = detect_anonymous_handler(
            State(h.state.clone()),
            multipart(&[("image", Some("image/png"), &image), ("identity_id", None, id.as_bytes())]),
        )
        .await
        .unwrap();

        assert!(resp.history_updated.is_none());
        assert!(h.store.history(&id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_still_returns_result() {
        let pipeline = Arc::new(pipeline_with(vec![FaceRegion::new(10, 10, 80, 80)], HAPPY));
        let engine = spawn_engine(pipeline.clone(), 1, 4, None).unwrap();
        let dispatcher = HistoryDispatcher::new(Arc::new(FailingStore::new()));
        let state = Arc::new(AppState::new(engine, dispatcher, &pipeline));

        let payload = STANDARD.encode(png(200, 200).bytes);
        let Json(resp) = detect_handler(
            State(state),
            json(serde_json::json!({ "image": payload, "identity_id": "someone" })),
        )
        .await
        .unwrap();

        assert_eq!(resp.result.outcome.as_str(), "happy");
        assert_eq!(resp.history_updated, Some(false));
    }

    #[tokio::test]
    async fn test_store_io_error_maps_to_500() {
        let pipeline = Arc::new(pipeline_with(vec![], HAPPY));
        let engine = spawn_engine(pipeline.clone(), 1, 4, None).unwrap();
        let dispatcher = HistoryDispatcher::new(Arc::new(FailingStore::new()));
        let state = Arc::new(AppState::new(engine, dispatcher, &pipeline));

        let err = history_handler(State(state), Path("someone".into()), Query(HistoryQuery { limit: None }))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body.code, "STORE_FAILED");
    }

    #[tokio::test]
    async fn test_unavailable_models_map_to_503() {
        let pipeline = Arc::new(EmotionPipeline::new(ModelState::unavailable("assets missing"), PipelineConfig::default()));
        let engine = spawn_engine(pipeline.clone(), 1, 1, None).unwrap();
        let state = Arc::new(AppState::new(engine, HistoryDispatcher::disabled(), &pipeline));
        assert!(!state.models_ready);

        let err = detect_handler(State(state), raw("image/png", png(10, 10).bytes)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.body.code, "CLASSIFIER_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_history_route() {
        let h = harness(vec![]).await;
        let id = h.store.create_identity("subject").await.unwrap().id;
        for emotion in [IdentityEmotion::Sad, IdentityEmotion::Happy, IdentityEmotion::Angry] {
            h.store.append_history(&id, emotion, 0.7, chrono::Utc::now()).await.unwrap();
        }

        let Json(resp) = history_handler(
            State(h.state.clone()),
            Path(id.clone()),
            Query(HistoryQuery { limit: Some(2) }),
        )
        .await
        .unwrap();

        assert_eq!(resp.identity.current_emotion, IdentityEmotion::Angry);
        assert_eq!(resp.history.len(), 2);
        assert_eq!(resp.history[0].emotion, IdentityEmotion::Happy);
        assert_eq!(resp.history[1].emotion, IdentityEmotion::Angry);

        let err = history_handler(State(h.state.clone()), Path("nobody".into()), Query(HistoryQuery { limit: None }))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_engine_error_mapping() {
        let err: ApiError = EngineError::ChannelClosed.into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.body.code, "ENGINE_UNAVAILABLE");
    }
}
