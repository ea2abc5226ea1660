//! Axum REST API handlers

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    routing::{get, post, put},
    extract::{Path, State, Query},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::MachineLearningConfig;
use crate::service::{
    AuthDto, ServiceError, SmartInfoService, SmartSearchResponse, SystemConfig,
    WeaponsDetectResponse,
};

use super::dto::*;

pub const API_KEY_HEADER: &str = "x-api-key";

const DEFAULT_SEARCH_LIMIT: usize = 20;
const MAX_SEARCH_LIMIT: usize = 100;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Application state shared across handlers
pub struct AppState {
    pub service: Arc<SmartInfoService>,
    /// API key -> user id
    pub api_keys: HashMap<String, String>,
    pub start_time: Instant,
}

/// Create the REST API router
pub fn create_rest_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/weapons-detect/:id", get(weapons_detect_handler))
        .route("/api/search/smart", get(smart_search_handler))
        .route("/api/jobs/smart-search", post(queue_smart_search_handler))
        .route("/api/system-config/machine-learning", put(update_machine_learning_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn service_error(e: ServiceError) -> ApiError {
    let (status, code) = match &e {
        ServiceError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        ServiceError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
        ServiceError::MachineLearning(ml) if ml.is_upstream() => {
            (StatusCode::BAD_GATEWAY, "INFERENCE_FAILED")
        }
        ServiceError::MachineLearning(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "MACHINE_LEARNING_ERROR")
        }
        ServiceError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };

    if status.is_server_error() {
        error!("Request failed: {:#}", e);
    }
    (status, Json(ErrorResponse::new(&e.to_string(), code)))
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthDto, ApiError> {
    let key = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            (StatusCode::UNAUTHORIZED, Json(ErrorResponse::new("Authentication required", "UNAUTHORIZED")))
        })?;

    match state.api_keys.get(key) {
        Some(user_id) => Ok(AuthDto::new(user_id.as_str())),
        None => {
            warn!("Rejected request with unknown API key");
            Err((StatusCode::UNAUTHORIZED, Json(ErrorResponse::new("Invalid API key", "UNAUTHORIZED"))))
        }
    }
}

/// Detect weapons in a single asset
async fn weapons_detect_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<WeaponsDetectResponse>, ApiError> {
    let auth = authenticate(&state, &headers)?;

    if Uuid::parse_str(&id).is_err() {
        return Err((StatusCode::BAD_REQUEST, Json(ErrorResponse::new("id must be a UUID", "INVALID_ID"))));
    }

    let response = state
        .service
        .handle_detect_weapons(&auth, &id)
        .await
        .map_err(service_error)?;

    Ok(Json(response))
}

/// Text-to-image search over the caller's assets
async fn smart_search_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SmartSearchQuery>,
) -> Result<Json<SmartSearchResponse>, ApiError> {
    let auth = authenticate(&state, &headers)?;
    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_SEARCH_LIMIT);

    let response = state
        .service
        .search_smart(&auth, &query.query, limit)
        .await
        .map_err(service_error)?;

    Ok(Json(response))
}

async fn queue_smart_search_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<QueueJobQuery>,
) -> Result<Json<JobQueuedResponse>, ApiError> {
    authenticate(&state, &headers)?;
    let force = query.force.unwrap_or(false);

    state
        .service
        .queue_encode_clip(force)
        .await
        .map_err(service_error)?;

    Ok(Json(JobQueuedResponse { queued: true, force }))
}

/// Replace the machine learning config; a new CLIP model triggers a dimension migration
async fn update_machine_learning_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(config): Json<MachineLearningConfig>,
) -> Result<Json<SystemConfig>, ApiError> {
    authenticate(&state, &headers)?;

    let update = state
        .service
        .update_machine_learning(config)
        .await
        .map_err(service_error)?;

    if update.clip_model_changed {
        info!(
            "CLIP model changed to {}, re-initializing smart search",
            update.config.machine_learning.clip.model_name
        );
        let service = state.service.clone();
        tokio::spawn(async move {
            if let Err(e) = service.init().await {
                error!("Smart search re-initialization failed: {:#}", e);
            }
        });
    }

    Ok(Json(update.config))
}

/// Health check
async fn health_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, ApiError> {
    let health = state.service.health().await.map_err(service_error)?;

    Ok(Json(HealthResponse {
        healthy: health.healthy,
        version: health.version,
        machine_learning_enabled: health.machine_learning_enabled,
        dimension_state: health.dimension_state,
        queues: health.queues,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path as FsPath;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::config::JobsConfig;
    use crate::jobs::{InMemoryJobQueue, QueueName};
    use crate::locks::LockRegistry;
    use crate::ml::{
        DetectFaceResult, DetectionArtifact, MachineLearningRepository, MlError, MlResult,
        ModelConfig, WeaponDetection,
    };
    use crate::service::{ConfigRepository, SmartInfoDeps, SystemConfigStore};
    use crate::storage::{Asset, AssetType, SmartInfoRepository, SqliteStorage};

    const OWNER_ASSET: &str = "7f3c2a44-52a1-4f5e-9d3b-0c1f7a9e6b21";
    const OTHER_ASSET: &str = "0b9e1d55-8c4f-4a2e-bb71-5f6e2d3c4a10";

    struct FixedMachineLearning;

    #[async_trait]
    impl MachineLearningRepository for FixedMachineLearning {
        async fn encode_image(&self, _url: &str, _image_path: &FsPath, _config: &ModelConfig) -> MlResult<Vec<f32>> {
            Ok(vec![1.0; 512])
        }

        async fn encode_text(&self, _url: &str, _text: &str, _config: &ModelConfig) -> MlResult<Vec<f32>> {
            Ok(vec![1.0; 512])
        }

        async fn detect_faces(
            &self,
            _url: &str,
            _image_path: &FsPath,
            _config: &ModelConfig,
        ) -> MlResult<Vec<DetectFaceResult>> {
            Ok(Vec::new())
        }

        async fn detect_weapons_in_image(
            &self,
            _url: &str,
            _image_path: &FsPath,
            _config: &ModelConfig,
        ) -> MlResult<Vec<WeaponDetection>> {
            Ok(vec![WeaponDetection {
                artifact: DetectionArtifact::Image { image: "Ym94".to_string() },
                score: 0.8,
                media_mode: None,
            }])
        }

        async fn detect_weapons_in_video(
            &self,
            _url: &str,
            _video_path: &FsPath,
            _config: &ModelConfig,
        ) -> MlResult<Vec<WeaponDetection>> {
            Err(MlError::InvalidInput("no videos here".to_string()))
        }
    }

    struct TestApp {
        _dir: TempDir,
        router: Router,
        queue: Arc<InMemoryJobQueue>,
        config: Arc<SystemConfigStore>,
        service: Arc<SmartInfoService>,
    }

    async fn app(machine_learning: MachineLearningConfig) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(
            SqliteStorage::new(dir.path().join("api.db").to_str().unwrap())
                .await
                .unwrap(),
        );
        for (id, owner) in [(OWNER_ASSET, "user-1"), (OTHER_ASSET, "user-2")] {
            storage
                .insert_asset(&Asset {
                    id: id.to_string(),
                    owner_id: owner.to_string(),
                    asset_type: AssetType::Image,
                    original_path: format!("/library/{}.jpg", id),
                    resize_path: Some(format!("/thumbs/{}.jpeg", id)),
                    created_at: 0,
                })
                .await
                .unwrap();
        }
        storage.init("ViT-B-32__openai").await.unwrap();
        storage.upsert(OWNER_ASSET, &[1.0; 512]).await.unwrap();

        let queue = Arc::new(InMemoryJobQueue::new(&JobsConfig::default()));
        let config = Arc::new(SystemConfigStore::new(machine_learning));
        let service = Arc::new(SmartInfoService::new(
            SmartInfoDeps {
                access: storage.clone(),
                assets: storage.clone(),
                jobs: queue.clone(),
                machine_learning: Arc::new(FixedMachineLearning),
                repository: storage.clone(),
                config: config.clone(),
                locks: Arc::new(LockRegistry::new()),
            },
            1000,
        ));

        let state = Arc::new(AppState {
            service: service.clone(),
            api_keys: HashMap::from([("secret".to_string(), "user-1".to_string())]),
            start_time: Instant::now(),
        });

        TestApp {
            _dir: dir,
            router: create_rest_router(state),
            queue,
            config,
            service,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header(API_KEY_HEADER, "secret")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_weapons_detect_requires_api_key() {
        let app = app(MachineLearningConfig::default()).await;
        let request = Request::get(format!("/api/weapons-detect/{}", OWNER_ASSET))
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_weapons_detect_rejects_non_uuid() {
        let app = app(MachineLearningConfig::default()).await;
        let (status, body) = send(&app.router, get("/api/weapons-detect/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_ID");
    }

    #[tokio::test]
    async fn test_weapons_detect_other_owner_is_forbidden() {
        let app = app(MachineLearningConfig::default()).await;
        let (status, body) =
            send(&app.router, get(&format!("/api/weapons-detect/{}", OTHER_ASSET))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Not found or no asset.read access");
    }

    #[tokio::test]
    async fn test_weapons_detect_returns_detections() {
        let app = app(MachineLearningConfig::default()).await;
        let (status, body) =
            send(&app.router, get(&format!("/api/weapons-detect/{}", OWNER_ASSET))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], OWNER_ASSET);
        assert_eq!(body["data"][0]["image"], "Ym94");
        assert!((body["data"][0]["score"].as_f64().unwrap() - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_weapons_detect_disabled_is_bad_request() {
        let app = app(MachineLearningConfig {
            enabled: false,
            ..MachineLearningConfig::default()
        })
        .await;
        let (status, body) =
            send(&app.router, get(&format!("/api/weapons-detect/{}", OWNER_ASSET))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Machine learning is disabled");
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_smart_search_returns_owned_assets() {
        let app = app(MachineLearningConfig::default()).await;
        let (status, body) = send(&app.router, get("/api/search/smart?query=knife&limit=5")).await;

        assert_eq!(status, StatusCode::OK);
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["asset"]["id"], OWNER_ASSET);
    }

    #[tokio::test]
    async fn test_queue_smart_search_enqueues_job() {
        let app = app(MachineLearningConfig::default()).await;
        let request = Request::post("/api/jobs/smart-search?force=true")
            .header(API_KEY_HEADER, "secret")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["force"], true);
        assert_eq!(app.queue.stats()[&QueueName::SmartSearch].pending, 1);
    }

    #[tokio::test]
    async fn test_update_machine_learning_reinitializes_on_model_change() {
        let app = app(MachineLearningConfig::default()).await;
        let mut ml = MachineLearningConfig::default();
        ml.clip.model_name = "ViT-L-14__openai".to_string();

        let request = Request::put("/api/system-config/machine-learning")
            .header(API_KEY_HEADER, "secret")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&ml).unwrap()))
            .unwrap();
        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["machineLearning"]["clip"]["modelName"], "ViT-L-14__openai");
        // client settings are fixed at startup and not part of the editable config
        assert!(body["machineLearning"].get("stagingDir").is_none());
        assert!(body["machineLearning"].get("requestTimeoutSecs").is_none());

        // the background init clears the 512-d embedding, so the search finds nothing
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let response = app
                    .service
                    .search_smart(&AuthDto::new("user-1"), "knife", 5)
                    .await;
                if matches!(&response, Ok(r) if r.items.is_empty()) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(!app.queue.stats()[&QueueName::SmartSearch].paused);
        assert_eq!(
            app.config.get_config().await.unwrap().machine_learning.clip.model_name,
            "ViT-L-14__openai"
        );
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(MachineLearningConfig::default()).await;
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app.router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["healthy"], true);
        assert_eq!(body["dimensionState"], "stable");
        assert_eq!(body["queues"]["smart-search"]["paused"], false);
    }
}
