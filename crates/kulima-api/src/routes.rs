use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use kulima_core::db::{ChiefRepository, LibSqlChiefRepository};
use kulima_core::models::{ChangeFeed, Chief, NewChief, SyncBatchResult};
use kulima_core::qr::QrClaims;
use kulima_core::util::user_fingerprint;
use kulima_core::{FarmerId, FarmerRecord, SyncEngine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AuthenticatedUser, JwtVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot};

const DEFAULT_CHIEF_PAGE: usize = 50;
const MAX_CHIEF_PAGE: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    engine: Arc<SyncEngine>,
    jwt_verifier: Arc<JwtVerifier>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, engine: Arc<SyncEngine>) -> Self {
        Self {
            jwt_verifier: Arc::new(JwtVerifier::new(&config)),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            engine,
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync/batch", post(sync_batch))
        .route("/sync/status", get(sync_status))
        .route("/farmers/{farmer_id}", get(get_farmer))
        .route("/chiefs", get(list_chiefs).post(create_chief))
        .route("/qr/verify", post(verify_qr))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.jwt_verifier.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
struct SyncBatchRequest {
    farmers: Vec<Value>,
    #[serde(default)]
    last_sync: Option<String>,
}

async fn sync_batch(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<SyncBatchRequest>,
) -> Result<Json<SyncBatchResult>, AppError> {
    if !user.role.can_sync() {
        return Err(AppError::forbidden("Role may not push registrations"));
    }
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncBatch, &user.user_id)
        .await?;

    tracing::debug!(
        user = user_fingerprint(&user.user_id),
        client_last_sync = request.last_sync.as_deref().unwrap_or("none"),
        "Sync batch request"
    );
    let result = state
        .engine
        .sync_batch(request.farmers, &user.user_id)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct SyncStatusQuery {
    last_sync: Option<String>,
}

async fn sync_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<SyncStatusQuery>,
) -> Result<Json<ChangeFeed>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncStatus, &user.user_id)
        .await?;

    let last_sync = query
        .last_sync
        .as_deref()
        .map(parse_timestamp)
        .transpose()?;
    let feed = state.engine.get_sync_status(&user.user_id, last_sync).await?;
    Ok(Json(feed))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| AppError::bad_request("'last_sync' must be an RFC 3339 timestamp"))
}

async fn get_farmer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(farmer_id): Path<String>,
) -> Result<Json<FarmerRecord>, AppError> {
    let not_found = || AppError::not_found(format!("farmer {farmer_id}"));
    let id: FarmerId = farmer_id.parse().map_err(|_| not_found())?;

    let record = state.engine.farmer(&id).await?.ok_or_else(not_found)?;
    // Other callers' records are reported as absent.
    if record.created_by != user.user_id && !user.role.is_admin() {
        return Err(not_found());
    }
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
struct ChiefListQuery {
    province: Option<String>,
    district: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_chiefs(
    State(state): State<AppState>,
    Query(query): Query<ChiefListQuery>,
) -> Result<Json<Vec<Chief>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_CHIEF_PAGE)
        .clamp(1, MAX_CHIEF_PAGE);
    let chiefs = LibSqlChiefRepository::new(state.engine.database().connection())
        .list(
            query.province.as_deref(),
            query.district.as_deref(),
            limit,
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(chiefs))
}

async fn create_chief(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(chief): Json<NewChief>,
) -> Result<(StatusCode, Json<Chief>), AppError> {
    if !user.role.is_admin() {
        return Err(AppError::forbidden("Only administrators may register chiefs"));
    }
    let chief = LibSqlChiefRepository::new(state.engine.database().connection())
        .create(chief)
        .await?;
    tracing::info!(chief_id = %chief.id, chiefdom = %chief.chiefdom, "Chief registered");
    Ok((StatusCode::CREATED, Json(chief)))
}

#[derive(Debug, Deserialize)]
struct VerifyQrRequest {
    qr_code: String,
}

#[derive(Debug, Serialize)]
struct VerifyQrResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<QrClaims>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

async fn verify_qr(
    State(state): State<AppState>,
    Json(request): Json<VerifyQrRequest>,
) -> Result<Json<VerifyQrResponse>, AppError> {
    let response = match state.engine.verify_qr(&request.qr_code) {
        Ok(claims) => VerifyQrResponse {
            valid: true,
            claims: Some(claims),
            reason: None,
        },
        Err(kulima_core::Error::Qr(reason)) => VerifyQrResponse {
            valid: false,
            claims: None,
            reason: Some(reason),
        },
        Err(other) => return Err(other.into()),
    };
    Ok(Json(response))
}
