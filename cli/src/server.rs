use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tower_http::limit::RequestBodyLimitLayer;

use crate::rate_limit::{RateDecision, RateLimiter};
use tally_core::TallyError;
use tally_core::models::{
    ClientProgress, DailyNutrition, FoodEntry, GoalsUpdate, NewFoodEntry, NewUserProfile,
    ProfilePatch, RecalcSummary, UserGoals, UserProfile,
};
use tally_core::service::TallyService;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

/// Header carrying the caller's user id, set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
struct AppState {
    svc: Arc<Mutex<TallyService>>,
    api_key: Option<String>,
    limiter: Arc<dyn RateLimiter>,
}

impl AppState {
    fn svc(&self) -> MutexGuard<'_, TallyService> {
        self.svc
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct DateQuery {
    date: Option<String>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    TooManyRequests(u64),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::TooManyRequests(retry_after) => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(ErrorResponse {
                        error: "Rate limit exceeded".to_string(),
                    }),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
                return response;
            }
            Self::Internal(err) => {
                tracing::error!(error = %format!("{err:#}"), "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<TallyError> for ApiError {
    fn from(err: TallyError) -> Self {
        match err {
            TallyError::Validation(msg) => Self::BadRequest(msg),
            TallyError::Conflict(msg) => Self::Conflict(msg),
            TallyError::Forbidden(msg) => Self::Forbidden(msg),
            e @ TallyError::NotFound { .. } => Self::NotFound(e.to_string()),
            e @ TallyError::Persistence(_) => Self::Internal(e.into()),
        }
    }
}

// --- Caller identity ---

/// The acting user, taken from the `X-User-Id` header.
struct Caller(i64);

fn parse_user_id(value: &HeaderValue) -> Option<i64> {
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("Missing X-User-Id header".to_string()))?;
        parse_user_id(raw)
            .map(Caller)
            .ok_or_else(|| ApiError::BadRequest("X-User-Id must be a positive integer".to_string()))
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return ApiError::Unauthorized("Invalid or missing API key".to_string()).into_response();
        }
    }
    next.run(request).await
}

/// Counts requests per caller. Requests without a valid user id share one bucket.
async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let key = request
        .headers()
        .get(USER_ID_HEADER)
        .and_then(parse_user_id)
        .map_or_else(|| "anonymous".to_string(), |id| format!("user:{id}"));

    match state.limiter.check(&key) {
        RateDecision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            response
        }
        RateDecision::Limited { retry_after } => {
            tracing::warn!(key = %key, "Rate limit exceeded");
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            ApiError::TooManyRequests(secs.max(1)).into_response()
        }
    }
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers: users ---

async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<NewUserProfile>,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    let user = state.svc().create_user(&req)?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_profile(
    State(state): State<AppState>,
    Caller(user_id): Caller,
) -> Result<Json<UserProfile>, ApiError> {
    Ok(Json(state.svc().get_user(user_id)?))
}

async fn update_profile(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<UserProfile>, ApiError> {
    if patch.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one field must be provided".to_string(),
        ));
    }
    Ok(Json(state.svc().update_profile(user_id, &patch)?))
}

async fn delete_profile(
    State(state): State<AppState>,
    Caller(user_id): Caller,
) -> Result<StatusCode, ApiError> {
    state.svc().delete_user(user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Handlers: goals ---

async fn get_goals(
    State(state): State<AppState>,
    Caller(user_id): Caller,
) -> Result<Json<UserGoals>, ApiError> {
    Ok(Json(state.svc().get_goals(user_id)?))
}

async fn put_goals(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Json(update): Json<GoalsUpdate>,
) -> Result<Json<UserGoals>, ApiError> {
    Ok(Json(state.svc().update_goals(user_id, &update)?))
}

async fn recalculate_goals(
    State(state): State<AppState>,
) -> Result<Json<RecalcSummary>, ApiError> {
    Ok(Json(state.svc().recalculate_all_goals()?))
}

// --- Handlers: ledger ---

async fn create_entry(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Json(req): Json<NewFoodEntry>,
) -> Result<(StatusCode, Json<FoodEntry>), ApiError> {
    let entry = state.svc().record_entry(user_id, &req)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn list_entries(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Query(query): Query<DateQuery>,
) -> Result<Json<Vec<FoodEntry>>, ApiError> {
    Ok(Json(
        state
            .svc()
            .list_daily_entries(user_id, query.date.as_deref())?,
    ))
}

async fn delete_entry(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.svc().delete_entry(user_id, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_nutrition(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Query(query): Query<DateQuery>,
) -> Result<Json<DailyNutrition>, ApiError> {
    Ok(Json(
        state.svc().daily_nutrition(user_id, query.date.as_deref())?,
    ))
}

async fn get_history(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<DailyNutrition>>, ApiError> {
    Ok(Json(state.svc().history(
        user_id,
        query.start.as_deref(),
        query.end.as_deref(),
    )?))
}

// --- Handlers: dietitians ---

async fn list_dietitians(
    State(state): State<AppState>,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    Ok(Json(state.svc().list_dietitians()?))
}

async fn subscribe(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(dietitian_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.svc().subscribe(user_id, dietitian_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unsubscribe(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(dietitian_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.svc().unsubscribe(user_id, dietitian_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_clients(
    State(state): State<AppState>,
    Caller(dietitian_id): Caller,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    Ok(Json(state.svc().list_clients(dietitian_id)?))
}

async fn get_client_goals(
    State(state): State<AppState>,
    Caller(dietitian_id): Caller,
    Path(client_id): Path<i64>,
) -> Result<Json<UserGoals>, ApiError> {
    Ok(Json(state.svc().client_goals(dietitian_id, client_id)?))
}

async fn put_client_goals(
    State(state): State<AppState>,
    Caller(dietitian_id): Caller,
    Path(client_id): Path<i64>,
    Json(update): Json<GoalsUpdate>,
) -> Result<Json<UserGoals>, ApiError> {
    Ok(Json(
        state
            .svc()
            .update_client_goals(dietitian_id, client_id, &update)?,
    ))
}

async fn get_client_progress(
    State(state): State<AppState>,
    Caller(dietitian_id): Caller,
    Path(client_id): Path<i64>,
) -> Result<Json<ClientProgress>, ApiError> {
    Ok(Json(state.svc().client_progress(dietitian_id, client_id)?))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/users", post(create_user))
        .route(
            "/api/profile",
            get(get_profile).patch(update_profile).delete(delete_profile),
        )
        .route("/api/goals", get(get_goals).put(put_goals))
        .route("/api/entries", post(create_entry).get(list_entries))
        .route("/api/entries/{id}", delete(delete_entry))
        .route("/api/nutrition", get(get_nutrition))
        .route("/api/history", get(get_history))
        .route("/api/admin/recalculate-goals", post(recalculate_goals))
        .route("/api/dietitians", get(list_dietitians))
        .route(
            "/api/dietitians/{id}/subscribe",
            post(subscribe).delete(unsubscribe),
        )
        .route("/api/dietitian/clients", get(list_clients))
        .route(
            "/api/dietitian/clients/{id}/goals",
            get(get_client_goals).put(put_client_goals),
        )
        .route("/api/dietitian/clients/{id}/progress", get(get_client_progress))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    svc: TallyService,
    limiter: Arc<dyn RateLimiter>,
    port: u16,
    bind: &str,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    let state = AppState {
        svc: Arc::new(Mutex::new(svc)),
        api_key: api_key.clone(),
        limiter,
    };

    let app = build_router(state);

    if let Some(ref key) = api_key {
        eprintln!(
            "API key: {} (see api_key file in data directory)",
            mask_key(key)
        );
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    tracing::info!(bind, port, "Listening on http://{bind}:{port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// First and last four characters of the key, or only stars when the key is too
/// short to show any of it.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 12 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
