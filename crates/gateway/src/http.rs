use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::{MatchedPath, Path, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use marlo_contracts::AggregatedSeries;
use marlo_store::PgStore;
use serde::{Deserialize, Serialize};

use crate::config::{GatewayConfig, StartupError};
use crate::service::{QueryError, QueryService};

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    store: PgStore,
    service: QueryService<PgStore>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

pub async fn router(config: GatewayConfig) -> Result<Router, StartupError> {
    let store = PgStore::connect_and_migrate(
        &config.db_url,
        Duration::from_millis(config.store_timeout_ms),
    )
    .await
    .map_err(|err| StartupError {
        code: "ERR_STORE_UNAVAILABLE",
        message: format!("failed to initialize record store: {}", err),
    })?;

    let service = QueryService::new(store.clone());

    let state = AppState {
        config,
        store,
        service,
    };

    Ok(Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/users", post(create_user))
        .route("/users/{username}", delete(delete_user))
        .route("/user-data/{username}", get(get_user_data))
        .route("/aggregated-data", get(get_aggregated_data))
        .layer(middleware::from_fn(track_http_metrics))
        .with_state(state))
}

async fn track_http_metrics(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().as_str().to_string();

    let response = next.run(req).await;

    crate::metrics::observe_http_request(
        &route,
        &method,
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("store", state.store.ping().await.is_ok());

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateUserRequest {
    username: String,
    role: String,
}

#[derive(Debug, Serialize)]
struct CreatedUser {
    username: String,
    role: String,
}

#[derive(Debug, Serialize)]
struct CreateUserResponse {
    message: &'static str,
    user: CreatedUser,
}

async fn create_user(
    State(state): State<AppState>,
    req: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<Json<CreateUserResponse>, ApiError> {
    let Json(req) = req.map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "ERR_INVALID_PARAMS",
            "invalid JSON body".to_string(),
        )
    })?;

    let username = req.username.trim();
    let role = req.role.trim();
    if username.is_empty() || role.is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "ERR_INVALID_PARAMS",
            "username and role must be non-empty".to_string(),
        ));
    }

    let inserted = state
        .store
        .create_user(username, role)
        .await
        .map_err(store_unavailable)?;

    if !inserted {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "ERR_USERNAME_TAKEN",
            format!("username {} already exists", username),
        ));
    }

    tracing::info!(username = %username, role = %role, "user created");

    Ok(Json(CreateUserResponse {
        message: "User created successfully",
        user: CreatedUser {
            username: username.to_string(),
            role: role.to_string(),
        },
    }))
}

#[derive(Debug, Serialize)]
struct DeleteUserResponse {
    message: String,
}

async fn delete_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<DeleteUserResponse>, ApiError> {
    let deleted = state
        .store
        .delete_user(&username)
        .await
        .map_err(store_unavailable)?;

    if !deleted {
        return Err(json_error(
            StatusCode::NOT_FOUND,
            "ERR_USER_NOT_FOUND",
            format!("no user record for {}", username),
        ));
    }

    tracing::info!(username = %username, "user deleted");

    Ok(Json(DeleteUserResponse {
        message: format!("User {} deleted successfully", username),
    }))
}

#[derive(Debug, Serialize)]
struct UserDataResponse {
    message: &'static str,
    data: Vec<AggregatedSeries>,
}

async fn get_user_data(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<UserDataResponse>, ApiError> {
    let data = state
        .service
        .user_data(&username)
        .await
        .map_err(map_query_error)?;

    tracing::info!(username = %username, series = data.len(), "user data served");

    Ok(Json(UserDataResponse {
        message: "Success",
        data,
    }))
}

async fn get_aggregated_data(
    State(state): State<AppState>,
) -> Result<Json<Vec<AggregatedSeries>>, ApiError> {
    let data = state
        .service
        .aggregated_data()
        .await
        .map_err(map_query_error)?;

    tracing::info!(series = data.len(), "aggregated data served");

    Ok(Json(data))
}

fn map_query_error(err: QueryError) -> ApiError {
    match err {
        QueryError::UserNotFound(username) => json_error(
            StatusCode::NOT_FOUND,
            "ERR_USER_NOT_FOUND",
            format!("no user record for {}", username),
        ),
        QueryError::ForbiddenRole(username) => json_error(
            StatusCode::FORBIDDEN,
            "ERR_FORBIDDEN_ROLE",
            format!("role of {} is not authorized for data access", username),
        ),
        QueryError::Store(err) => store_unavailable(err),
    }
}

fn store_unavailable(err: marlo_store::StoreError) -> ApiError {
    tracing::warn!(error = %err, "record store read failed");
    json_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "ERR_STORE_UNAVAILABLE",
        "record store unavailable".to_string(),
    )
}

fn json_error(status: StatusCode, code: &'static str, message: String) -> ApiError {
    (status, Json(ErrorResponse { code, message }))
}
