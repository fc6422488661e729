// HTTP API: axum router and handlers over the draw service.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        FromRequest, FromRequestParts, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use santa_core::model::{DrawRecord, Participant, SantaList};

use crate::service::{ErrorKind, SantaService, ServiceError, ServiceResult};

pub type SharedService = Arc<SantaService>;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct NewList {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct NewParticipant {
    pub name: String,
}

/// Body of a blacklist addition: the participant to exclude.
#[derive(Debug, Deserialize)]
pub struct BlacklistedParticipant {
    pub id: i64,
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// `axum::Json` whose rejection is reported as an `ApiError`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
struct ApiJson<T>(T);

/// `axum::extract::Path` whose rejection is reported as an `ApiError`.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
struct ApiPath<T>(T);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{}", .0.body_text())]
    Body(#[from] JsonRejection),

    #[error("{}", .0.body_text())]
    PathParam(#[from] PathRejection),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Service(e) => match e.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Body(e) => e.status(),
            ApiError::PathParam(e) => e.status(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = if status.is_server_error() {
            error!("request failed: {self:#}");
            "Internal server error".to_string()
        } else {
            warn!("request rejected ({status}): {self}");
            self.to_string()
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/lists", get(get_lists).post(create_list))
        .route(
            "/lists/{list_id}/participants",
            get(get_participants).post(add_participant),
        )
        .route("/lists/{list_id}/draws", post(create_draw))
        .route("/lists/{list_id}/latest_draws", get(latest_draws))
        .route(
            "/participants/{participant_id}/blacklist",
            get(get_blacklist).post(add_to_blacklist),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Run a service call on the blocking pool; SQLite access is synchronous.
async fn blocking<T, F>(service: SharedService, call: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&SantaService) -> ServiceResult<T> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || call(service.as_ref())).await?;
    Ok(result?)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "secret-santa",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn get_lists(State(service): State<SharedService>) -> ApiResult<Json<Vec<SantaList>>> {
    let lists = blocking(service, |s| s.lists()).await?;
    Ok(Json(lists))
}

async fn create_list(
    State(service): State<SharedService>,
    ApiJson(body): ApiJson<NewList>,
) -> ApiResult<(StatusCode, Json<SantaList>)> {
    let list = blocking(service, move |s| s.create_list(&body.name)).await?;
    Ok((StatusCode::CREATED, Json(list)))
}

async fn get_participants(
    State(service): State<SharedService>,
    ApiPath(list_id): ApiPath<i64>,
) -> ApiResult<Json<Vec<Participant>>> {
    let participants = blocking(service, move |s| s.participants(list_id)).await?;
    Ok(Json(participants))
}

async fn add_participant(
    State(service): State<SharedService>,
    ApiPath(list_id): ApiPath<i64>,
    ApiJson(body): ApiJson<NewParticipant>,
) -> ApiResult<(StatusCode, Json<Participant>)> {
    let participant = blocking(service, move |s| s.add_participant(list_id, &body.name)).await?;
    Ok((StatusCode::CREATED, Json(participant)))
}

async fn create_draw(
    State(service): State<SharedService>,
    ApiPath(list_id): ApiPath<i64>,
) -> ApiResult<(StatusCode, Json<DrawRecord>)> {
    let draw = blocking(service, move |s| s.create_draw(list_id)).await?;
    Ok((StatusCode::CREATED, Json(draw)))
}

async fn latest_draws(
    State(service): State<SharedService>,
    ApiPath(list_id): ApiPath<i64>,
) -> ApiResult<Json<Vec<DrawRecord>>> {
    let draws = blocking(service, move |s| s.latest_draws(list_id)).await?;
    Ok(Json(draws))
}

async fn get_blacklist(
    State(service): State<SharedService>,
    ApiPath(participant_id): ApiPath<i64>,
) -> ApiResult<Json<Vec<Participant>>> {
    let blacklist = blocking(service, move |s| s.blacklist(participant_id)).await?;
    Ok(Json(blacklist))
}

async fn add_to_blacklist(
    State(service): State<SharedService>,
    ApiPath(participant_id): ApiPath<i64>,
    ApiJson(body): ApiJson<BlacklistedParticipant>,
) -> ApiResult<(StatusCode, Json<Vec<Participant>>)> {
    let blacklist = blocking(service, move |s| s.add_to_blacklist(participant_id, body.id)).await?;
    Ok((StatusCode::CREATED, Json(blacklist)))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
