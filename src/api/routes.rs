use crate::media::{FetchJob, MediaError, MediaService, MediaStream, ResolvedMedia};
use crate::utils::{content_disposition, parse_flag};
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Query, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    media: Arc<MediaService>,
}

impl AppState {
    pub fn new(media: MediaService) -> Self {
        Self {
            media: Arc::new(media),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/fetch", post(fetch))
        .route("/stream", get(stream))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub url: Option<String>,
    pub name: Option<String>,
    pub mp3: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<String>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            details: None,
        }
    }

    /// Resolve errors carry only a short message; collaborator output
    /// stays in the logs.
    fn from_resolve(err: MediaError) -> Self {
        let status = status_for(&err);
        let message = match err {
            MediaError::InvalidInput(msg) => msg,
            other => other.summary().to_string(),
        };
        Self {
            status,
            message,
            details: None,
        }
    }

    fn from_stream(err: MediaError) -> Self {
        Self {
            status: status_for(&err),
            message: err.summary().to_string(),
            details: Some(err.to_string()),
        }
    }
}

fn status_for(err: &MediaError) -> StatusCode {
    if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            details: self.details,
        });
        (self.status, body).into_response()
    }
}

async fn home() -> &'static str {
    "VideoVault API running"
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn fetch(
    State(state): State<AppState>,
    request: Result<Json<FetchRequest>, JsonRejection>,
) -> Result<Json<ResolvedMedia>, ApiError> {
    let url = match request {
        Ok(Json(FetchRequest { url: Some(url) })) if !url.trim().is_empty() => url,
        Ok(_) => return Err(ApiError::bad_request("No URL")),
        Err(rejection) => {
            warn!("Rejected /fetch body: {}", rejection);
            return Err(ApiError::bad_request("No URL"));
        }
    };

    match state.media.resolve(&url).await {
        Ok(resolved) => Ok(Json(resolved)),
        Err(e) => {
            error!("Failed to resolve {}: {}", url, e);
            Err(ApiError::from_resolve(e))
        }
    }
}

async fn stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    let url = query.url.as_deref().unwrap_or_default();
    let job = FetchJob::new(url, query.name.as_deref(), parse_flag(query.mp3.as_deref()))
        .map_err(ApiError::from_stream)?;

    info!(
        "Streaming {} as {} (mp3: {})",
        job.source_url, job.output_name, job.want_audio_only
    );

    match state.media.stream(job).await {
        Ok(media) => Ok(stream_response(media)),
        Err(e) => {
            error!("Failed to start stream: {}", e);
            Err(ApiError::from_stream(e))
        }
    }
}

fn stream_response(media: MediaStream) -> Response {
    let MediaStream {
        filename,
        content_type,
        content_length,
        body,
    } = media;

    let mut response = Response::new(Body::from_stream(body));
    let headers = response.headers_mut();

    let content_type = HeaderValue::from_str(&content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(CONTENT_TYPE, content_type);

    if let Ok(value) = HeaderValue::from_str(&content_disposition(&filename)) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    if let Some(length) = content_length {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    }

    response
}
