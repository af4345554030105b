use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, Query, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Serialize;
use studio_contracts::api::{
    parse_body, DownloadQuery, FlowRunBody, FlowRunResponse, FluxImageBody, IdeogramImageBody,
    ImageGenerateBody, ImageResponse, ImagenImageBody, JobStatusQuery, JobStatusResponse,
    KlingVideoBody, MinimaxVideoBody, ModelsQuery, ModelsResponse, RunwayImageBody,
    TextGenerateBody, TextResponse, TopazImageBody, TopazVideoBody, Validate, VideoGenerateBody,
    VideoResponse,
};
use studio_contracts::{StudioError, StudioResult};
use studio_engine::StudioEngine;
use tracing::{info, warn};

/// Bodies carry base64 data URLs for images and videos.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<StudioEngine>,
}

impl AppState {
    pub fn new(engine: StudioEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

/// A `StudioError` rendered as `{error, details?}` with its HTTP status.
#[derive(Debug)]
pub struct ApiError(StudioError);

impl From<StudioError> for ApiError {
    fn from(err: StudioError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self.0, "request failed");
        }
        (status, Json(self.0.to_payload())).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;
type QueryResult<T> = Result<Query<T>, QueryRejection>;

#[derive(Debug, Serialize)]
struct Health {
    ok: bool,
    dryrun: bool,
    models: usize,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/generate-text", post(generate_text_handler))
        .route("/api/generate-image", post(generate_image_handler))
        .route("/api/generate-image/flux", post(flux_image_handler))
        .route("/api/generate-image/ideogram", post(ideogram_image_handler))
        .route("/api/generate-image/imagen", post(imagen_image_handler))
        .route("/api/generate-image/runway", post(runway_image_handler))
        .route("/api/generate-image/topaz", post(topaz_image_handler))
        .route("/api/generate-video", post(generate_video_handler))
        .route(
            "/api/generate-video/kling",
            get(kling_status_handler).post(kling_video_handler),
        )
        .route(
            "/api/generate-video/minimax",
            get(minimax_status_handler).post(minimax_video_handler),
        )
        .route("/api/generate-video/topaz", post(topaz_video_handler))
        .route("/api/download", get(download_handler))
        .route("/api/models", get(models_handler))
        .route("/api/flow/run", post(flow_run_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(access_log_middleware))
        .with_state(state)
}

pub async fn serve(state: AppState, bind: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, dryrun = state.engine.config().dryrun, "studio server listening");
    axum::serve(listener, build_app(state))
        .await
        .context("server stopped")
}

async fn access_log_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// Runs an engine call on the blocking pool; provider HTTP and polling block.
async fn blocking<T, F>(state: &AppState, job: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&StudioEngine) -> StudioResult<T> + Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || job(&engine))
        .await
        .map_err(|err| StudioError::internal(format!("Worker task failed: {err}")))?
        .map_err(ApiError::from)
}

async fn post_json<B, R, F>(state: AppState, bytes: Bytes, handle: F) -> ApiResult<R>
where
    B: DeserializeOwned + Validate + Send + 'static,
    R: Serialize + Send + 'static,
    F: FnOnce(&StudioEngine, &B) -> StudioResult<R> + Send + 'static,
{
    let body: B = parse_body(&bytes)?;
    let response = blocking(&state, move |engine| handle(engine, &body)).await?;
    Ok(Json(response))
}

fn query_error(err: QueryRejection) -> ApiError {
    ApiError(StudioError::validation(format!("Invalid query: {err}")))
}

async fn healthz_handler(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        ok: true,
        dryrun: state.engine.config().dryrun,
        models: state.engine.selector().registry.list().count(),
    })
}

async fn generate_text_handler(
    State(state): State<AppState>,
    bytes: Bytes,
) -> ApiResult<TextResponse> {
    post_json(state, bytes, |engine, body: &TextGenerateBody| {
        engine.handle_generate_text(body)
    })
    .await
}

async fn generate_image_handler(
    State(state): State<AppState>,
    bytes: Bytes,
) -> ApiResult<ImageResponse> {
    post_json(state, bytes, |engine, body: &ImageGenerateBody| {
        engine.handle_generate_image(body)
    })
    .await
}

async fn flux_image_handler(State(state): State<AppState>, bytes: Bytes) -> ApiResult<ImageResponse> {
    post_json(state, bytes, |engine, body: &FluxImageBody| {
        engine.handle_generate_image_flux(body)
    })
    .await
}

async fn ideogram_image_handler(
    State(state): State<AppState>,
    bytes: Bytes,
) -> ApiResult<ImageResponse> {
    post_json(state, bytes, |engine, body: &IdeogramImageBody| {
        engine.handle_generate_image_ideogram(body)
    })
    .await
}

async fn imagen_image_handler(
    State(state): State<AppState>,
    bytes: Bytes,
) -> ApiResult<ImageResponse> {
    post_json(state, bytes, |engine, body: &ImagenImageBody| {
        engine.handle_generate_image_imagen(body)
    })
    .await
}

async fn runway_image_handler(
    State(state): State<AppState>,
    bytes: Bytes,
) -> ApiResult<ImageResponse> {
    post_json(state, bytes, |engine, body: &RunwayImageBody| {
        engine.handle_generate_image_runway(body)
    })
    .await
}

async fn topaz_image_handler(
    State(state): State<AppState>,
    bytes: Bytes,
) -> ApiResult<ImageResponse> {
    post_json(state, bytes, |engine, body: &TopazImageBody| {
        engine.handle_generate_image_topaz(body)
    })
    .await
}

async fn generate_video_handler(
    State(state): State<AppState>,
    bytes: Bytes,
) -> ApiResult<VideoResponse> {
    post_json(state, bytes, |engine, body: &VideoGenerateBody| {
        engine.handle_generate_video(body)
    })
    .await
}

async fn kling_video_handler(
    State(state): State<AppState>,
    bytes: Bytes,
) -> ApiResult<VideoResponse> {
    post_json(state, bytes, |engine, body: &KlingVideoBody| {
        engine.handle_generate_video_kling(body)
    })
    .await
}

async fn minimax_video_handler(
    State(state): State<AppState>,
    bytes: Bytes,
) -> ApiResult<VideoResponse> {
    post_json(state, bytes, |engine, body: &MinimaxVideoBody| {
        engine.handle_generate_video_minimax(body)
    })
    .await
}

async fn topaz_video_handler(
    State(state): State<AppState>,
    bytes: Bytes,
) -> ApiResult<VideoResponse> {
    post_json(state, bytes, |engine, body: &TopazVideoBody| {
        engine.handle_generate_video_topaz(body)
    })
    .await
}

async fn job_status(
    state: AppState,
    provider: &'static str,
    query: QueryResult<JobStatusQuery>,
) -> ApiResult<JobStatusResponse> {
    let Query(query) = query.map_err(query_error)?;
    let status = blocking(&state, move |engine| engine.handle_job_status(provider, &query)).await?;
    Ok(Json(status))
}

async fn kling_status_handler(
    State(state): State<AppState>,
    query: QueryResult<JobStatusQuery>,
) -> ApiResult<JobStatusResponse> {
    job_status(state, "kling", query).await
}

async fn minimax_status_handler(
    State(state): State<AppState>,
    query: QueryResult<JobStatusQuery>,
) -> ApiResult<JobStatusResponse> {
    job_status(state, "minimax", query).await
}

async fn download_handler(
    State(state): State<AppState>,
    query: QueryResult<DownloadQuery>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(query_error)?;
    let resource = blocking(&state, move |engine| engine.handle_download(&query)).await?;
    let mut headers = HeaderMap::new();
    for (name, value) in resource.all_headers() {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) else {
            continue;
        };
        headers.append(name, value);
    }
    Ok((StatusCode::OK, headers, resource.body).into_response())
}

async fn models_handler(
    State(state): State<AppState>,
    query: QueryResult<ModelsQuery>,
) -> ApiResult<ModelsResponse> {
    let Query(query) = query.map_err(query_error)?;
    Ok(Json(state.engine.handle_models(&query)?))
}

async fn flow_run_handler(
    State(state): State<AppState>,
    bytes: Bytes,
) -> ApiResult<FlowRunResponse> {
    post_json(state, bytes, |engine, body: &FlowRunBody| {
        engine.handle_flow_run(body.clone())
    })
    .await
}
