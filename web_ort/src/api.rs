use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use inference_common::annotate::FrameAnnotator;
use inference_common::detector::Detector;
use inference_common::threshold::{Threshold, DEFAULT_CONFIDENCE, SLIDER_RANGE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::WebConfig;
use crate::jobs::{Job, JobState, JobStatus, JobStore, SharedDetector};

pub const ACCEPTED_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];
const DOWNLOAD_DISPOSITION: &str = "attachment; filename=\"detected_video.mp4\"";

#[derive(Clone)]
pub struct AppState {
    pub detector: SharedDetector,
    pub annotator: Arc<FrameAnnotator>,
    pub jobs: Arc<JobStore>,
    pub model_name: String,
    pub scratch_dir: Option<PathBuf>,
    pub upload_limit: usize,
}

impl AppState {
    pub fn new(
        detector: Box<dyn Detector + Send>,
        annotator: FrameAnnotator,
        config: &WebConfig,
    ) -> Self {
        Self {
            detector: Arc::new(Mutex::new(detector)),
            annotator: Arc::new(annotator),
            jobs: Arc::new(JobStore::new(config.max_jobs)),
            model_name: config.model.to_string(),
            scratch_dir: config.scratch_dir.clone(),
            upload_limit: config.upload_limit_bytes(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("no job with id {0}")]
    NotFound(Uuid),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", self.to_string()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict", self.to_string()),
            ApiError::Multipart(e) => (e.status(), "bad_upload", e.body_text()),
            ApiError::Internal(e) => {
                error!("Request failed: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", format!("{e:#}"))
            }
        };
        (status, Json(ErrorResponse { error: kind, message })).into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.upload_limit;
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/api/jobs", post(create_job))
        .route("/api/jobs/:id", get(get_job).delete(delete_job))
        .route("/api/jobs/:id/video", get(get_video))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until ctrl-c, then cancels and drops all jobs.
pub async fn serve(state: AppState, bind: &str) -> anyhow::Result<()> {
    let jobs = Arc::clone(&state.jobs);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {bind}"))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            jobs.clear();
        })
        .await
        .context("Server error")?;

    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../assets/index.html"))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "model": state.model_name,
        "jobs": state.jobs.len(),
    }))
}

/// Lower-cased extension of `file_name` if it is an accepted video type.
fn upload_extension(file_name: &str) -> Option<String> {
    let ext = FsPath::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    ACCEPTED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

fn parse_threshold(raw: Option<&str>) -> Result<Threshold, ApiError> {
    let value = match raw.map(str::trim) {
        None | Some("") => DEFAULT_CONFIDENCE,
        Some(raw) => raw
            .parse::<f32>()
            .map_err(|_| ApiError::BadRequest(format!("confidence {raw:?} is not a number")))?,
    };
    Threshold::within(value, SLIDER_RANGE).map_err(|e| ApiError::BadRequest(e.to_string()))
}

async fn create_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<JobStatus>), ApiError> {
    let mut upload = None;
    let mut confidence = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_owned();
                upload = Some((file_name, field.bytes().await?));
            }
            Some("confidence") => confidence = Some(field.text().await?),
            _ => {}
        }
    }

    let (file_name, data) =
        upload.ok_or_else(|| ApiError::BadRequest("missing video upload".into()))?;
    let extension = upload_extension(&file_name).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "unsupported file {file_name:?}, expected one of: {}",
            ACCEPTED_EXTENSIONS.join(", ")
        ))
    })?;
    if data.is_empty() {
        return Err(ApiError::BadRequest(format!("{file_name:?} is empty")));
    }
    let threshold = parse_threshold(confidence.as_deref())?;

    let scratch_dir = state.scratch_dir.clone();
    let job = tokio::task::spawn_blocking(move || {
        Job::create(scratch_dir.as_deref(), &file_name, &extension, &data, threshold)
            .context("Failed to store upload")
    })
    .await
    .map_err(anyhow::Error::from)??;

    let job = state.jobs.insert(job);
    let status = job.status();
    info!(job = %job.id, file = %status.file_name, confidence = %threshold, "Job accepted");

    let detector = Arc::clone(&state.detector);
    let annotator = Arc::clone(&state.annotator);
    tokio::task::spawn_blocking(move || job.run(&detector, &annotator));

    Ok((StatusCode::ACCEPTED, Json(status)))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobStatus>, ApiError> {
    let job = state.jobs.get(&id).ok_or(ApiError::NotFound(id))?;
    Ok(Json(job.status()))
}

#[derive(Debug, Deserialize)]
struct VideoQuery {
    #[serde(default)]
    download: bool,
}

async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<VideoQuery>,
) -> Result<Response, ApiError> {
    let job = state.jobs.get(&id).ok_or(ApiError::NotFound(id))?;
    let job_state = job.status().state;
    if job_state != JobState::Done {
        return Err(ApiError::Conflict(format!(
            "job {id} is {}, no video to serve",
            job_state.as_str()
        )));
    }

    let bytes = tokio::fs::read(job.output())
        .await
        .context("Failed to read processed video")?;
    let mut response = ([(header::CONTENT_TYPE, "video/mp4")], bytes).into_response();
    if query.download {
        response.headers_mut().insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static(DOWNLOAD_DISPOSITION),
        );
    }
    Ok(response)
}

async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.jobs.remove(&id).ok_or(ApiError::NotFound(id))?;
    info!(job = %id, "Job deleted");
    Ok(StatusCode::NO_CONTENT)
}
