//! Job submission and polling
//!
//! POST /jobs, GET /jobs/:id, GET /jobs/:id/result, POST /jobs/:id/cancel,
//! GET /jobs/:id/exports/:kind

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    ArtifactKind, InputFile, JobStatus, PipelineJob, RunOptions, StageId, StageProgress,
};
use crate::serializer::from_transport;
use crate::services::PipelineError;
use crate::AppState;

/// Uploaded file in a submission
#[derive(Debug, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    /// Base64 payload
    #[serde(with = "crate::serializer::base64_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

/// POST /jobs request
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub files: Vec<UploadedFile>,
    /// Server-local files, read on demand
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub options: RunOptions,
}

/// POST /jobs response
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

/// GET /jobs/:id response (result body omitted)
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub current_stage: Option<StageId>,
    pub progress: f64,
    pub stage_progress: BTreeMap<StageId, StageProgress>,
    pub stages_completed: Vec<StageId>,
    pub file_names: Vec<String>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub has_result: bool,
}

impl From<PipelineJob> for JobStatusResponse {
    fn from(job: PipelineJob) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status,
            current_stage: job.current_stage,
            progress: job.progress,
            stage_progress: job.stage_progress,
            stages_completed: job.stages_completed,
            file_names: job.file_names,
            warnings: job.warnings,
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            has_result: job.result.is_some(),
        }
    }
}

/// POST /jobs
///
/// Accepts the batch and starts the run in the background. Returns 202.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    if request.files.is_empty() && request.paths.is_empty() {
        return Err(PipelineError::NothingToProcess.into());
    }

    let mut files: Vec<InputFile> = request
        .files
        .into_iter()
        .map(|f| {
            let file = InputFile::from_bytes(f.name, f.data);
            match f.modified_at {
                Some(t) => file.with_modified_at(t),
                None => file,
            }
        })
        .collect();
    for path in &request.paths {
        let file = InputFile::from_path(std::path::Path::new(path))
            .await
            .map_err(|e| ApiError::BadRequest(format!("Cannot read {}: {}", path, e)))?;
        files.push(file);
    }

    let job = state.orchestrator.submit(files, request.options).await?;
    tracing::info!(job_id = %job.job_id, files = job.file_names.len(), "Job submitted");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: job.job_id,
            status: job.status,
            created_at: job.created_at,
        }),
    ))
}

pub(super) async fn load_job(state: &AppState, job_id: Uuid) -> ApiResult<PipelineJob> {
    state
        .jobs
        .get(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))
}

/// GET /jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    Ok(Json(load_job(&state, job_id).await?.into()))
}

fn finished_result(job: PipelineJob) -> ApiResult<serde_json::Value> {
    match (job.status, job.result) {
        (JobStatus::Completed, Some(result)) => Ok(result),
        (JobStatus::Failed, _) => Err(ApiError::Conflict(format!(
            "Job {} failed: {}",
            job.job_id,
            job.error.unwrap_or_default()
        ))),
        (status, _) => Err(ApiError::Conflict(format!(
            "Job {} has no result yet (status: {})",
            job.job_id, status
        ))),
    }
}

/// GET /jobs/:id/result - transport-form result of a completed job
pub async fn get_result(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let job = load_job(&state, job_id).await?;
    Ok(Json(finished_result(job)?))
}

/// POST /jobs/:id/cancel response
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub job_id: Uuid,
    pub cancelled: bool,
}

/// POST /jobs/:id/cancel
///
/// 404 for unknown jobs, 409 once the job has finished.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CancelJobResponse>)> {
    let job = load_job(&state, job_id).await?;
    if job.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Job {} already {}",
            job_id, job.status
        )));
    }

    let cancelled = state.orchestrator.cancel(job_id).await;
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelJobResponse { job_id, cancelled }),
    ))
}

/// GET /jobs/:id/exports/:kind - raw export file (`spreadsheet_export` or `xml_export`)
pub async fn get_export(
    State(state): State<AppState>,
    Path((job_id, kind)): Path<(Uuid, String)>,
) -> ApiResult<Response> {
    let kind = match kind.as_str() {
        "spreadsheet_export" | "csv" => ArtifactKind::SpreadsheetExport,
        "xml_export" | "xml" => ArtifactKind::XmlExport,
        other => return Err(ApiError::BadRequest(format!("Unknown export kind: {}", other))),
    };

    let job = load_job(&state, job_id).await?;
    let result = from_transport(finished_result(job)?)?;
    let file = result
        .artifacts
        .export(kind)
        .ok_or_else(|| ApiError::NotFound(format!("Job {} has no {:?} export", job_id, kind)))?;

    Ok((
        [
            (header::CONTENT_TYPE, file.mime_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file.file_name),
            ),
        ],
        file.bytes.clone(),
    )
        .into_response())
}

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/result", get(get_result))
        .route("/jobs/:id/cancel", post(cancel_job))
        .route("/jobs/:id/exports/:kind", get(get_export))
}
