//! # HTTP Handlers
//!
//! The REST adapter over the core services. Authentication is an external
//! collaborator: the fronting auth layer validates credentials and
//! installs the caller identity in the `x-user-id` header, which the
//! [`CurrentUser`] extractor reads. A missing or malformed header is the
//! 401-equivalent.

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::body::Bytes;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use docflow_sdk::events::JsonMap;
use docflow_sdk::job::Job;
use docflow_sdk::plugin::PluginMetadata;
use docflow_sdk::storage::{DocumentStore as _, JobStore as _, SourceStore as _};
use docflow_sdk::workflow::{StepReorder, WorkflowScope, WorkflowStep};

use crate::error::ApiError;
use crate::server::AppState;

/// Caller identity installed by the fronting auth layer.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Uuid);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .map(CurrentUser)
            .ok_or_else(|| ApiError::Authorization {
                message: "missing or invalid x-user-id header".to_string(),
            })
    }
}

// === request / response shapes ===

#[derive(Debug, Deserialize)]
pub struct AddWorkflowStepRequest {
    pub plugin_name: String,
    pub sequence_number: u32,
    #[serde(default)]
    pub settings: JsonMap,
}

#[derive(Debug, Deserialize)]
pub struct ReorderWorkflowRequest {
    pub steps: Vec<StepReorder>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowStepResponse {
    pub id: Uuid,
    pub sequence_number: u32,
    pub plugin_name: String,
    pub display_name: String,
    pub input_types: Vec<String>,
    pub output_type: Option<String>,
    pub color: String,
    pub settings: JsonMap,
    pub is_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub document_type: String,
    pub steps: Vec<WorkflowStepResponse>,
}

#[derive(Debug, Serialize)]
pub struct AvailablePluginResponse {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub input_types: Vec<String>,
    pub output_type: Option<String>,
    pub color: String,
}

impl From<PluginMetadata> for AvailablePluginResponse {
    fn from(m: PluginMetadata) -> Self {
        Self {
            name: m.name,
            display_name: m.display_name,
            description: m.description,
            input_types: m.input_types,
            output_type: m.output_type,
            color: m.color,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AvailablePluginsQuery {
    pub current_step: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub plugin_name: String,
    pub status: String,
    pub progress: u8,
    pub progress_message: Option<String>,
    pub error_message: Option<String>,
    pub output_document_id: Option<Uuid>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            document_id: job.document_id,
            plugin_name: job.plugin_name,
            status: job.status.to_string(),
            progress: job.progress,
            progress_message: job.progress_message,
            error_message: job.error_message,
            output_document_id: job.output_document_id,
            created_at: job.created_at.to_rfc3339(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelJobRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecentEventsQuery {
    pub minutes: Option<u32>,
    pub types: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub document_type: String,
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSourceRequest {
    pub name: String,
    pub description: Option<String>,
}

// === helpers ===

fn step_response(state: &AppState, step: WorkflowStep) -> WorkflowStepResponse {
    let metadata = state.registry.metadata(&step.plugin_name);
    WorkflowStepResponse {
        id: step.id,
        sequence_number: step.sequence_number,
        plugin_name: step.plugin_name.clone(),
        display_name: metadata
            .as_ref()
            .map(|m| m.display_name.clone())
            .unwrap_or_else(|| step.plugin_name.clone()),
        input_types: metadata
            .as_ref()
            .map(|m| m.input_types.clone())
            .unwrap_or_default(),
        output_type: metadata.as_ref().and_then(|m| m.output_type.clone()),
        color: metadata
            .map(|m| m.color)
            .unwrap_or_else(|| "#6366F1".to_string()),
        settings: step.settings,
        is_enabled: step.is_enabled,
    }
}

fn workflow_response(
    state: &AppState,
    document_type: String,
    steps: Vec<WorkflowStep>,
) -> WorkflowResponse {
    let steps = steps
        .into_iter()
        .map(|s| step_response(state, s))
        .collect();
    WorkflowResponse {
        document_type,
        steps,
    }
}

/// Source-scoped operations require the source to exist and belong to the
/// caller.
async fn authorize_source(
    state: &AppState,
    source_id: Uuid,
    user: Uuid,
) -> Result<(), ApiError> {
    state
        .stores
        .sources
        .source(source_id)
        .await?
        .filter(|s| s.owner_id == user)
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found("source not found"))
}

/// Job operations require ownership of the job's document.
async fn authorize_job(state: &AppState, job_id: Uuid, user: Uuid) -> Result<Job, ApiError> {
    let job = state
        .stores
        .jobs
        .job(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("job not found"))?;

    let owned = state
        .stores
        .documents
        .document(job.document_id)
        .await?
        .map(|d| d.owner_id == user)
        .unwrap_or(false);
    if !owned {
        return Err(ApiError::Authorization {
            message: "not authorized for this job".to_string(),
        });
    }
    Ok(job)
}

// === workflows ===

pub async fn source_workflow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((source_id, document_type)): Path<(Uuid, String)>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    authorize_source(&state, source_id, user.0).await?;
    let steps = state
        .workflows
        .workflow(WorkflowScope::Source(source_id), &document_type)
        .await?;
    Ok(Json(workflow_response(&state, document_type, steps)))
}

pub async fn add_source_workflow_step(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((source_id, document_type)): Path<(Uuid, String)>,
    Json(request): Json<AddWorkflowStepRequest>,
) -> Result<(StatusCode, Json<WorkflowStepResponse>), ApiError> {
    authorize_source(&state, source_id, user.0).await?;
    let step = state
        .workflows
        .append_step(
            WorkflowScope::Source(source_id),
            &document_type,
            &request.plugin_name,
            request.sequence_number,
            request.settings,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(step_response(&state, step))))
}

pub async fn delete_source_workflow_step(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((source_id, document_type, step_id)): Path<(Uuid, String, Uuid)>,
) -> Result<StatusCode, ApiError> {
    authorize_source(&state, source_id, user.0).await?;
    state
        .workflows
        .delete_step(WorkflowScope::Source(source_id), &document_type, step_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reorder_source_workflow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((source_id, document_type)): Path<(Uuid, String)>,
    Json(request): Json<ReorderWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    authorize_source(&state, source_id, user.0).await?;
    let steps = state
        .workflows
        .reorder(
            WorkflowScope::Source(source_id),
            &document_type,
            &request.steps,
        )
        .await?;
    Ok(Json(workflow_response(&state, document_type, steps)))
}

pub async fn source_available_plugins(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((source_id, document_type)): Path<(Uuid, String)>,
    Query(query): Query<AvailablePluginsQuery>,
) -> Result<Json<Vec<AvailablePluginResponse>>, ApiError> {
    authorize_source(&state, source_id, user.0).await?;
    let compatible = state
        .workflows
        .compatible_plugins(
            WorkflowScope::Source(source_id),
            &document_type,
            query.current_step,
        )
        .await?;
    Ok(Json(compatible.into_iter().map(Into::into).collect()))
}

pub async fn user_workflow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(document_type): Path<String>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let steps = state
        .workflows
        .workflow(WorkflowScope::User(user.0), &document_type)
        .await?;
    Ok(Json(workflow_response(&state, document_type, steps)))
}

pub async fn add_user_workflow_step(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(document_type): Path<String>,
    Json(request): Json<AddWorkflowStepRequest>,
) -> Result<(StatusCode, Json<WorkflowStepResponse>), ApiError> {
    let step = state
        .workflows
        .append_step(
            WorkflowScope::User(user.0),
            &document_type,
            &request.plugin_name,
            request.sequence_number,
            request.settings,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(step_response(&state, step))))
}

pub async fn delete_user_workflow_step(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((document_type, step_id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state
        .workflows
        .delete_step(WorkflowScope::User(user.0), &document_type, step_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reorder_user_workflow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(document_type): Path<String>,
    Json(request): Json<ReorderWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let steps = state
        .workflows
        .reorder(WorkflowScope::User(user.0), &document_type, &request.steps)
        .await?;
    Ok(Json(workflow_response(&state, document_type, steps)))
}

pub async fn user_available_plugins(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(document_type): Path<String>,
    Query(query): Query<AvailablePluginsQuery>,
) -> Result<Json<Vec<AvailablePluginResponse>>, ApiError> {
    let compatible = state
        .workflows
        .compatible_plugins(
            WorkflowScope::User(user.0),
            &document_type,
            query.current_step,
        )
        .await?;
    Ok(Json(compatible.into_iter().map(Into::into).collect()))
}

// === events ===

pub async fn recent_events(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<RecentEventsQuery>,
) -> Json<serde_json::Value> {
    let minutes = query.minutes.unwrap_or(5).clamp(1, 60);
    let types: Option<Vec<String>> = query
        .types
        .as_deref()
        .map(|t| t.split(',').map(|s| s.trim().to_string()).collect());

    let events = state
        .bus
        .recent_events(minutes, types.as_deref(), query.source.as_deref());

    Json(json!({
        "events": events,
        "count": events.len(),
    }))
}

// === jobs ===

pub async fn get_job(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = authorize_job(&state, job_id, user.0).await?;
    Ok(Json(job.into()))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(job_id): Path<Uuid>,
    Json(request): Json<CancelJobRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize_job(&state, job_id, user.0).await?;

    let reason = request.reason.as_deref().unwrap_or("cancelled by user");
    let job = state.scheduler.cancel(job_id, reason, Some(user.0)).await?;

    Ok(Json(json!({
        "message": "job cancelled",
        "job_id": job.id,
        "status": job.status.to_string(),
    })))
}

// === documents and sources ===

pub async fn upload_document(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if body.is_empty() {
        return Err(ApiError::validation("empty upload body"));
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let filename = query.filename.unwrap_or_else(|| "upload.bin".to_string());

    let document = state
        .documents
        .upload(user.0, &query.document_type, &filename, &content_type, &body)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": document.id,
            "document_type": document.document_type,
            "source_id": document.source_id,
            "size_bytes": document.storage.size_bytes,
            "checksum": document.storage.checksum,
        })),
    ))
}

pub async fn delete_document(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(document_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state.documents.delete(document_id, user.0).await?;
    Ok(Json(json!({
        "message": "document deleted",
        "removed": removed,
    })))
}

pub async fn create_source(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<CreateSourceRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let (source, api_key) = state
        .sources
        .create_source(user.0, &request.name, request.description)
        .await?;

    // The plaintext key appears in this response only.
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": source.id,
            "name": source.name,
            "api_key": api_key,
            "api_key_prefix": source.api_key_prefix,
        })),
    ))
}

// === admin ===

pub async fn list_plugins(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Json<serde_json::Value> {
    let plugins: Vec<serde_json::Value> = state
        .registry
        .list()
        .into_iter()
        .map(|entry| {
            json!({
                "name": entry.metadata.name,
                "version": entry.metadata.version,
                "display_name": entry.metadata.display_name,
                "state": entry.state,
                "input_types": entry.metadata.input_types,
                "output_type": entry.metadata.output_type,
                "max_concurrent_jobs": entry.metadata.max_concurrent_jobs,
                "dependencies": entry.metadata.dependencies,
                "last_error": entry.last_error,
            })
        })
        .collect();
    Json(json!({ "plugins": plugins }))
}

pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.shutdown.uptime().as_secs(),
        "plugins_active": state.registry.active().len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
