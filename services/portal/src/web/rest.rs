//! services/portal/src/web/rest.rs
//!
//! Contains the Axum handlers for the project API and the master definition
//! for the OpenAPI specification.
//!
//! Reads go through the session's query cache. Dataset uploads and deletions
//! are optimistic: the response reflects the local change immediately and the
//! dataset listing reconciles it against the backend.

use crate::web::rejection::Rejection;
use crate::web::session::PortalSession;
use crate::web::state::AppState;
use crate::web::{auth, debug};
use axum::{
    extract::{Extension, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use turing_portal_core::{
    domain::{
        ActivityType, NewProject, Project, ProjectActivity, ProjectDataset, ProjectResult,
        ProjectStatus, ProjectUpdate,
    },
    mutations::DeletePlan,
    ports::{PortError, ProjectService},
    query::QueryKey,
};
use utoipa::{OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_projects_handler,
        get_project_handler,
        create_project_handler,
        update_project_handler,
        delete_project_handler,
        list_datasets_handler,
        upload_dataset_handler,
        delete_dataset_handler,
        list_activities_handler,
        list_results_handler,
        auth::sign_in_handler,
        auth::sign_in_callback_handler,
        auth::sign_out_handler,
        auth::user_handler,
        auth::token_handler,
        debug::token_debug_handler,
    ),
    components(
        schemas(
            ProjectResponse,
            CreateProjectRequest,
            UpdateProjectRequest,
            DatasetResponse,
            UploadAccepted,
            ActivityResponse,
            auth::UserResponse,
            auth::AccessTokenResponse,
            debug::TokenDebugResponse,
            debug::M2mDebug,
        )
    ),
    tags(
        (name = "Turing Portal API", description = "Backend-for-frontend for Turing research projects.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// A project with its presentation fields resolved.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    #[schema(value_type = String, example = "running")]
    pub status: ProjectStatus,
    pub status_label: String,
    pub status_tone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub dataset_count: u64,
    pub last_activity: Option<String>,
}

impl From<&Project> for ProjectResponse {
    fn from(project: &Project) -> Self {
        let descriptor = project.status.descriptor();
        Self {
            id: project.id.clone(),
            name: project.name.clone(),
            description: project.description.clone(),
            status: project.status,
            status_label: descriptor.label.to_string(),
            status_tone: descriptor.tone.to_string(),
            created_at: project.created_at,
            updated_at: project.updated_at,
            dataset_count: project.dataset_count,
            last_activity: project.last_activity.clone(),
        }
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[schema(value_type = Option<String>)]
    pub status: Option<ProjectStatus>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = Option<String>)]
    pub status: Option<ProjectStatus>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatasetResponse {
    pub id: String,
    pub filename: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    /// True while the upload has not been confirmed by the backend.
    pub pending: bool,
}

impl From<&ProjectDataset> for DatasetResponse {
    fn from(dataset: &ProjectDataset) -> Self {
        Self {
            id: dataset.id.clone(),
            filename: dataset.filename.clone(),
            size: dataset.size,
            uploaded_at: dataset.uploaded_at,
            pending: dataset.is_optimistic(),
        }
    }
}

/// The response sent once an upload has been accepted for transfer.
#[derive(Serialize, ToSchema)]
pub struct UploadAccepted {
    pub placeholder: DatasetResponse,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResponse {
    pub id: String,
    #[serde(rename = "type")]
    #[schema(value_type = String, example = "upload")]
    pub kind: ActivityType,
    pub label: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&ProjectActivity> for ActivityResponse {
    fn from(activity: &ProjectActivity) -> Self {
        Self {
            id: activity.id.clone(),
            kind: activity.kind,
            label: activity.kind.descriptor().label.to_string(),
            message: activity.message.clone(),
            timestamp: activity.timestamp,
        }
    }
}

//=========================================================================================
// Cached Reads
//=========================================================================================

async fn cached_projects(session: &PortalSession) -> Result<Arc<Vec<Project>>, Rejection> {
    let api = session.api.clone();
    let projects = session
        .queries
        .fetch(QueryKey::Projects, move || {
            let api = api.clone();
            async move { api.list_projects().await }
        })
        .await?;
    Ok(projects)
}

async fn cached_datasets(
    session: &PortalSession,
    project_id: &str,
) -> Result<Arc<Vec<ProjectDataset>>, Rejection> {
    let api = session.api.clone();
    let id = project_id.to_string();
    let datasets = session
        .queries
        .fetch(QueryKey::Datasets(project_id.to_string()), move || {
            let api = api.clone();
            let id = id.clone();
            async move { api.list_datasets(&id).await }
        })
        .await?;
    Ok(datasets)
}

//=========================================================================================
// Project Handlers
//=========================================================================================

/// GET /api/projects - List the user's projects
#[utoipa::path(
    get,
    path = "/api/projects",
    responses(
        (status = 200, description = "All projects", body = [ProjectResponse]),
        (status = 401, description = "Not signed in"),
        (status = 303, description = "Session expired; redirect to sign-out"),
        (status = 502, description = "The Turing API failed")
    )
)]
pub async fn list_projects_handler(
    Extension(session): Extension<Arc<PortalSession>>,
) -> Result<Json<Vec<ProjectResponse>>, Rejection> {
    let projects = cached_projects(&session).await?;
    Ok(Json(projects.iter().map(ProjectResponse::from).collect()))
}

/// GET /api/projects/{project_id} - Fetch one project
#[utoipa::path(
    get,
    path = "/api/projects/{project_id}",
    params(("project_id" = String, Path, description = "Project id")),
    responses(
        (status = 200, description = "The project", body = ProjectResponse),
        (status = 404, description = "No such project")
    )
)]
pub async fn get_project_handler(
    Extension(session): Extension<Arc<PortalSession>>,
    Path(project_id): Path<String>,
) -> Result<Json<ProjectResponse>, Rejection> {
    let projects = cached_projects(&session).await?;
    let project = projects
        .iter()
        .find(|p| p.id == project_id)
        .ok_or_else(|| PortError::NotFound(format!("Project {} not found", project_id)))?;
    Ok(Json(ProjectResponse::from(project)))
}

/// POST /api/projects - Create a project
#[utoipa::path(
    post,
    path = "/api/projects",
    request_body = CreateProjectRequest,
    responses(
        (status = 201, description = "Project created", body = ProjectResponse),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn create_project_handler(
    Extension(session): Extension<Arc<PortalSession>>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let new_project = NewProject {
        name: req.name,
        description: req.description,
        status: req.status,
    };
    let project = session.api.create_project(&new_project).await?;
    session.queries.invalidate(&QueryKey::Projects);
    info!("Created project {}", project.id);
    Ok((StatusCode::CREATED, Json(ProjectResponse::from(&project))))
}

/// PUT /api/projects/{project_id} - Edit a project's name, description or status
#[utoipa::path(
    put,
    path = "/api/projects/{project_id}",
    params(("project_id" = String, Path, description = "Project id")),
    request_body = UpdateProjectRequest,
    responses(
        (status = 200, description = "Project updated", body = ProjectResponse),
        (status = 404, description = "No such project")
    )
)]
pub async fn update_project_handler(
    Extension(session): Extension<Arc<PortalSession>>,
    Path(project_id): Path<String>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectResponse>, Rejection> {
    let update = ProjectUpdate {
        name: req.name,
        description: req.description,
        status: req.status,
    };
    let project = session.api.update_project(&project_id, &update).await?;
    session.queries.invalidate_project(&project_id);
    Ok(Json(ProjectResponse::from(&project)))
}

/// DELETE /api/projects/{project_id} - Delete a project
#[utoipa::path(
    delete,
    path = "/api/projects/{project_id}",
    params(("project_id" = String, Path, description = "Project id")),
    responses(
        (status = 204, description = "Project deleted"),
        (status = 404, description = "No such project")
    )
)]
pub async fn delete_project_handler(
    Extension(session): Extension<Arc<PortalSession>>,
    Path(project_id): Path<String>,
) -> Result<StatusCode, Rejection> {
    session.api.delete_project(&project_id).await?;
    session.queries.invalidate_project(&project_id);
    info!("Deleted project {}", project_id);
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Dataset Handlers
//=========================================================================================

/// GET /api/projects/{project_id}/datasets - List datasets, including pending uploads
#[utoipa::path(
    get,
    path = "/api/projects/{project_id}/datasets",
    params(("project_id" = String, Path, description = "Project id")),
    responses(
        (status = 200, description = "Confirmed datasets followed by pending uploads", body = [DatasetResponse])
    )
)]
pub async fn list_datasets_handler(
    Extension(session): Extension<Arc<PortalSession>>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<DatasetResponse>>, Rejection> {
    let remote = cached_datasets(&session, &project_id).await?;
    let view = session.datasets.view(&project_id, &remote);
    Ok(Json(view.iter().map(DatasetResponse::from).collect()))
}

/// POST /api/projects/{project_id}/datasets - Upload a dataset file
///
/// Accepts a multipart/form-data request with a single file part. The transfer
/// to the backend continues after the response is sent.
#[utoipa::path(
    post,
    path = "/api/projects/{project_id}/datasets",
    params(("project_id" = String, Path, description = "Project id")),
    request_body(content_type = "multipart/form-data", description = "The dataset file to upload."),
    responses(
        (status = 202, description = "Upload accepted", body = UploadAccepted),
        (status = 400, description = "Missing file part"),
        (status = 500, description = "The Turing API is not configured")
    )
)]
pub async fn upload_dataset_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Arc<PortalSession>>,
    Path(project_id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, Response> {
    if state.config.turing_api.is_none() {
        return Err(Rejection(PortError::MissingConfig(
            "TURING_API is not configured".to_string(),
        ))
        .into_response());
    }

    let field = multipart
        .next_field()
        .await
        .map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("Failed to read multipart data: {}", e),
            )
                .into_response()
        })?
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "Multipart form must include a file".to_string(),
            )
                .into_response()
        })?;

    let filename = field.file_name().unwrap_or("untitled").to_string();
    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = field.bytes().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Failed to read file bytes: {}", e),
        )
            .into_response()
    })?;

    let placeholder =
        session
            .datasets
            .begin_upload(&project_id, &filename, data.len() as u64, Utc::now());
    info!(
        "Accepted upload of {} ({} bytes) to project {}",
        filename,
        data.len(),
        project_id
    );

    let task_session = session.clone();
    let placeholder_id = placeholder.id.clone();
    tokio::spawn(async move {
        let result = task_session
            .api
            .upload_dataset(&project_id, &filename, &content_type, data)
            .await;
        match result {
            Ok(()) => {
                info!("Upload of {} to project {} complete", filename, project_id);
                task_session
                    .datasets
                    .complete_upload(&project_id, &placeholder_id, Utc::now());
                task_session.queries.invalidate_project(&project_id);
            }
            Err(e) => {
                error!("Upload of {} to project {} failed: {:?}", filename, project_id, e);
                task_session.datasets.fail_upload(&project_id, &placeholder_id);
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadAccepted {
            placeholder: DatasetResponse::from(&placeholder),
        }),
    ))
}

/// DELETE /api/projects/{project_id}/datasets/{dataset_id} - Delete a dataset
#[utoipa::path(
    delete,
    path = "/api/projects/{project_id}/datasets/{dataset_id}",
    params(
        ("project_id" = String, Path, description = "Project id"),
        ("dataset_id" = String, Path, description = "Dataset id, or a pending upload's placeholder id")
    ),
    responses(
        (status = 204, description = "Dataset deleted"),
        (status = 404, description = "No such dataset")
    )
)]
pub async fn delete_dataset_handler(
    Extension(session): Extension<Arc<PortalSession>>,
    Path((project_id, dataset_id)): Path<(String, String)>,
) -> Result<StatusCode, Rejection> {
    match session.datasets.begin_delete(&project_id, &dataset_id) {
        DeletePlan::LocalOnly => Ok(StatusCode::NO_CONTENT),
        DeletePlan::Remote => {
            if let Err(e) = session.api.delete_dataset(&project_id, &dataset_id).await {
                warn!("Delete of dataset {} failed, restoring it", dataset_id);
                session.datasets.fail_delete(&project_id, &dataset_id);
                return Err(e.into());
            }
            session.queries.invalidate_project(&project_id);
            Ok(StatusCode::NO_CONTENT)
        }
    }
}

//=========================================================================================
// Activity and Result Handlers
//=========================================================================================

/// GET /api/projects/{project_id}/activities - The project's activity log
#[utoipa::path(
    get,
    path = "/api/projects/{project_id}/activities",
    params(("project_id" = String, Path, description = "Project id")),
    responses(
        (status = 200, description = "Activity entries", body = [ActivityResponse])
    )
)]
pub async fn list_activities_handler(
    Extension(session): Extension<Arc<PortalSession>>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<ActivityResponse>>, Rejection> {
    let api = session.api.clone();
    let id = project_id.clone();
    let activities = session
        .queries
        .fetch(QueryKey::Activities(project_id), move || {
            let api = api.clone();
            let id = id.clone();
            async move { api.list_activities(&id).await }
        })
        .await?;
    Ok(Json(activities.iter().map(ActivityResponse::from).collect()))
}

/// GET /api/projects/{project_id}/results - Analysis results, as the backend returns them
#[utoipa::path(
    get,
    path = "/api/projects/{project_id}/results",
    params(("project_id" = String, Path, description = "Project id")),
    responses(
        (status = 200, description = "Result documents")
    )
)]
pub async fn list_results_handler(
    Extension(session): Extension<Arc<PortalSession>>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<ProjectResult>>, Rejection> {
    let api = session.api.clone();
    let id = project_id.clone();
    let results = session
        .queries
        .fetch(QueryKey::Results(project_id), move || {
            let api = api.clone();
            let id = id.clone();
            async move { api.list_results(&id).await }
        })
        .await?;
    Ok(Json(results.as_ref().clone()))
}
