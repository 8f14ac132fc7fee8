use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::errors::SyncError;
use crate::models::{
    LocalPushRequest, MirrorRequest, RemotePrefixRequest, RepositoryDeleteRequest, TagDetails,
};
use crate::reference::detect_arch_label;

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// Map a [`SyncError`] onto an HTTP status and error code.
pub fn sync_error_response(err: &SyncError) -> Response {
    let (status, code) = match err {
        SyncError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
        SyncError::UnknownJob(_) => (StatusCode::NOT_FOUND, "not_found"),
        SyncError::Registry { status, .. } => {
            let status = status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            (status, "registry_error")
        }
        SyncError::Command(_) => (StatusCode::INTERNAL_SERVER_ERROR, "command_failed"),
        SyncError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };
    error_response(status, code, &error_message(err))
}

fn error_message(err: &SyncError) -> String {
    match err {
        SyncError::InvalidArgument(m) => m.clone(),
        SyncError::Registry { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

fn created<T: Serialize>(value: T) -> Response {
    (StatusCode::CREATED, Json(value)).into_response()
}

// ---------------------------------------------------------------------------
// Query params
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
pub struct ListRepositoriesParams {
    pub n: Option<usize>,
    pub last: Option<String>,
    #[serde(default)]
    pub non_empty_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct TagsParams {
    pub repository: String,
    /// Look up digest, size and creation time of every tag.
    #[serde(default = "default_true")]
    pub details: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct DeleteTagParams {
    pub repository: String,
    pub tag: String,
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

const DEFAULT_CATALOG_PAGE: usize = 100;
const DEFAULT_JOB_LIST_LIMIT: usize = 20;
const MAX_JOB_LIST_LIMIT: usize = 100;
const DEFAULT_LOCAL_IMAGE_LIMIT: usize = 300;
const MAX_LOCAL_IMAGE_LIMIT: usize = 1000;

// ---------------------------------------------------------------------------
// Registry browsing
// ---------------------------------------------------------------------------

/// GET /api/repositories
pub async fn list_repositories(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListRepositoriesParams>,
) -> Response {
    let max = state.settings.max_catalog_results.max(1);
    let n = params.n.unwrap_or(DEFAULT_CATALOG_PAGE).clamp(1, max);
    let registry = state.manager.registry();

    let mut page = match registry.list_repositories(n, params.last.as_deref()).await {
        Ok(page) => page,
        Err(e) => {
            tracing::warn!("Failed to list repositories: {}", e);
            return sync_error_response(&e);
        }
    };

    if params.non_empty_only {
        let mut non_empty = Vec::with_capacity(page.repositories.len());
        for repository in page.repositories {
            // Unreadable repositories count as empty here.
            match registry.list_tags(&repository).await {
                Ok(tags) if !tags.is_empty() => non_empty.push(repository),
                Ok(_) => {}
                Err(e) => tracing::debug!("Skipping repository {}: {}", repository, e),
            }
        }
        page.repositories = non_empty;
    }

    (StatusCode::OK, Json(page)).into_response()
}

/// GET /api/tags?repository=&details=
///
/// A tag whose details cannot be read is still listed, with its error.
pub async fn list_tags(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TagsParams>,
) -> Response {
    let registry = state.manager.registry();
    let tags = match registry.list_tags(&params.repository).await {
        Ok(tags) => tags,
        Err(e) => {
            tracing::warn!("Failed to list tags of {}: {}", params.repository, e);
            return sync_error_response(&e);
        }
    };

    let mut entries = Vec::with_capacity(tags.len());
    for tag in tags {
        if !params.details {
            entries.push(TagDetails::bare(tag));
            continue;
        }
        match crate::registry::tag_details(registry.as_ref(), &params.repository, &tag).await {
            Ok(details) => entries.push(details),
            Err(e) => {
                tracing::debug!("No details for {}:{}: {}", params.repository, tag, e);
                entries.push(TagDetails::failed(tag, error_message(&e)));
            }
        }
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "repository": params.repository,
            "tags": entries,
        })),
    )
        .into_response()
}

/// DELETE /api/tags?repository=&tag=
pub async fn delete_tag(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DeleteTagParams>,
) -> Response {
    let registry = state.manager.registry();
    match crate::registry::delete_tag(registry.as_ref(), &params.repository, &params.tag).await {
        Ok(digest) => {
            tracing::info!("Deleted {}:{} ({})", params.repository, params.tag, digest);
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "deleted": true,
                    "repository": params.repository,
                    "tag": params.tag,
                    "digest": digest,
                })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::warn!("Failed to delete {}:{}: {}", params.repository, params.tag, e);
            sync_error_response(&e)
        }
    }
}

/// GET /api/local-images
pub async fn list_local_images(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> Response {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LOCAL_IMAGE_LIMIT)
        .clamp(1, MAX_LOCAL_IMAGE_LIMIT);
    match state.manager.list_local_images(limit).await {
        Ok(images) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "images": images,
                "detected_arch": detect_arch_label(),
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("Failed to list local images: {}", e);
            sync_error_response(&e)
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// GET /api/sync-jobs
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> Response {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_JOB_LIST_LIMIT)
        .clamp(1, MAX_JOB_LIST_LIMIT);
    let jobs = state.manager.list_jobs(limit).await;
    (StatusCode::OK, Json(serde_json::json!({ "jobs": jobs }))).into_response()
}

/// GET /api/sync-jobs/{id}
pub async fn get_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.manager.get_job(&id).await {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => {
            tracing::debug!("Job lookup failed: {}", e);
            sync_error_response(&e)
        }
    }
}

/// POST /api/sync-jobs
pub async fn create_mirror_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MirrorRequest>,
) -> Response {
    match state
        .manager
        .create_mirror_job(
            &request.source_image,
            request.target_repository.as_deref(),
            request.target_tag.as_deref(),
        )
        .await
    {
        Ok(job) => created(job),
        Err(e) => {
            tracing::warn!("Mirror job creation failed: {}", e);
            sync_error_response(&e)
        }
    }
}

/// POST /api/local-push-jobs
pub async fn create_local_push_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LocalPushRequest>,
) -> Response {
    match state.manager.create_local_push_job(&request).await {
        Ok(job) => created(job),
        Err(e) => {
            tracing::warn!("Local push job creation failed: {}", e);
            sync_error_response(&e)
        }
    }
}

/// POST /api/remote-prefix-jobs
pub async fn create_remote_prefix_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RemotePrefixRequest>,
) -> Response {
    match state.manager.create_remote_prefix_job(&request).await {
        Ok(job) => created(job),
        Err(e) => {
            tracing::warn!("Remote prefix job creation failed: {}", e);
            sync_error_response(&e)
        }
    }
}

/// POST /api/repository-delete-jobs
pub async fn create_repository_delete_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RepositoryDeleteRequest>,
) -> Response {
    match state
        .manager
        .create_repository_delete_job(&request.repositories)
        .await
    {
        Ok(job) => created(job),
        Err(e) => {
            tracing::warn!("Repository delete job creation failed: {}", e);
            sync_error_response(&e)
        }
    }
}
