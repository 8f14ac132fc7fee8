pub mod health;
pub mod routes;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::daemon::manager::JobManager;
use crate::models::Settings;

/// Shared application state for the Axum server.
pub struct AppState {
    pub manager: Arc<JobManager>,
    pub settings: Arc<Settings>,
    pub start_time: Instant,
}

/// Create the Axum router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/repositories", get(routes::list_repositories))
        .route(
            "/api/tags",
            get(routes::list_tags).delete(routes::delete_tag),
        )
        .route("/api/local-images", get(routes::list_local_images))
        .route(
            "/api/sync-jobs",
            get(routes::list_jobs).post(routes::create_mirror_job),
        )
        .route("/api/sync-jobs/{id}", get(routes::get_job))
        .route("/api/local-push-jobs", post(routes::create_local_push_job))
        .route("/api/remote-prefix-jobs", post(routes::create_remote_prefix_job))
        .route(
            "/api/repository-delete-jobs",
            post(routes::create_repository_delete_job),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}
