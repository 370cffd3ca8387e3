pub mod auth;
pub mod debug;
pub mod middleware;
pub mod rejection;
pub mod rest;
pub mod session;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::ApiError;
use rest::*;
use state::AppState;

pub use middleware::require_session;

/// Dataset files pass through the portal in a single request.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Builds the API router: public auth routes plus session-protected project routes.
pub fn router(app_state: Arc<AppState>) -> Result<Router, ApiError> {
    let origin = app_state
        .config
        .cors_origin
        .parse::<HeaderValue>()
        .map_err(|e| ApiError::Internal(format!("Invalid CORS_ORIGIN: {}", e)))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Public routes (no session required)
    let public_routes = Router::new()
        .route("/api/logto/sign-in", get(auth::sign_in_handler))
        .route("/api/logto/sign-in-callback", get(auth::sign_in_callback_handler))
        .route("/api/logto/sign-out", get(auth::sign_out_handler))
        .route("/api/logto/user", get(auth::user_handler))
        .route("/api/logto/token", get(auth::token_handler))
        .route("/api/debug/token", get(debug::token_debug_handler));

    // Protected routes (session required)
    let protected_routes = Router::new()
        .route(
            "/api/projects",
            get(list_projects_handler).post(create_project_handler),
        )
        .route(
            "/api/projects/{project_id}",
            get(get_project_handler)
                .put(update_project_handler)
                .delete(delete_project_handler),
        )
        .route(
            "/api/projects/{project_id}/datasets",
            get(list_datasets_handler).post(upload_dataset_handler),
        )
        .route(
            "/api/projects/{project_id}/datasets/{dataset_id}",
            axum::routing::delete(delete_dataset_handler),
        )
        .route(
            "/api/projects/{project_id}/activities",
            get(list_activities_handler),
        )
        .route(
            "/api/projects/{project_id}/results",
            get(list_results_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_session,
        ));

    Ok(Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state))
}
