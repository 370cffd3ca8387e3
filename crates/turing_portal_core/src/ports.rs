//! crates/turing_portal_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the portal's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to stay independent of the concrete HTTP client, identity provider and backend.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::{NewProject, Project, ProjectActivity, ProjectDataset, ProjectResult, ProjectUpdate};
use crate::http::{ApiRequest, ApiResponse};

/// Where the browser is sent once a session can no longer be recovered.
pub const SIGN_OUT_PATH: &str = "/api/logto/sign-out";

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., network, identity provider).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    /// The bearer token expired and could not be refreshed. The shell must send
    /// the user to `redirect_to` to sign in again.
    #[error("Token expired, redirecting to {redirect_to}")]
    SessionExpired { redirect_to: String },
    #[error("Request failed with status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Missing configuration: {0}")]
    MissingConfig(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    pub fn session_expired() -> Self {
        PortError::SessionExpired {
            redirect_to: SIGN_OUT_PATH.to_string(),
        }
    }

    /// Failures that a retry cannot fix.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PortError::Unauthorized
                | PortError::SessionExpired { .. }
                | PortError::MissingConfig(_)
                | PortError::Http { status: 401, .. }
        )
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Sends a fully-formed request and buffers the response.
///
/// Implementations report connection-level failures as `PortError::Transport`
/// and return every HTTP status, including errors, as an `ApiResponse`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> PortResult<ApiResponse>;
}

/// Obtains a fresh bearer token after the current one was rejected.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// `Ok(None)` means the provider answered but had no token to give.
    async fn refresh_token(&self) -> PortResult<Option<String>>;
}

/// Requests an access token scoped to an API resource from the identity provider.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn fetch_access_token(&self, resource: &str) -> PortResult<Option<String>>;
}

/// The backend's project, dataset, activity and result resources.
#[async_trait]
pub trait ProjectService: Send + Sync {
    // --- Projects ---
    async fn list_projects(&self) -> PortResult<Vec<Project>>;

    async fn create_project(&self, project: &NewProject) -> PortResult<Project>;

    async fn update_project(&self, project_id: &str, update: &ProjectUpdate) -> PortResult<Project>;

    async fn delete_project(&self, project_id: &str) -> PortResult<()>;

    // --- Datasets ---
    async fn list_datasets(&self, project_id: &str) -> PortResult<Vec<ProjectDataset>>;

    /// Transfers a file to the backend. The confirmed record shows up in a later
    /// `list_datasets` call.
    async fn upload_dataset(
        &self,
        project_id: &str,
        filename: &str,
        content_type: &str,
        data: Bytes,
    ) -> PortResult<()>;

    async fn delete_dataset(&self, project_id: &str, dataset_id: &str) -> PortResult<()>;

    // --- Activity log and results ---
    async fn list_activities(&self, project_id: &str) -> PortResult<Vec<ProjectActivity>>;

    async fn list_results(&self, project_id: &str) -> PortResult<Vec<ProjectResult>>;
}
