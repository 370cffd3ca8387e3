//! services/portal/src/web/rejection.rs
//!
//! Turns `PortError`s into HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Redirect, Response},
};
use serde_json::json;
use tracing::{error, warn};
use turing_portal_core::ports::PortError;

/// A handler failure carrying the port error it came from.
#[derive(Debug)]
pub struct Rejection(pub PortError);

impl From<PortError> for Rejection {
    fn from(e: PortError) -> Self {
        Self(e)
    }
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            PortError::SessionExpired { .. } => StatusCode::SEE_OTHER,
            PortError::Unauthorized => StatusCode::UNAUTHORIZED,
            PortError::NotFound(_) => StatusCode::NOT_FOUND,
            PortError::Http { .. } | PortError::Transport(_) => StatusCode::BAD_GATEWAY,
            PortError::MissingConfig(_) | PortError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        if let PortError::SessionExpired { redirect_to } = &self.0 {
            warn!("Session expired, redirecting to {}", redirect_to);
            return Redirect::to(redirect_to).into_response();
        }

        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {:?}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
