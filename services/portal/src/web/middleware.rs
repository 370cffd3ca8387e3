//! services/portal/src/web/middleware.rs
//!
//! Session middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::{debug, info};
use turing_portal_core::ports::SIGN_OUT_PATH;

use crate::web::session::{session_id_from_cookie, PortalSession};
use crate::web::state::AppState;

/// Looks up the session named by the request's cookie, if any.
pub async fn current_session(state: &AppState, headers: &HeaderMap) -> Option<Arc<PortalSession>> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    let session_id = session_id_from_cookie(cookie_header)?;
    state.sessions.get(session_id).await
}

/// Middleware that resolves the portal session from its cookie.
///
/// A valid session is inserted into the request extensions for handlers to use.
/// A missing one is rejected with 401. A session whose token the backend has
/// declared expired is sent to sign out.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(session) = current_session(&state, req.headers()).await else {
        debug!("Rejecting {} without a session", req.uri().path());
        return StatusCode::UNAUTHORIZED.into_response();
    };

    if session.is_expired() {
        info!("Session {} expired, redirecting to sign-out", session.id);
        return Redirect::to(SIGN_OUT_PATH).into_response();
    }

    req.extensions_mut().insert(session);
    next.run(req).await
}
