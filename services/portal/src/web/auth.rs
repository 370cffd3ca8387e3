//! services/portal/src/web/auth.rs
//!
//! Sign-in, sign-out and token endpoints under `/api/logto`.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use turing_portal_core::{ports::PortError, token_store::TokenState};
use utoipa::{IntoParams, ToSchema};

use crate::web::middleware::current_session;
use crate::web::rejection::Rejection;
use crate::web::session::{cleared_session_cookie, session_cookie, PortalSession};
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct SignInParams {
    /// Local path to land on after signing in.
    pub return_to: Option<String>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub is_authenticated: bool,
    #[schema(value_type = Object)]
    pub claims: serde_json::Value,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub access_token: String,
}

/// Only same-origin paths are accepted as redirect targets.
fn local_path(return_to: Option<String>) -> String {
    return_to
        .filter(|p| p.starts_with('/') && !p.starts_with("//"))
        .unwrap_or_else(|| "/".to_string())
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /api/logto/sign-in - Redirect the browser to the identity provider
#[utoipa::path(
    get,
    path = "/api/logto/sign-in",
    params(SignInParams),
    responses(
        (status = 303, description = "Redirect to the Logto authorization endpoint")
    )
)]
pub async fn sign_in_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SignInParams>,
) -> Result<Redirect, Rejection> {
    let sign_in_state = state.sessions.begin_sign_in(local_path(params.return_to)).await;
    let url = state.logto.authorization_url(&sign_in_state)?;
    Ok(Redirect::to(&url))
}

/// GET /api/logto/sign-in-callback - Complete the code exchange and open a session
#[utoipa::path(
    get,
    path = "/api/logto/sign-in-callback",
    params(CallbackParams),
    responses(
        (status = 303, description = "Signed in; session cookie set"),
        (status = 400, description = "Missing code, unknown state or provider error"),
        (status = 401, description = "The identity provider rejected the code")
    )
)]
pub async fn sign_in_callback_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if let Some(provider_error) = params.error {
        warn!("Sign-in failed at the provider: {}", provider_error);
        return Err((
            StatusCode::BAD_REQUEST,
            params.error_description.unwrap_or(provider_error),
        ));
    }

    let (Some(code), Some(sign_in_state)) = (params.code, params.state) else {
        return Err((
            StatusCode::BAD_REQUEST,
            "code and state are required".to_string(),
        ));
    };

    let pending = state
        .sessions
        .finish_sign_in(&sign_in_state)
        .await
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "Unknown or expired sign-in state".to_string(),
            )
        })?;

    let tokens = state.logto.exchange_code(&code).await.map_err(|e| {
        error!("Code exchange failed: {:?}", e);
        (Rejection(e).status(), "Failed to complete sign-in".to_string())
    })?;

    let refresh_token = tokens.refresh_token.ok_or_else(|| {
        error!("No refresh token issued; is offline_access in LOGTO_SCOPES?");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Sign-in did not grant offline access".to_string(),
        )
    })?;

    let claims = match state.logto.user_info(&tokens.access_token).await {
        Ok(claims) => claims,
        Err(e) => {
            warn!("Could not fetch user info: {:?}", e);
            serde_json::Value::Null
        }
    };

    let session = PortalSession::establish(&state, refresh_token, tokens.id_token, claims).await;
    if let TokenState::Error(message) = session.tokens.state() {
        warn!("Session {} has no API token yet: {}", session.id, message);
    }
    let cookie = session_cookie(&session, state.secure_cookies());
    state.sessions.insert(session).await;

    Ok((
        [(header::SET_COOKIE, cookie)],
        Redirect::to(&pending.return_to),
    ))
}

/// GET /api/logto/sign-out - Drop the session and end it at the provider
#[utoipa::path(
    get,
    path = "/api/logto/sign-out",
    responses(
        (status = 303, description = "Session cleared; redirect to the Logto end-session endpoint")
    )
)]
pub async fn sign_out_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, Rejection> {
    let id_token = match current_session(&state, &headers).await {
        Some(session) => {
            state.sessions.remove(&session.id).await;
            info!("Signed out session {}", session.id);
            session.id_token.clone()
        }
        None => None,
    };

    let url = state.logto.end_session_url(id_token.as_deref())?;
    Ok((
        [(header::SET_COOKIE, cleared_session_cookie())],
        Redirect::to(&url),
    ))
}

/// GET /api/logto/user - Report whether the browser is signed in
#[utoipa::path(
    get,
    path = "/api/logto/user",
    responses(
        (status = 200, description = "Authentication status and claims", body = UserResponse)
    )
)]
pub async fn user_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<UserResponse> {
    let response = match current_session(&state, &headers).await {
        Some(session) if !session.is_expired() => UserResponse {
            is_authenticated: true,
            claims: session.claims.clone(),
        },
        _ => UserResponse {
            is_authenticated: false,
            claims: serde_json::Value::Null,
        },
    };
    Json(response)
}

/// GET /api/logto/token - Hand the browser an API access token
#[utoipa::path(
    get,
    path = "/api/logto/token",
    responses(
        (status = 200, description = "A token for the Turing API resource", body = AccessTokenResponse),
        (status = 401, description = "Not signed in, or no token could be obtained")
    )
)]
pub async fn token_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AccessTokenResponse>, Rejection> {
    let session = current_session(&state, &headers)
        .await
        .filter(|s| !s.is_expired())
        .ok_or(PortError::Unauthorized)?;

    let token = match session.tokens.token() {
        Some(token) => token,
        None => session
            .tokens
            .refresh()
            .await
            .token()
            .cloned()
            .ok_or(PortError::Unauthorized)?,
    };

    Ok(Json(AccessTokenResponse {
        access_token: token.as_str().to_string(),
    }))
}
