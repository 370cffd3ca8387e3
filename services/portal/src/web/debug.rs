//! services/portal/src/web/debug.rs
//!
//! A diagnostics endpoint for the token plumbing. It reports states and names
//! only, never token values.

use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::web::middleware::current_session;
use crate::web::state::AppState;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenDebugResponse {
    /// Names of the cookies the browser sent.
    pub cookie_names: Vec<String>,
    pub has_session: bool,
    pub session_expired: bool,
    pub session_created_at: Option<DateTime<Utc>>,
    pub token_state: Option<String>,
    #[schema(value_type = Object)]
    pub claims: serde_json::Value,
    pub turing_api_configured: bool,
    pub m2m: M2mDebug,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct M2mDebug {
    pub configured: bool,
    pub token_state: Option<String>,
}

fn cookie_names(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|c| c.split('=').next())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// GET /api/debug/token - Inspect session and token state
#[utoipa::path(
    get,
    path = "/api/debug/token",
    responses(
        (status = 200, description = "Token diagnostics", body = TokenDebugResponse)
    )
)]
pub async fn token_debug_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<TokenDebugResponse> {
    let session = current_session(&state, &headers).await;

    // Exercises the client-credentials grant on every call.
    let m2m = match &state.m2m_tokens {
        Some(tokens) => M2mDebug {
            configured: true,
            token_state: Some(tokens.refresh().await.name().to_string()),
        },
        None => M2mDebug {
            configured: false,
            token_state: None,
        },
    };

    Json(TokenDebugResponse {
        cookie_names: cookie_names(&headers),
        has_session: session.is_some(),
        session_expired: session.as_ref().is_some_and(|s| s.is_expired()),
        session_created_at: session.as_ref().map(|s| s.created_at),
        token_state: session.as_ref().map(|s| s.tokens.state().name().to_string()),
        claims: session
            .as_ref()
            .map(|s| s.claims.clone())
            .unwrap_or(serde_json::Value::Null),
        turing_api_configured: state.config.turing_api.is_some(),
        m2m,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn lists_cookie_names_without_values() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("portal_session=secret; theme=dark"),
        );
        assert_eq!(cookie_names(&headers), vec!["portal_session", "theme"]);
    }
}
