//! services/portal/src/adapters/logto.rs
//!
//! This module contains the adapter for the Logto identity provider: the
//! authorization-code flow, refresh and client-credentials grants, userinfo and
//! end-session. It also provides the `AccessTokenSource` implementations that
//! feed the core's token store.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use turing_portal_core::ports::{AccessTokenSource, PortError, PortResult};

use crate::config::{LogtoConfig, M2mCredentials};

//=========================================================================================
// Wire Types
//=========================================================================================

/// The token endpoint's success payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// Talks to `{LOGTO_ENDPOINT}/oidc/*` on behalf of the portal application.
#[derive(Clone)]
pub struct LogtoAdapter {
    http: reqwest::Client,
    config: LogtoConfig,
    redirect_uri: String,
    post_logout_redirect_uri: String,
}

impl LogtoAdapter {
    /// Creates a new `LogtoAdapter`. `base_url` is the portal's public URL.
    pub fn new(http: reqwest::Client, config: LogtoConfig, base_url: &str) -> Self {
        Self {
            http,
            config,
            redirect_uri: format!("{}/api/logto/sign-in-callback", base_url),
            post_logout_redirect_uri: base_url.to_string(),
        }
    }

    pub fn api_resource(&self) -> &str {
        &self.config.api_resource
    }

    pub fn m2m_credentials(&self) -> Option<&M2mCredentials> {
        self.config.m2m.as_ref()
    }

    fn oidc_url(&self, path: &str) -> String {
        format!("{}/oidc/{}", self.config.endpoint, path)
    }

    /// The URL the browser is sent to in order to sign in.
    pub fn authorization_url(&self, state: &str) -> PortResult<String> {
        let url = reqwest::Url::parse_with_params(
            &self.oidc_url("auth"),
            &[
                ("client_id", self.config.app_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", self.config.scopes.as_str()),
                ("resource", self.config.api_resource.as_str()),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|e| PortError::Unexpected(format!("Invalid Logto endpoint: {}", e)))?;
        Ok(url.into())
    }

    /// Where the browser goes after the local session is dropped.
    pub fn end_session_url(&self, id_token_hint: Option<&str>) -> PortResult<String> {
        let mut params = vec![
            ("client_id", self.config.app_id.as_str()),
            ("post_logout_redirect_uri", self.post_logout_redirect_uri.as_str()),
        ];
        if let Some(hint) = id_token_hint {
            params.push(("id_token_hint", hint));
        }
        let url = reqwest::Url::parse_with_params(&self.oidc_url("session/end"), &params)
            .map_err(|e| PortError::Unexpected(format!("Invalid Logto endpoint: {}", e)))?;
        Ok(url.into())
    }

    /// Exchanges an authorization code for the user's tokens.
    pub async fn exchange_code(&self, code: &str) -> PortResult<TokenResponse> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        self.token_request(&self.config.app_id, &self.config.app_secret, &form)
            .await
    }

    /// Trades a refresh token for an access token scoped to `resource`.
    pub async fn refresh(&self, refresh_token: &str, resource: &str) -> PortResult<TokenResponse> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("resource", resource),
        ];
        self.token_request(&self.config.app_id, &self.config.app_secret, &form)
            .await
    }

    /// Machine-to-machine token exchange for `resource`.
    pub async fn client_credentials(
        &self,
        credentials: &M2mCredentials,
        resource: &str,
    ) -> PortResult<TokenResponse> {
        let form = [
            ("grant_type", "client_credentials"),
            ("resource", resource),
            ("scope", "all"),
        ];
        self.token_request(&credentials.app_id, &credentials.app_secret, &form)
            .await
    }

    /// Fetches the user's claims with an access token from the code exchange.
    pub async fn user_info(&self, access_token: &str) -> PortResult<serde_json::Value> {
        let response = self
            .http
            .get(self.oidc_url("me"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PortError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Http { status: status.as_u16(), message: body });
        }
        response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("Invalid userinfo payload: {}", e)))
    }

    async fn token_request(
        &self,
        client_id: &str,
        client_secret: &str,
        form: &[(&str, &str)],
    ) -> PortResult<TokenResponse> {
        let grant = form
            .iter()
            .find(|(k, _)| *k == "grant_type")
            .map(|(_, v)| *v)
            .unwrap_or("unknown");
        debug!("Requesting {} token from Logto", grant);

        let response = self
            .http
            .post(self.oidc_url("token"))
            .basic_auth(client_id, Some(client_secret))
            .form(form)
            .send()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_slice(&body)
                .map_err(|e| PortError::Unexpected(format!("Invalid token payload: {}", e)));
        }

        // Rejected grants (expired or revoked refresh tokens, bad codes) mean
        // the user has to sign in again.
        match serde_json::from_slice::<OAuthErrorBody>(&body) {
            Ok(err) if err.error == "invalid_grant" || status == reqwest::StatusCode::UNAUTHORIZED => {
                warn!(
                    "Logto rejected the {} grant: {}",
                    grant,
                    err.error_description.unwrap_or(err.error)
                );
                Err(PortError::Unauthorized)
            }
            Ok(err) => Err(PortError::Http {
                status: status.as_u16(),
                message: err.error_description.unwrap_or(err.error),
            }),
            Err(_) => Err(PortError::Http {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            }),
        }
    }
}

//=========================================================================================
// `AccessTokenSource` Implementations
//=========================================================================================

/// Mints API tokens for one signed-in user from their refresh token.
/// Logto rotates refresh tokens, so the latest one is kept here.
pub struct SessionTokenSource {
    logto: Arc<LogtoAdapter>,
    refresh_token: Mutex<String>,
}

impl SessionTokenSource {
    pub fn new(logto: Arc<LogtoAdapter>, refresh_token: String) -> Self {
        Self {
            logto,
            refresh_token: Mutex::new(refresh_token),
        }
    }

    pub async fn current_refresh_token(&self) -> String {
        self.refresh_token.lock().await.clone()
    }
}

#[async_trait]
impl AccessTokenSource for SessionTokenSource {
    async fn fetch_access_token(&self, resource: &str) -> PortResult<Option<String>> {
        // Held across the call so concurrent refreshes don't burn the same token.
        let mut refresh_token = self.refresh_token.lock().await;
        let tokens = self.logto.refresh(&refresh_token, resource).await?;
        if let Some(rotated) = tokens.refresh_token {
            *refresh_token = rotated;
        }
        Ok(Some(tokens.access_token).filter(|t| !t.is_empty()))
    }
}

/// Client-credentials tokens for the portal itself.
pub struct M2mTokenSource {
    logto: Arc<LogtoAdapter>,
    credentials: M2mCredentials,
}

impl M2mTokenSource {
    pub fn new(logto: Arc<LogtoAdapter>, credentials: M2mCredentials) -> Self {
        Self { logto, credentials }
    }
}

#[async_trait]
impl AccessTokenSource for M2mTokenSource {
    async fn fetch_access_token(&self, resource: &str) -> PortResult<Option<String>> {
        let tokens = self.logto.client_credentials(&self.credentials, resource).await?;
        Ok(Some(tokens.access_token).filter(|t| !t.is_empty()))
    }
}
