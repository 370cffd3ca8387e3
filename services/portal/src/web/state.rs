//! services/portal/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::adapters::{
    http::ReqwestTransport,
    logto::{LogtoAdapter, M2mTokenSource},
};
use crate::config::Config;
use crate::error::ApiError;
use crate::web::session::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use turing_portal_core::{ports::HttpTransport, token_store::TokenStore};

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(60);

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub logto: Arc<LogtoAdapter>,
    /// Connection pool shared by every session's Turing API client.
    pub transport: Arc<dyn HttpTransport>,
    pub sessions: Arc<SessionStore>,
    /// Client-credentials token store, present when M2M credentials are configured.
    pub m2m_tokens: Option<Arc<TokenStore>>,
}

impl AppState {
    /// Wires the adapters for the given configuration.
    pub fn from_config(config: Config) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("turing-portal/{}", env!("CARGO_PKG_VERSION")))
            .timeout(OUTBOUND_TIMEOUT)
            .build()?;

        let logto = Arc::new(LogtoAdapter::new(
            client.clone(),
            config.logto.clone(),
            &config.base_url,
        ));

        let m2m_tokens = logto.m2m_credentials().cloned().map(|credentials| {
            let source = Arc::new(M2mTokenSource::new(logto.clone(), credentials));
            Arc::new(TokenStore::new(source, config.logto.api_resource.clone()))
        });

        Ok(Self {
            config: Arc::new(config),
            logto,
            transport: Arc::new(ReqwestTransport::with_client(client)),
            sessions: Arc::new(SessionStore::new()),
            m2m_tokens,
        })
    }

    /// Whether cookies should carry the `Secure` attribute.
    pub fn secure_cookies(&self) -> bool {
        self.config.base_url.starts_with("https://")
    }
}
