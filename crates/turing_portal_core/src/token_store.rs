//! crates/turing_portal_core/src/token_store.rs
//!
//! Holds the short-lived API access token for one signed-in user.
//!
//! The store is an explicit observable: `subscribe()` hands out a watch receiver
//! (dropping it unsubscribes) and `close()` tears the store down. Tokens are
//! fetched reactively only, on mount, on sign-in, and when a caller refreshes
//! after a 401. There is no background timer.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::AccessToken;
use crate::ports::{AccessTokenSource, PortError, PortResult, TokenRefresher};

/// Lifecycle of the token store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenState {
    Uninitialized,
    Checking,
    HasToken(AccessToken),
    NoToken,
    Error(String),
}

impl TokenState {
    pub fn token(&self) -> Option<&AccessToken> {
        match self {
            TokenState::HasToken(token) => Some(token),
            _ => None,
        }
    }

    /// Short name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            TokenState::Uninitialized => "uninitialized",
            TokenState::Checking => "checking",
            TokenState::HasToken(_) => "has_token",
            TokenState::NoToken => "no_token",
            TokenState::Error(_) => "error",
        }
    }
}

pub struct TokenStore {
    source: Arc<dyn AccessTokenSource>,
    resource: String,
    state: watch::Sender<TokenState>,
    closed: CancellationToken,
}

impl TokenStore {
    /// Creates a store that requests tokens scoped to `resource`.
    pub fn new(source: Arc<dyn AccessTokenSource>, resource: impl Into<String>) -> Self {
        let (state, _) = watch::channel(TokenState::Uninitialized);
        Self {
            source,
            resource: resource.into(),
            state,
            closed: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> TokenState {
        self.state.borrow().clone()
    }

    /// The current token, if the store holds one.
    pub fn token(&self) -> Option<AccessToken> {
        self.state.borrow().token().cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<TokenState> {
        self.state.subscribe()
    }

    /// First fetch when the store comes to life.
    pub async fn mount(&self) -> TokenState {
        self.fetch().await
    }

    /// Follows the identity provider's authenticated flag.
    pub async fn set_authenticated(&self, authenticated: bool) -> TokenState {
        if authenticated {
            self.fetch().await
        } else {
            self.publish(TokenState::NoToken);
            TokenState::NoToken
        }
    }

    /// Re-runs the fetch and replaces the state.
    pub async fn refresh(&self) -> TokenState {
        self.fetch().await
    }

    /// Explicit teardown. Later fetches fail and leave the state alone.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn fetch(&self) -> TokenState {
        if self.is_closed() {
            return TokenState::Error("token store is closed".to_string());
        }
        self.publish(TokenState::Checking);

        let next = tokio::select! {
            _ = self.closed.cancelled() => {
                return TokenState::Error("token store is closed".to_string());
            }
            result = self.source.fetch_access_token(&self.resource) => match result {
                Ok(Some(token)) if !token.is_empty() => {
                    info!("Access token obtained for {}", self.resource);
                    TokenState::HasToken(AccessToken::new(token))
                }
                Ok(_) => {
                    warn!("Identity provider returned no access token for {}", self.resource);
                    TokenState::NoToken
                }
                Err(e) => {
                    warn!("Failed to fetch access token for {}: {}", self.resource, e);
                    TokenState::Error(e.to_string())
                }
            },
        };

        self.publish(next.clone());
        next
    }

    fn publish(&self, state: TokenState) {
        self.state.send_replace(state);
    }
}

#[async_trait]
impl TokenRefresher for TokenStore {
    async fn refresh_token(&self) -> PortResult<Option<String>> {
        match self.refresh().await {
            TokenState::HasToken(token) => Ok(Some(token.as_str().to_string())),
            TokenState::Error(message) => Err(PortError::Unexpected(message)),
            _ => Ok(None),
        }
    }
}
