//! services/portal/src/web/session.rs
//!
//! Browser sessions and the per-user state hanging off them: the token store,
//! the Turing API client, the query cache and the optimistic dataset state.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast::error::RecvError, Mutex, RwLock};
use tracing::{info, warn};
use turing_portal_core::{
    interceptor::{ExpiryInterceptor, SessionExpired},
    mutations::DatasetMutations,
    query::{QueryCache, DEFAULT_RETRY_LIMIT},
    token_store::TokenStore,
};
use uuid::Uuid;

use crate::adapters::{logto::SessionTokenSource, turing::TuringApiAdapter};
use crate::web::state::AppState;

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "portal_session";

const SESSION_TTL_DAYS: i64 = 30;
const SIGN_IN_TTL_MINUTES: i64 = 10;

//=========================================================================================
// PortalSession (One Signed-In Browser)
//=========================================================================================

pub struct PortalSession {
    pub id: String,
    /// Userinfo claims captured at sign-in.
    pub claims: serde_json::Value,
    pub id_token: Option<String>,
    pub tokens: Arc<TokenStore>,
    pub api: TuringApiAdapter,
    pub queries: QueryCache,
    pub datasets: DatasetMutations,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    expired: AtomicBool,
}

impl PortalSession {
    /// Builds the session for a user who just completed the code exchange and
    /// performs the first token fetch.
    pub async fn establish(
        app_state: &AppState,
        refresh_token: String,
        id_token: Option<String>,
        claims: serde_json::Value,
    ) -> Arc<Self> {
        let config = &app_state.config;

        let source = Arc::new(SessionTokenSource::new(app_state.logto.clone(), refresh_token));
        let tokens = Arc::new(TokenStore::new(source, config.logto.api_resource.clone()));

        let interceptor = Arc::new(ExpiryInterceptor::with_delay(
            app_state.transport.clone(),
            config.expiry_redirect_delay,
        ));
        let expiry_events = interceptor.subscribe();

        let api = TuringApiAdapter::new(interceptor, config.turing_api.clone(), tokens.clone())
            .with_chunk_size(config.upload_chunk_size);

        let now = Utc::now();
        let session = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            claims,
            id_token,
            tokens,
            api,
            queries: QueryCache::new(config.query_stale_after, DEFAULT_RETRY_LIMIT),
            datasets: DatasetMutations::new(),
            created_at: now,
            expires_at: now + Duration::days(SESSION_TTL_DAYS),
            expired: AtomicBool::new(false),
        });

        tokio::spawn(watch_for_expiry(Arc::downgrade(&session), expiry_events));
        session.tokens.set_authenticated(true).await;
        session
    }

    /// Set once the backend reported the token as expired; the next request
    /// through the middleware is sent to sign out.
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst) || Utc::now() >= self.expires_at
    }

    pub fn mark_expired(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }
}

/// Listens to the session's interceptor until the session goes away.
async fn watch_for_expiry(
    session: Weak<PortalSession>,
    mut events: tokio::sync::broadcast::Receiver<SessionExpired>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(session) = session.upgrade() else {
                    return;
                };
                warn!(
                    "Session {} flagged expired by response from {}",
                    session.id, event.url
                );
                session.mark_expired();
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return,
        }
    }
}

//=========================================================================================
// SessionStore
//=========================================================================================

/// A sign-in that has been sent to the identity provider and not yet returned.
#[derive(Debug, Clone)]
pub struct PendingSignIn {
    pub return_to: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<PortalSession>>>,
    pending: Mutex<HashMap<String, PendingSignIn>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new session, dropping any that have expired since.
    pub async fn insert(&self, session: Arc<PortalSession>) {
        info!("Session {} created", session.id);
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, existing| {
            if existing.is_expired() {
                existing.tokens.close();
                info!("Session {} evicted", existing.id);
                return false;
            }
            true
        });
        sessions.insert(session.id.clone(), session);
    }

    /// Looks a session up. An expired session is evicted but still returned
    /// this once, so the caller can send the browser to sign out.
    pub async fn get(&self, session_id: &str) -> Option<Arc<PortalSession>> {
        let session = self.sessions.read().await.get(session_id).cloned()?;
        if session.is_expired() {
            self.remove(session_id).await;
        }
        Some(session)
    }

    /// Removes the session and tears down its token store.
    pub async fn remove(&self, session_id: &str) -> Option<Arc<PortalSession>> {
        let removed = self.sessions.write().await.remove(session_id);
        if let Some(session) = &removed {
            session.tokens.close();
            info!("Session {} removed", session.id);
        }
        removed
    }

    /// Remembers an outgoing sign-in and returns its `state` value.
    pub async fn begin_sign_in(&self, return_to: String) -> String {
        let state = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut pending = self.pending.lock().await;
        pending.retain(|_, p| now - p.started_at < Duration::minutes(SIGN_IN_TTL_MINUTES));
        pending.insert(
            state.clone(),
            PendingSignIn {
                return_to,
                started_at: now,
            },
        );
        state
    }

    /// Consumes a pending sign-in. Unknown or stale states yield `None`.
    pub async fn finish_sign_in(&self, state: &str) -> Option<PendingSignIn> {
        let pending = self.pending.lock().await.remove(state)?;
        if Utc::now() - pending.started_at >= Duration::minutes(SIGN_IN_TTL_MINUTES) {
            return None;
        }
        Some(pending)
    }
}

//=========================================================================================
// Cookie Helpers
//=========================================================================================

/// Extracts the session id from a `Cookie` header value.
pub fn session_id_from_cookie(cookie_header: &str) -> Option<&str> {
    cookie_header.split(';').find_map(|c| {
        let c = c.trim();
        c.strip_prefix(SESSION_COOKIE)
            .and_then(|rest| rest.strip_prefix('='))
            .filter(|v| !v.is_empty())
    })
}

/// `secure` adds the `Secure` attribute; browsers drop such cookies over plain HTTP.
pub fn session_cookie(session: &PortalSession, secure: bool) -> String {
    format!(
        "{}={}; HttpOnly;{} SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE,
        session.id,
        if secure { " Secure;" } else { "" },
        Duration::days(SESSION_TTL_DAYS).num_seconds()
    )
}

pub fn cleared_session_cookie() -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", SESSION_COOKIE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_session_cookie_among_others() {
        assert_eq!(
            session_id_from_cookie("theme=dark; portal_session=abc-123; other=1"),
            Some("abc-123")
        );
        assert_eq!(session_id_from_cookie("portal_session_old=zzz"), None);
        assert_eq!(session_id_from_cookie("portal_session="), None);
    }

    #[tokio::test]
    async fn sign_in_state_is_single_use() {
        let store = SessionStore::new();
        let state = store.begin_sign_in("/projects".into()).await;

        let pending = store.finish_sign_in(&state).await.unwrap();
        assert_eq!(pending.return_to, "/projects");
        assert!(store.finish_sign_in(&state).await.is_none());
        assert!(store.finish_sign_in("made-up").await.is_none());
    }
}
