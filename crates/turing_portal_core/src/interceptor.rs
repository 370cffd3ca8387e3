//! crates/turing_portal_core/src/interceptor.rs
//!
//! A transport decorator that passively watches every response for the token
//! expiry signature and announces it, without ever touching the response.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

use crate::auth_fetch::is_token_expiry;
use crate::http::{ApiRequest, ApiResponse};
use crate::ports::{HttpTransport, PortResult, SIGN_OUT_PATH};

/// How long the interceptor waits before announcing an expiry.
pub const DEFAULT_EXPIRY_DELAY: Duration = Duration::from_millis(100);

/// Published when a response carried the expiry signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExpired {
    pub url: String,
    pub redirect_to: String,
}

/// Wraps a transport; responses are forwarded untouched while expiry checks
/// run in a spawned task.
pub struct ExpiryInterceptor {
    inner: Arc<dyn HttpTransport>,
    events: broadcast::Sender<SessionExpired>,
    delay: Duration,
}

impl ExpiryInterceptor {
    pub fn new(inner: Arc<dyn HttpTransport>) -> Self {
        Self::with_delay(inner, DEFAULT_EXPIRY_DELAY)
    }

    pub fn with_delay(inner: Arc<dyn HttpTransport>, delay: Duration) -> Self {
        let (events, _) = broadcast::channel(16);
        Self { inner, events, delay }
    }

    /// Receives every expiry announcement made after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionExpired> {
        self.events.subscribe()
    }
}

#[async_trait]
impl HttpTransport for ExpiryInterceptor {
    async fn send(&self, request: ApiRequest) -> PortResult<ApiResponse> {
        let url = request.url.clone();
        let response = self.inner.send(request).await?;

        // Fire and forget: the caller gets its response immediately.
        let observed = response.clone();
        let events = self.events.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            if !is_token_expiry(&observed) {
                return;
            }
            warn!("Expired token detected on response from {}", url);
            tokio::time::sleep(delay).await;
            // No subscribers just means nobody is listening any more.
            let _ = events.send(SessionExpired {
                url,
                redirect_to: SIGN_OUT_PATH.to_string(),
            });
        });

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_fetch::testing::{reply, ScriptedTransport};
    use http::StatusCode;

    #[tokio::test]
    async fn forwards_response_and_announces_expiry() {
        let inner = Arc::new(ScriptedTransport::new(vec![reply(401, "Signature has expired")]));
        let interceptor = ExpiryInterceptor::with_delay(inner.clone(), Duration::from_millis(5));
        let mut events = interceptor.subscribe();

        let response = interceptor
            .send(ApiRequest::get("https://api.test/projects"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.text(), "Signature has expired");

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("expiry announced")
            .unwrap();
        assert_eq!(event.url, "https://api.test/projects");
        assert_eq!(event.redirect_to, SIGN_OUT_PATH);
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn stays_quiet_for_other_responses() {
        let inner = Arc::new(ScriptedTransport::new(vec![
            reply(200, "Unauthorized"),
            reply(401, "Invalid credentials"),
        ]));
        let interceptor = ExpiryInterceptor::with_delay(inner, Duration::from_millis(1));
        let mut events = interceptor.subscribe();

        interceptor.send(ApiRequest::get("https://api.test/a")).await.unwrap();
        interceptor.send(ApiRequest::get("https://api.test/b")).await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn stacked_interceptors_each_announce() {
        let inner = Arc::new(ScriptedTransport::new(vec![reply(401, "token expired")]));
        let first = Arc::new(ExpiryInterceptor::with_delay(inner, Duration::from_millis(1)));
        let second = ExpiryInterceptor::with_delay(first.clone(), Duration::from_millis(1));
        let mut outer_events = second.subscribe();
        let mut inner_events = first.subscribe();

        second.send(ApiRequest::get("https://api.test/x")).await.unwrap();

        for events in [&mut outer_events, &mut inner_events] {
            tokio::time::timeout(Duration::from_secs(1), events.recv())
                .await
                .expect("announced")
                .unwrap();
        }
    }
}
