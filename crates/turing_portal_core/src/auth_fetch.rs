//! crates/turing_portal_core/src/auth_fetch.rs
//!
//! Bearer-authenticated requests with a single refresh-and-retry on token expiry.
//!
//! Expiry is recognised heuristically: a 401 whose body contains one of
//! `EXPIRY_PHRASES`. A 401 without one of those phrases is handed back untouched
//! so the caller can treat it as an ordinary auth failure.

use http::StatusCode;
use tracing::{debug, warn};

use crate::http::{ApiRequest, ApiResponse};
use crate::ports::{HttpTransport, PortError, PortResult, TokenRefresher};

/// Substrings in a 401 body that mean the bearer token has expired.
pub const EXPIRY_PHRASES: [&str; 4] = [
    "Signature has expired",
    "token expired",
    "Invalid token",
    "Unauthorized",
];

/// True when `body` carries one of the expiry phrases.
pub fn is_expiry_message(body: &str) -> bool {
    EXPIRY_PHRASES.iter().any(|phrase| body.contains(phrase))
}

/// True when `response` is a 401 signalling an expired token.
pub fn is_token_expiry(response: &ApiResponse) -> bool {
    response.status == StatusCode::UNAUTHORIZED && is_expiry_message(&response.text())
}

/// Sends `request` with `Authorization: Bearer <token>`.
///
/// On an expiry 401 the refresher is consulted once and the request retried
/// once with the new token. When that is impossible, or the retry is rejected
/// again, the call fails with `PortError::SessionExpired`; the caller owns the
/// redirect to the sign-out route. Every other response is returned unchanged.
pub async fn auth_fetch(
    transport: &dyn HttpTransport,
    request: ApiRequest,
    token: &str,
    refresher: Option<&dyn TokenRefresher>,
) -> PortResult<ApiResponse> {
    let response = transport.send(request.with_bearer(token)?).await?;

    if response.status != StatusCode::UNAUTHORIZED {
        return Ok(response);
    }

    if !is_expiry_message(&response.text()) {
        debug!("401 from {} without an expiry signature", request.url);
        return Ok(response);
    }

    let Some(refresher) = refresher else {
        warn!("Token expired for {} and no refresher is available", request.url);
        return Err(PortError::session_expired());
    };

    let new_token = match refresher.refresh_token().await {
        Ok(Some(new_token)) if !new_token.is_empty() => new_token,
        Ok(_) => {
            warn!("Token refresh yielded no token");
            return Err(PortError::session_expired());
        }
        Err(e) => {
            warn!("Token refresh failed: {}", e);
            return Err(PortError::session_expired());
        }
    };

    let retried = transport.send(request.with_bearer(&new_token)?).await?;
    if retried.status == StatusCode::UNAUTHORIZED {
        warn!("Request to {} rejected again after token refresh", request.url);
        return Err(PortError::session_expired());
    }

    Ok(retried)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport and refresher shared by the core's tests.

    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replies with queued responses in order and records each request.
    #[derive(Default)]
    pub struct ScriptedTransport {
        replies: Mutex<VecDeque<PortResult<ApiResponse>>>,
        pub sent: Mutex<Vec<ApiRequest>>,
    }

    impl ScriptedTransport {
        pub fn new(replies: Vec<PortResult<ApiResponse>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                sent: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        pub fn authorization(&self, index: usize) -> String {
            self.sent.lock().unwrap()[index]
                .headers
                .get(http::header::AUTHORIZATION)
                .map(|v| v.to_str().unwrap().to_string())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: ApiRequest) -> PortResult<ApiResponse> {
            self.sent.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(PortError::Unexpected("no scripted reply left".into())))
        }
    }

    pub struct FixedRefresher {
        pub reply: PortResult<Option<String>>,
        pub calls: AtomicUsize,
    }

    impl FixedRefresher {
        pub fn new(reply: PortResult<Option<String>>) -> Self {
            Self { reply, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl TokenRefresher for FixedRefresher {
        async fn refresh_token(&self) -> PortResult<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    pub fn reply(status: u16, body: &str) -> PortResult<ApiResponse> {
        Ok(ApiResponse::new(
            StatusCode::from_u16(status).unwrap(),
            body.to_string(),
        ))
    }
}
