//! services/portal/src/adapters/http.rs
//!
//! This module contains the outbound HTTP adapter. It implements the
//! `HttpTransport` port from the `core` crate on top of `reqwest`.

use async_trait::async_trait;
use std::time::Duration;
use turing_portal_core::{
    http::{ApiRequest, ApiResponse},
    ports::{HttpTransport, PortError, PortResult},
};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that sends requests with a shared `reqwest` connection pool.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a new `ReqwestTransport` with its own client.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(format!("turing-portal/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

//=========================================================================================
// `HttpTransport` Trait Implementation
//=========================================================================================

#[async_trait]
impl HttpTransport for ReqwestTransport {
    /// Sends the request and buffers the whole response body.
    async fn send(&self, request: ApiRequest) -> PortResult<ApiResponse> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;

        Ok(ApiResponse { status, headers, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn buffers_status_headers_and_body() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/echo")
                    .header("authorization", "Bearer tok")
                    .header("content-type", "application/json");
                then.status(201)
                    .header("location", "/echo/1")
                    .body("created");
            })
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let request = ApiRequest::post(server.url("/echo"))
            .json(&serde_json::json!({ "a": 1 }))
            .unwrap()
            .with_bearer("tok")
            .unwrap();

        let response = transport.send(request).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.status.as_u16(), 201);
        assert_eq!(response.header("location"), Some("/echo/1"));
        assert_eq!(response.text(), "created");
    }

    #[tokio::test]
    async fn error_statuses_are_responses_not_failures() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing");
                then.status(404).body("nope");
            })
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let response = transport
            .send(ApiRequest::get(server.url("/missing")))
            .await
            .unwrap();
        assert_eq!(response.status.as_u16(), 404);
    }

    #[tokio::test]
    async fn connection_failures_are_transport_errors() {
        let transport = ReqwestTransport::new(Duration::from_secs(1)).unwrap();
        let err = transport
            .send(ApiRequest::get("http://127.0.0.1:9/unreachable"))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Transport(_)));
    }
}
