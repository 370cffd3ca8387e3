//! crates/turing_portal_core/src/http.rs
//!
//! Buffered request/response values exchanged with an `HttpTransport`.
//! Bodies are held in memory, so inspecting a response never consumes it.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::ports::{PortError, PortResult};

/// An outbound HTTP request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }

    /// Adds or replaces a header.
    pub fn header(mut self, name: &'static str, value: impl AsRef<str>) -> PortResult<Self> {
        let value = HeaderValue::from_str(value.as_ref())
            .map_err(|e| PortError::Unexpected(format!("Invalid value for header {}: {}", name, e)))?;
        self.headers.insert(HeaderName::from_static(name), value);
        Ok(self)
    }

    pub fn json<T: Serialize + ?Sized>(mut self, payload: &T) -> PortResult<Self> {
        let body = serde_json::to_vec(payload).map_err(|e| PortError::Unexpected(e.to_string()))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    pub fn body(mut self, content_type: &'static str, body: Bytes) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        self.body = Some(body);
        self
    }

    /// Returns a copy carrying `Authorization: Bearer <token>`.
    pub fn with_bearer(&self, token: &str) -> PortResult<Self> {
        let mut request = self.clone();
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| PortError::Unexpected("Bearer token is not a valid header value".to_string()))?;
        request.headers.insert(AUTHORIZATION, value);
        Ok(request)
    }
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> PortResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| PortError::Unexpected(format!("Failed to parse response body: {}", e)))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Turns any non-2xx status into a `PortError::Http` naming the status.
    pub fn error_for_status(self) -> PortResult<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let body = self.text();
        let message = if body.trim().is_empty() {
            format!("Request failed with status {}", self.status.as_u16())
        } else {
            body
        };
        Err(PortError::Http {
            status: self.status.as_u16(),
            message,
        })
    }
}
