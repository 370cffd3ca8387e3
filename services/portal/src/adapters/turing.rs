//! services/portal/src/adapters/turing.rs
//!
//! This module contains the adapter for the Turing API, the REST backend that
//! owns projects, datasets, activities and results. It implements the
//! `ProjectService` port from the `core` crate. Every request is bearer
//! authenticated through `auth_fetch`, with the session's token store as the
//! refresher. Dataset files are transferred with the tus resumable protocol.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use http::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use turing_portal_core::{
    auth_fetch,
    domain::{NewProject, Project, ProjectActivity, ProjectDataset, ProjectResult, ProjectUpdate},
    http::{ApiRequest, ApiResponse},
    ports::{HttpTransport, PortError, PortResult, ProjectService, TokenRefresher},
    token_store::{TokenState, TokenStore},
};

const TUS_VERSION: &str = "1.0.0";
const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A Turing API client bound to one user's token store.
#[derive(Clone)]
pub struct TuringApiAdapter {
    transport: Arc<dyn HttpTransport>,
    base_url: Option<String>,
    tokens: Arc<TokenStore>,
    chunk_size: usize,
    retry_delays: Vec<Duration>,
}

impl TuringApiAdapter {
    /// Creates a new `TuringApiAdapter`. A `None` base URL makes every call
    /// fail with `MissingConfig` before touching the network.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: Option<String>,
        tokens: Arc<TokenStore>,
    ) -> Self {
        Self {
            transport,
            base_url,
            tokens,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry_delays: vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(3),
            ],
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Delays between attempts to resume an interrupted upload.
    pub fn with_retry_delays(mut self, retry_delays: Vec<Duration>) -> Self {
        self.retry_delays = retry_delays;
        self
    }

    fn base(&self) -> PortResult<&str> {
        self.base_url
            .as_deref()
            .ok_or_else(|| PortError::MissingConfig("TURING_API is not configured".to_string()))
    }

    /// The current bearer token, fetching one first if the store has none yet.
    async fn bearer(&self) -> PortResult<String> {
        if let Some(token) = self.tokens.token() {
            return Ok(token.as_str().to_string());
        }
        match self.tokens.refresh().await {
            TokenState::HasToken(token) => Ok(token.as_str().to_string()),
            _ => Err(PortError::Unauthorized),
        }
    }

    async fn send(&self, request: ApiRequest) -> PortResult<ApiResponse> {
        let token = self.bearer().await?;
        debug!("{} {}", request.method, request.url);
        let refresher: &dyn TokenRefresher = &*self.tokens;
        auth_fetch(&*self.transport, request, &token, Some(refresher)).await
    }

    /// Sends and maps non-2xx statuses onto `PortError`.
    async fn send_ok(&self, request: ApiRequest) -> PortResult<ApiResponse> {
        let response = self.send(request).await?;
        match response.status {
            StatusCode::UNAUTHORIZED => Err(PortError::Unauthorized),
            StatusCode::NOT_FOUND => Err(PortError::NotFound(response.text())),
            _ => response.error_for_status(),
        }
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str, key: &str) -> PortResult<Vec<T>> {
        let url = format!("{}{}", self.base()?, path);
        let response = self.send_ok(ApiRequest::get(url)).await?;
        list_payload(response.json()?, key)
    }

    //-------------------------------------------------------------------------------------
    // tus helpers
    //-------------------------------------------------------------------------------------

    async fn server_offset(&self, upload_url: &str) -> PortResult<usize> {
        let request = ApiRequest::head(upload_url).header("tus-resumable", TUS_VERSION)?;
        let response = self.send_ok(request).await?;
        parse_offset(&response)
    }

    /// Waits out the next retry delay and re-reads the offset. A failed `HEAD`
    /// spends the same retry budget as a failed chunk.
    async fn resume_offset(
        &self,
        upload_url: &str,
        offset: usize,
        mut error: PortError,
        failures: &mut usize,
    ) -> PortResult<usize> {
        loop {
            let Some(delay) = self.retry_delays.get(*failures).copied() else {
                return Err(error);
            };
            *failures += 1;
            warn!(
                "Upload interrupted at offset {} ({}), resuming in {:?}",
                offset, error, delay
            );
            tokio::time::sleep(delay).await;
            match self.server_offset(upload_url).await {
                Ok(resumed) => return Ok(resumed),
                Err(e) if is_resumable(&e) => error = e,
                Err(e) => return Err(e),
            }
        }
    }
}

//=========================================================================================
// `ProjectService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ProjectService for TuringApiAdapter {
    async fn list_projects(&self) -> PortResult<Vec<Project>> {
        self.get_list("/projects", "projects").await
    }

    async fn create_project(&self, project: &NewProject) -> PortResult<Project> {
        let url = format!("{}/projects", self.base()?);
        let response = self.send_ok(ApiRequest::post(url).json(project)?).await?;
        info!("Created project '{}'", project.name);
        response.json()
    }

    async fn update_project(&self, project_id: &str, update: &ProjectUpdate) -> PortResult<Project> {
        let url = format!("{}/projects/{}", self.base()?, project_id);
        let response = self.send_ok(ApiRequest::put(url).json(update)?).await?;
        response.json()
    }

    async fn delete_project(&self, project_id: &str) -> PortResult<()> {
        let url = format!("{}/projects/{}", self.base()?, project_id);
        self.send_ok(ApiRequest::delete(url)).await?;
        info!("Deleted project {}", project_id);
        Ok(())
    }

    async fn list_datasets(&self, project_id: &str) -> PortResult<Vec<ProjectDataset>> {
        self.get_list(&format!("/projects/{}/files", project_id), "files")
            .await
    }

    async fn upload_dataset(
        &self,
        project_id: &str,
        filename: &str,
        content_type: &str,
        data: Bytes,
    ) -> PortResult<()> {
        let base = self.base()?;
        let total = data.len();

        // --- 1. Create the upload ---
        let metadata = encode_metadata(&[
            ("filename", filename),
            ("filetype", content_type),
            ("projectId", project_id),
        ]);
        let create = ApiRequest::post(format!("{}/uploads/", base))
            .header("tus-resumable", TUS_VERSION)?
            .header("upload-length", total.to_string())?
            .header("upload-metadata", metadata)?;
        let created = self.send_ok(create).await?;
        let location = created.header("location").ok_or_else(|| {
            PortError::Unexpected("Upload creation response has no Location header".to_string())
        })?;
        let upload_url = resolve_location(base, location)?;
        info!("Uploading {} ({} bytes) to {}", filename, total, upload_url);

        // --- 2. Send chunks, resuming from the server's offset on failure ---
        let mut offset = 0usize;
        let mut failures = 0usize;
        while offset < total {
            let end = (offset + self.chunk_size).min(total);
            let patch = ApiRequest::patch(upload_url.clone())
                .header("tus-resumable", TUS_VERSION)?
                .header("upload-offset", offset.to_string())?
                .body("application/offset+octet-stream", data.slice(offset..end));

            match self.send_ok(patch).await {
                Ok(response) => {
                    let acknowledged = parse_offset(&response).unwrap_or(end);
                    if acknowledged <= offset {
                        return Err(PortError::Unexpected(format!(
                            "Upload made no progress at offset {}",
                            offset
                        )));
                    }
                    offset = acknowledged;
                    failures = 0;
                }
                Err(e) if is_resumable(&e) => {
                    offset = self
                        .resume_offset(&upload_url, offset, e, &mut failures)
                        .await
                        .inspect_err(|e| {
                            warn!("Giving up on upload of {} at offset {}: {}", filename, offset, e)
                        })?;
                }
                Err(e) => return Err(e),
            }
        }

        info!("Upload of {} to project {} complete", filename, project_id);
        Ok(())
    }

    async fn delete_dataset(&self, project_id: &str, dataset_id: &str) -> PortResult<()> {
        let url = format!("{}/projects/{}/files/{}", self.base()?, project_id, dataset_id);
        self.send_ok(ApiRequest::delete(url)).await?;
        Ok(())
    }

    async fn list_activities(&self, project_id: &str) -> PortResult<Vec<ProjectActivity>> {
        self.get_list(&format!("/projects/{}/activities", project_id), "activities")
            .await
    }

    async fn list_results(&self, project_id: &str) -> PortResult<Vec<ProjectResult>> {
        self.get_list(&format!("/projects/{}/results", project_id), "results")
            .await
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

/// Accepts either a bare JSON array or an object wrapping it under `key` or `data`.
fn list_payload<T: DeserializeOwned>(value: serde_json::Value, key: &str) -> PortResult<Vec<T>> {
    let items = match value {
        serde_json::Value::Array(_) => value,
        serde_json::Value::Object(mut map) => map
            .remove(key)
            .or_else(|| map.remove("data"))
            .ok_or_else(|| PortError::Unexpected(format!("Response has no '{}' list", key)))?,
        other => {
            return Err(PortError::Unexpected(format!(
                "Expected a list, got {}",
                other
            )))
        }
    };
    serde_json::from_value(items)
        .map_err(|e| PortError::Unexpected(format!("Failed to parse '{}' list: {}", key, e)))
}

/// `Upload-Metadata`: comma-separated `key base64(value)` pairs.
fn encode_metadata(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{} {}", k, BASE64.encode(v)))
        .collect::<Vec<_>>()
        .join(",")
}

fn resolve_location(base: &str, location: &str) -> PortResult<String> {
    let base = reqwest::Url::parse(base)
        .map_err(|e| PortError::MissingConfig(format!("TURING_API is not a valid URL: {}", e)))?;
    base.join(location)
        .map(String::from)
        .map_err(|e| PortError::Unexpected(format!("Invalid upload location '{}': {}", location, e)))
}

fn parse_offset(response: &ApiResponse) -> PortResult<usize> {
    response
        .header("upload-offset")
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| PortError::Unexpected("Missing or invalid Upload-Offset header".to_string()))
}

/// Chunk failures worth resuming: network trouble, server errors and offset conflicts.
fn is_resumable(error: &PortError) -> bool {
    match error {
        PortError::Transport(_) => true,
        PortError::Http { status, .. } => *status >= 500 || *status == 409 || *status == 423,
        _ => false,
    }
}
