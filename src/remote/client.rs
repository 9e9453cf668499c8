//! Signed HTTP client for the peer's agent endpoints.

use std::path::Path;

use reqwest::{Client, Method, Response, header::CONTENT_TYPE};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use url::Url;

use super::TransportError;
use super::models::{
    ExportRequest, ExportResponse, ImportRequest, MaintenanceRequest, MediaExportRequest,
    MediaExportResponse, OperationResponse, StatusResponse, SwapRequest,
};
use crate::config::RemoteSettings;
use crate::signing::{SIGNATURE_HEADER, TOKEN_HEADER, sign};

/// Longest remote error body carried into a message.
const MAX_ERROR_BODY: usize = 512;

/// Client for one remote agent.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: Client,
    base_url: Url,
    token: String,
    hmac_secret: String,
}

impl RemoteClient {
    /// Build a client with the configured timeout.
    pub fn new(settings: RemoteSettings) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("sitesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| TransportError::Client(err.to_string()))?;

        Ok(Self {
            http,
            base_url: settings.base_url,
            token: settings.token,
            hmac_secret: settings.hmac_secret,
        })
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, TransportError> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| TransportError::Url(err.to_string()))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// Send a signed request. Non-2xx replies become [`TransportError::Status`].
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Vec<u8>,
        content_type: Option<&'static str>,
    ) -> Result<Response, TransportError> {
        let url = self.url(path, query)?;
        let signature = sign(&self.hmac_secret, method.as_str(), path, &body);

        let mut request = self
            .http
            .request(method.clone(), url)
            .header(TOKEN_HEADER, &self.token)
            .header(SIGNATURE_HEADER, signature);
        if let Some(content_type) = content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        tracing::debug!(method = %method, path = %path, "Calling remote agent");
        let response = request
            .send()
            .await
            .map_err(|err| TransportError::from_reqwest(path, err))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            path: path.to_string(),
            status: status.as_u16(),
            message: error_message(&text),
        })
    }

    async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, TransportError> {
        let text = response
            .text()
            .await
            .map_err(|err| TransportError::from_reqwest(path, err))?;
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|err| TransportError::Malformed {
                path: path.to_string(),
                message: err.to_string(),
            })?;

        if value.get("success").and_then(serde_json::Value::as_bool) == Some(false) {
            return Err(TransportError::Rejected {
                path: path.to_string(),
                message: value
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("remote operation failed")
                    .to_string(),
            });
        }

        serde_json::from_value(value).map_err(|err| TransportError::Malformed {
            path: path.to_string(),
            message: err.to_string(),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, TransportError> {
        let response = self.send(Method::GET, path, query, Vec::new(), None).await?;
        Self::decode(path, response).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, TransportError> {
        let payload = serde_json::to_vec(body).map_err(|err| TransportError::Malformed {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        let response = self
            .send(Method::POST, path, &[], payload, Some("application/json"))
            .await?;
        Self::decode(path, response).await
    }

    /// Stream a GET response body into `dest`. Returns the byte count.
    pub async fn download_to(
        &self,
        path: &str,
        query: &[(&str, String)],
        dest: &Path,
    ) -> Result<u64, TransportError> {
        let mut response = self.send(Method::GET, path, query, Vec::new(), None).await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| TransportError::io(dest, err))?;
        }
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|err| TransportError::io(dest, err))?;

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| TransportError::from_reqwest(path, err))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|err| TransportError::io(dest, err))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|err| TransportError::io(dest, err))?;

        metrics::counter!("sitesync_remote_bytes_downloaded_total").increment(written);
        Ok(written)
    }

    /// POST raw bytes and decode the JSON reply.
    pub async fn post_bytes<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: Vec<u8>,
    ) -> Result<T, TransportError> {
        let size = body.len() as u64;
        let response = self
            .send(Method::POST, path, query, body, Some("application/octet-stream"))
            .await?;
        metrics::counter!("sitesync_remote_bytes_uploaded_total").increment(size);
        Self::decode(path, response).await
    }

    pub async fn status(&self) -> Result<StatusResponse, TransportError> {
        self.get_json("/status", &[]).await
    }

    pub async fn export_database(
        &self,
        request: &ExportRequest,
    ) -> Result<ExportResponse, TransportError> {
        self.post_json("/replication/export", request).await
    }

    pub async fn download_database(&self, token: &str, dest: &Path) -> Result<u64, TransportError> {
        self.download_to("/replication/download", &[("token", token.to_string())], dest)
            .await
    }

    pub async fn import_database(
        &self,
        request: &ImportRequest,
    ) -> Result<OperationResponse, TransportError> {
        self.post_json("/replication/import", request).await
    }

    pub async fn export_media(&self, max_mb: u32) -> Result<MediaExportResponse, TransportError> {
        self.post_json("/media/export", &MediaExportRequest { max_mb })
            .await
    }

    pub async fn download_media(
        &self,
        token: &str,
        part: u32,
        dest: &Path,
    ) -> Result<u64, TransportError> {
        self.download_to(
            "/media/download",
            &[("token", token.to_string()), ("part", part.to_string())],
            dest,
        )
        .await
    }

    pub async fn import_media(
        &self,
        token: &str,
        part: u32,
        suffix: &str,
        archive: Vec<u8>,
    ) -> Result<OperationResponse, TransportError> {
        self.post_bytes(
            "/media/import",
            &[
                ("token", token.to_string()),
                ("part", part.to_string()),
                ("suffix", suffix.to_string()),
            ],
            archive,
        )
        .await
    }

    pub async fn set_maintenance(&self, enabled: bool) -> Result<OperationResponse, TransportError> {
        self.post_json("/maintenance", &MaintenanceRequest { enabled })
            .await
    }

    pub async fn swap(&self, request: &SwapRequest) -> Result<OperationResponse, TransportError> {
        self.post_json("/replication/swap", request).await
    }

    pub async fn cleanup(&self, request: &SwapRequest) -> Result<OperationResponse, TransportError> {
        self.post_json("/replication/cleanup", request).await
    }
}

/// Pull the `message` out of a JSON error body, else use the (truncated) text.
fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    if let Some(message) = parsed
        .as_ref()
        .and_then(|value| value.get("message"))
        .and_then(serde_json::Value::as_str)
    {
        return message.to_string();
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}
