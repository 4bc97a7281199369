//! Remote source of truth for part assets and vectors
//!
//! # Protocol
//! - `GET {base}/assets/{part}/{color}` → raw bytes
//! - `GET {base}/vectors/{part}/{color}` → [`PartVectors`] JSON
//! - `GET {base}/version` → [`VersionRecord`] JSON
//! - `GET {base}/changes?since=&offset=&limit=` → [`ChangePage`] JSON
//! - `DELETE {base}/cache?prefix=` → purge
//!
//! 404 maps to [`RemoteError::NotFound`]. Requests are never retried here;
//! the hybrid cache degrades failures to a miss.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::{PartVectors, VersionRecord};
use crate::types::PartKey;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

/// One changed `(part, color)` since a given version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedPart {
    pub part_id: String,
    pub color_id: i32,
    /// Version at which this part last changed
    pub version: String,
    /// Whether a rendered asset should exist for this part
    #[serde(default)]
    pub has_asset: bool,
    /// Hex SHA-256 of the asset bytes, when published
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ChangedPart {
    pub fn key(&self) -> PartKey {
        PartKey::new(self.part_id.clone(), self.color_id)
    }
}

/// One page of the remote change feed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangePage {
    pub changes: Vec<ChangedPart>,
    /// Offset of the next page; `None` on the last page
    #[serde(default)]
    pub next_offset: Option<u64>,
}

#[async_trait]
pub trait RemoteRepository: Send + Sync {
    async fn fetch_asset(&self, key: &PartKey) -> Result<Vec<u8>, RemoteError>;

    async fn fetch_vectors(&self, key: &PartKey) -> Result<PartVectors, RemoteError>;

    async fn version(&self) -> Result<VersionRecord, RemoteError>;

    /// Parts changed after version `since` (all parts when `None`)
    async fn changes(
        &self,
        since: Option<&str>,
        offset: u64,
        limit: usize,
    ) -> Result<ChangePage, RemoteError>;

    /// Drop remote-side cached renders under `prefix`
    ///
    /// Repositories without a purge facility accept and ignore the call.
    async fn purge(&self, prefix: &str) -> Result<(), RemoteError> {
        let _ = prefix;
        Ok(())
    }
}

/// reqwest-backed remote repository
#[derive(Debug, Clone)]
pub struct HttpRemoteRepository {
    client: Client,
    base_url: String,
}

impl HttpRemoteRepository {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(format!("Failed to create HTTP client: {}", e)))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response, RemoteError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(what.to_string())
            } else {
                RemoteError::Network(format!("{}: {}", what, e))
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, what: &str) -> Result<T, RemoteError> {
        let response = self.send(self.client.get(url), what).await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Parse(format!("{}: {}", what, e)))
    }
}

#[async_trait]
impl RemoteRepository for HttpRemoteRepository {
    async fn fetch_asset(&self, key: &PartKey) -> Result<Vec<u8>, RemoteError> {
        let url = format!("{}/assets/{}/{}", self.base_url, key.part_id, key.color_id);
        debug!(key = %key, "Fetching remote asset");
        let what = format!("asset {}", key);
        let response = self.send(self.client.get(&url), &what).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Network(format!("{}: {}", what, e)))?;
        Ok(bytes.to_vec())
    }

    async fn fetch_vectors(&self, key: &PartKey) -> Result<PartVectors, RemoteError> {
        let url = format!("{}/vectors/{}/{}", self.base_url, key.part_id, key.color_id);
        debug!(key = %key, "Fetching remote vectors");
        self.get_json(&url, &format!("vectors {}", key)).await
    }

    async fn version(&self) -> Result<VersionRecord, RemoteError> {
        let url = format!("{}/version", self.base_url);
        self.get_json(&url, "version").await
    }

    async fn changes(
        &self,
        since: Option<&str>,
        offset: u64,
        limit: usize,
    ) -> Result<ChangePage, RemoteError> {
        let url = format!("{}/changes", self.base_url);
        let mut query: Vec<(&str, String)> = vec![
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }
        let response = self
            .send(self.client.get(&url).query(&query), "changes")
            .await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Parse(format!("changes: {}", e)))
    }

    async fn purge(&self, prefix: &str) -> Result<(), RemoteError> {
        let url = format!("{}/cache", self.base_url);
        debug!(prefix = %prefix, "Purging remote cache");
        self.send(self.client.delete(&url).query(&[("prefix", prefix)]), "purge")
            .await?;
        Ok(())
    }
}
