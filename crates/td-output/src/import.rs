// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Remote bulk-import sink.

use crate::blob::CompressedBlob;
use crate::config::OutputConfig;
use crate::errors::{ImportError, OutputError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, error};

pub const DEFAULT_ENDPOINT: &str = "api.treasuredata.com";

/// Body returned by a successful import.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ImportResult {
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub unique_id: String,
    #[serde(default)]
    pub elapsed_time: f64,
}

#[async_trait]
pub trait BulkImporter: Send + Sync {
    /// Imports `blob` into `namespace.relation`. `unique_id` lets the remote
    /// side drop a re-sent blob it already accepted.
    async fn import(
        &self,
        namespace: &str,
        relation: &str,
        format: &str,
        blob: CompressedBlob,
        unique_id: &str,
    ) -> Result<ImportResult, ImportError>;
}

/// [`BulkImporter`] backed by the `import_with_id` HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpImporter {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
}

impl HttpImporter {
    pub fn new(config: &OutputConfig) -> Result<Self, OutputError> {
        if config.api_key.trim().is_empty() {
            return Err(OutputError::InvalidConfig(
                "TD_API_KEY cannot be empty".to_string(),
            ));
        }
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connection_timeout)
            .timeout(config.write_timeout);
        if let Some(proxy) = &config.http_proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| OutputError::Construction(format!("invalid HTTP proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| OutputError::Construction(format!("failed to build HTTP client: {e}")))?;

        let mut headers = HeaderMap::new();
        let mut authorization = HeaderValue::from_str(&format!("TD1 {}", config.api_key))
            .map_err(|_| OutputError::InvalidConfig("API key is not a valid header value".into()))?;
        authorization.set_sensitive(true);
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );

        Ok(Self {
            client,
            base_url: base_url(config.endpoint.as_deref(), config.use_ssl),
            headers,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn import_url(&self, namespace: &str, relation: &str, unique_id: &str, format: &str) -> String {
        format!(
            "{}/v3/table/import_with_id/{}/{}/{}/{}",
            self.base_url, namespace, relation, unique_id, format
        )
    }
}

/// Endpoints given without a scheme get one from the TLS toggle.
fn base_url(endpoint: Option<&str>, use_ssl: bool) -> String {
    let endpoint = endpoint
        .filter(|e| !e.trim().is_empty())
        .unwrap_or(DEFAULT_ENDPOINT)
        .trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else if use_ssl {
        format!("https://{endpoint}")
    } else {
        format!("http://{endpoint}")
    }
}

#[async_trait]
impl BulkImporter for HttpImporter {
    async fn import(
        &self,
        namespace: &str,
        relation: &str,
        format: &str,
        blob: CompressedBlob,
        unique_id: &str,
    ) -> Result<ImportResult, ImportError> {
        let body = blob
            .into_bytes()
            .map_err(|e| ImportError::Payload(e.to_string()))?;
        let size = body.len();
        let url = self.import_url(namespace, relation, unique_id, format);

        let start = Instant::now();
        let resp = self
            .client
            .put(&url)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await?;
        let elapsed = start.elapsed();

        let status = resp.status();
        if status == StatusCode::OK {
            debug!(
                "Imported {} bytes into {}.{} in {} ms",
                size,
                namespace,
                relation,
                elapsed.as_millis()
            );
            let text = resp.text().await?;
            if text.trim().is_empty() {
                return Ok(ImportResult::default());
            }
            return serde_json::from_str(&text).map_err(|e| {
                ImportError::Destination(Some(status), format!("unexpected response body: {e}"))
            });
        }

        let text = resp.text().await.unwrap_or_default();
        error!(
            "{}: Failed to import into {}.{}: {:?}",
            status, namespace, relation, text
        );
        Err(ImportError::Destination(Some(status), text))
    }
}
