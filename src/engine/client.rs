use crate::engine::{sse, AuditService, EventStream};
use crate::error::{CatalogError, DetectionError, DownloadError, StreamError};
use crate::model::{Catalog, RunConfig};
use crate::orchestrator::DownloadRequest;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    os: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScriptsResponse {
    #[serde(default)]
    scripts: Option<Catalog>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the audit service endpoints.
#[derive(Clone)]
pub struct AuditClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl AuditClient {
    pub fn new(cfg: &RunConfig) -> Result<Self> {
        let mut base_url = Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid base URL {:?}", cfg.base_url))?;
        // `Url::join` replaces the last segment unless the path ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .user_agent(&cfg.user_agent)
            .connect_timeout(cfg.request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            timeout: cfg.request_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, name: &str) -> Result<Url, String> {
        self.base_url.join(name).map_err(|e| e.to_string())
    }

    /// `/stream_output` with `os` and one `scripts` pair per selected script.
    fn stream_url(&self, os: &str, scripts: &[String]) -> Result<Url, String> {
        let mut url = self.endpoint("stream_output")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("os", os);
            for script in scripts {
                pairs.append_pair("scripts", script);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl AuditService for AuditClient {
    async fn detect_os(&self, host: &str) -> Result<String, DetectionError> {
        let url = self.endpoint("detect_os").map_err(DetectionError::Transport)?;
        let resp = self
            .http
            .get(url)
            .query(&[("host", host)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DetectionError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| DetectionError::Transport(e.to_string()))?;
        detect_result(status, &body)
    }

    async fn fetch_scripts(&self, os: &str) -> Result<Catalog, CatalogError> {
        let url = self.endpoint("get_scripts").map_err(CatalogError::Transport)?;
        let resp = self
            .http
            .get(url)
            .query(&[("os", os)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?;
        scripts_result(status, &body)
    }

    async fn open_stream(&self, os: &str, scripts: &[String]) -> Result<EventStream, StreamError> {
        let url = self.stream_url(os, scripts).map_err(StreamError::Open)?;
        // No overall timeout here: the stream lives as long as the audit runs.
        let resp = self
            .http
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| StreamError::Open(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(StreamError::Status(resp.status().as_u16()));
        }
        Ok(sse::decode_events(resp.bytes_stream()))
    }

    async fn download_report(&self, request: &DownloadRequest) -> Result<Bytes, DownloadError> {
        let endpoint = self
            .endpoint("download_report")
            .map_err(DownloadError::Transport)?;
        let resp = self
            .http
            .get(request.url(&endpoint))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DownloadError::Transport(e.to_string()))?;
        download_status(resp.status())?;
        resp.bytes()
            .await
            .map_err(|e| DownloadError::Transport(e.to_string()))
    }
}

/// Classify a `/detect_os` reply. Error statuses still carry `{error}` for
/// unsupported hosts; that message wins over the bare status.
fn detect_result(status: StatusCode, body: &[u8]) -> Result<String, DetectionError> {
    let parsed = serde_json::from_slice::<DetectResponse>(body);
    if !status.is_success() {
        return Err(match parsed {
            Ok(DetectResponse { error: Some(msg), .. }) => DetectionError::Rejected(msg),
            _ => DetectionError::Status(status.as_u16()),
        });
    }
    let parsed = parsed.map_err(|e| DetectionError::Malformed(e.to_string()))?;
    match parsed.os.filter(|os| !os.trim().is_empty()) {
        Some(os) => Ok(os),
        None => Err(DetectionError::Rejected(
            parsed.error.unwrap_or_else(|| "Unknown error".to_string()),
        )),
    }
}

/// Classify a `/get_scripts` reply. An `{error}` payload fails even on 200.
fn scripts_result(status: StatusCode, body: &[u8]) -> Result<Catalog, CatalogError> {
    let parsed = serde_json::from_slice::<ScriptsResponse>(body);
    if !status.is_success() {
        return Err(match parsed {
            Ok(ScriptsResponse { error: Some(msg), .. }) => CatalogError::Rejected(msg),
            _ => CatalogError::Status(status.as_u16()),
        });
    }
    let parsed = parsed.map_err(|e| CatalogError::Malformed(e.to_string()))?;
    if let Some(msg) = parsed.error {
        return Err(CatalogError::Rejected(msg));
    }
    parsed
        .scripts
        .ok_or_else(|| CatalogError::Malformed("missing `scripts` field".to_string()))
}

fn download_status(status: StatusCode) -> Result<(), DownloadError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::NOT_FOUND => Err(DownloadError::Unavailable),
        s => Err(DownloadError::Status(s.as_u16())),
    }
}
