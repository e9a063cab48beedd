//! Remote audit service contract.
//!
//! The orchestrator only talks to the service through [`AuditService`], so the
//! controller can be driven by the HTTP client in production and by an
//! in-memory double in tests.

mod client;
mod sse;

pub use client::AuditClient;

use crate::error::{CatalogError, DetectionError, DownloadError, StreamError};
use crate::model::Catalog;
use crate::orchestrator::DownloadRequest;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Ordered event payloads of one audit run. The stream ends when the remote
/// side closes the channel; dropping it closes the connection.
pub type EventStream = BoxStream<'static, Result<String, StreamError>>;

#[async_trait]
pub trait AuditService: Send + Sync {
    async fn detect_os(&self, host: &str) -> Result<String, DetectionError>;

    async fn fetch_scripts(&self, os: &str) -> Result<Catalog, CatalogError>;

    async fn open_stream(&self, os: &str, scripts: &[String]) -> Result<EventStream, StreamError>;

    async fn download_report(&self, request: &DownloadRequest) -> Result<Bytes, DownloadError>;
}
