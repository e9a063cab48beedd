//! Report handoff: turn a completed run's report reference into a download.

use crate::error::DownloadError;
use anyhow::{Context, Result};
use reqwest::Url;
use std::path::{Path, PathBuf};

/// Filename used when the report path has no usable final segment.
pub(crate) const DEFAULT_REPORT_NAME: &str = "audit_report.pdf";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Report path exactly as announced by the service.
    pub path: String,
    pub suggested_filename: String,
}

impl DownloadRequest {
    /// The download endpoint with the report path as its `path` parameter.
    pub fn url(&self, endpoint: &Url) -> Url {
        let mut url = endpoint.clone();
        url.query_pairs_mut().append_pair("path", &self.path);
        url
    }
}

pub(crate) fn build_download_request(reference: Option<&str>) -> Result<DownloadRequest, DownloadError> {
    let path = reference.ok_or(DownloadError::Unavailable)?;
    Ok(DownloadRequest {
        path: path.to_string(),
        suggested_filename: suggested_filename(path),
    })
}

/// Final segment of a path using either separator style.
pub(crate) fn suggested_filename(path: &str) -> String {
    match path.rsplit(['/', '\\']).next() {
        Some(name) if !name.is_empty() && name != "." && name != ".." => name.to_string(),
        _ => DEFAULT_REPORT_NAME.to_string(),
    }
}

/// Write downloaded report bytes into `dir`, creating it if needed.
pub(crate) fn save_report(dir: &Path, request: &DownloadRequest, bytes: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(&request.suggested_filename);
    std::fs::write(&path, bytes).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
