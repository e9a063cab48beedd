//! Typed failures for every orchestration stage.
//!
//! Each stage short-circuits its downstream stages, so the kinds stay separate
//! instead of collapsing into one enum. They are `Clone` because they travel
//! inside events to presentation layers.

use thiserror::Error;

/// OS detection failed for the current host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectionError {
    #[error("{0}")]
    Transport(String),
    #[error("network response was not ok: HTTP {0}")]
    Status(u16),
    /// The service answered with an `{error}` payload.
    #[error("{0}")]
    Rejected(String),
    #[error("malformed detection response: {0}")]
    Malformed(String),
}

/// The script catalog could not be loaded. An empty catalog is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("{0}")]
    Transport(String),
    #[error("network response was not ok: HTTP {0}")]
    Status(u16),
    #[error("{0}")]
    Rejected(String),
    #[error("malformed catalog response: {0}")]
    Malformed(String),
}

/// A run request that did not pass the single-flight gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RunRejected {
    #[error("An audit is already in progress. Please wait.")]
    AlreadyRunning,
    #[error("No operating system detected for the target host.")]
    NoOsDetected,
    #[error("OS detection is still in progress.")]
    DetectionInProgress,
    #[error("Please select at least one script.")]
    EmptySelection,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("Unknown script: {0}")]
    UnknownScript(String),
    #[error("No script catalog loaded.")]
    NoCatalog,
}

/// The progress stream ended without a report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("could not open audit stream: {0}")]
    Open(String),
    #[error("audit stream returned HTTP {0}")]
    Status(u16),
    #[error("audit stream interrupted: {0}")]
    Transport(String),
    #[error("audit stream line exceeds {0} bytes")]
    LineTooLong(usize),
    #[error("audit stream closed before a report was produced")]
    ClosedWithoutReport,
    #[error("audit aborted")]
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    #[error("No report available to download.")]
    Unavailable,
    #[error("report download failed: {0}")]
    Transport(String),
    #[error("report download returned HTTP {0}")]
    Status(u16),
    #[error("could not save report: {0}")]
    Io(String),
}
