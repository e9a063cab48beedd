use crate::error::{CatalogError, DetectionError, DownloadError, RunRejected, StreamError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub base_url: String,
    pub session_id: String,
    /// Host resolved at launch; later edits come in as commands.
    #[serde(default)]
    pub host: String,
    /// Scripts to select once the catalog is loaded (batch mode).
    #[serde(default)]
    pub scripts: Vec<String>,
    #[serde(default)]
    pub all_scripts: bool,
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub detect_on_launch: bool,
    pub download: bool,
    pub download_dir: PathBuf,
    pub user_agent: String,
}

/// Metadata for one audit script, keyed by filename in the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptDescriptor {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ScriptDescriptor {
    pub fn display_title<'a>(&'a self, filename: &'a str) -> &'a str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(filename)
    }

    pub fn display_description(&self) -> &str {
        self.description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or("No description")
    }
}

pub type Catalog = BTreeMap<String, ScriptDescriptor>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogState {
    #[default]
    Unloaded,
    Loading,
    Ready,
    Empty,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSession {
    pub seq: u64,
    pub host: String,
    pub os: String,
    pub scripts: Vec<String>,
    pub status: RunStatus,
    /// Only set while `status` is `Completed`.
    pub report: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub text: String,
    pub is_error: bool,
}

impl LogLine {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_error {
            write!(f, "❌ {}", self.text)
        } else {
            f.write_str(&self.text)
        }
    }
}

/// Point-in-time view of the orchestrator, used by `status` and the final summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub host: String,
    pub os: Option<String>,
    pub catalog_state: CatalogState,
    pub catalog: Catalog,
    pub selection: BTreeSet<String>,
    pub run: Option<RunSession>,
    pub run_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub timestamp_utc: String,
    pub config: RunConfig,
    #[serde(flatten)]
    pub snapshot: SessionSnapshot,
    #[serde(default)]
    pub saved_report: Option<PathBuf>,
    pub log: Vec<LogLine>,
}

/// Events emitted by the controller for presentation layers.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    LogCleared,
    Log(LogLine),
    OsDetected {
        host: String,
        os: String,
    },
    DetectionFailed {
        host: String,
        error: DetectionError,
    },
    CatalogLoaded {
        os: String,
        catalog: Catalog,
    },
    CatalogEmpty {
        os: String,
    },
    CatalogFailed {
        os: String,
        error: CatalogError,
    },
    RunStarted {
        seq: u64,
        os: String,
        scripts: Vec<String>,
    },
    RunRejected {
        reason: RunRejected,
    },
    RunCompleted {
        seq: u64,
        report: String,
    },
    RunFailed {
        seq: u64,
        error: StreamError,
    },
    ReportSaved {
        path: PathBuf,
    },
    DownloadFailed {
        error: DownloadError,
    },
    /// Boxed to keep the enum small; snapshots carry the whole catalog.
    Snapshot(Box<SessionSnapshot>),
}
