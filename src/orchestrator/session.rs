//! Orchestrator state and its guarded transitions.
//!
//! Everything the workflow knows lives in one [`Orchestrator`] value owned by
//! the controller task. Network results are fed back in through `apply_*`
//! methods together with the ticket they were dispatched with, which lets
//! superseded responses be discarded instead of overwriting newer state.

use super::catalog::{CatalogOutcome, CatalogTicket, Selection};
use super::handoff::{self, DownloadRequest};
use super::log_sink::LogSink;
use super::resolver::DetectionTicket;
use super::stream::{classify, StreamLine};
use crate::error::{CatalogError, DetectionError, DownloadError, RunRejected, SelectionError, StreamError};
use crate::model::{
    Catalog, CatalogState, LogLine, OrchestratorEvent, RunSession, RunStatus, SessionSnapshot,
};
use tokio::sync::mpsc::UnboundedSender;

/// Stream parameters for a run that passed the single-flight gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunRequest {
    pub seq: u64,
    pub os: String,
    pub scripts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DetectionOutcome {
    Detected(CatalogTicket),
    Failed,
    Stale,
}

/// What the controller must do after feeding a stream payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineOutcome {
    Appended,
    Completed,
    /// No run is streaming; the payload was dropped.
    Ignored,
}

pub(crate) struct Orchestrator {
    host: String,
    detected_os: Option<String>,
    detecting: bool,
    cycle: u64,
    catalog: Catalog,
    catalog_state: CatalogState,
    selection: Selection,
    run: Option<RunSession>,
    run_seq: u64,
    log: LogSink,
}

impl Orchestrator {
    pub(crate) fn new(host: impl Into<String>, event_tx: Option<UnboundedSender<OrchestratorEvent>>) -> Self {
        Self {
            host: host.into(),
            detected_os: None,
            detecting: false,
            cycle: 0,
            catalog: Catalog::new(),
            catalog_state: CatalogState::Unloaded,
            selection: Selection::default(),
            run: None,
            run_seq: 0,
            log: LogSink::new(event_tx),
        }
    }

    #[cfg(test)]
    pub(crate) fn detected_os(&self) -> Option<&str> {
        self.detected_os.as_deref()
    }

    #[cfg(test)]
    pub(crate) fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[cfg(test)]
    pub(crate) fn catalog_state(&self) -> CatalogState {
        self.catalog_state
    }

    pub(crate) fn run(&self) -> Option<&RunSession> {
        self.run.as_ref()
    }

    pub(crate) fn status(&self) -> RunStatus {
        self.run.as_ref().map(|r| r.status).unwrap_or_default()
    }

    pub(crate) fn log_lines(&self) -> &[LogLine] {
        self.log.lines()
    }

    /// Whether a run could start right now, selection aside.
    pub(crate) fn run_enabled(&self) -> bool {
        self.detected_os.is_some()
            && !self.detecting
            && self.catalog_state == CatalogState::Ready
            && self.status() != RunStatus::Running
    }

    pub(crate) fn report_reference(&self) -> Option<&str> {
        self.run
            .as_ref()
            .filter(|r| r.status == RunStatus::Completed)
            .and_then(|r| r.report.as_deref())
    }

    pub(crate) fn log_info(&mut self, text: impl Into<String>) {
        self.log.info(text);
    }

    pub(crate) fn log_error(&mut self, text: impl Into<String>) {
        self.log.error(text);
    }

    pub(crate) fn emit(&self, event: OrchestratorEvent) {
        self.log.emit(event);
    }

    /// Record a host edit. Any response for an earlier host becomes stale.
    pub(crate) fn edit_host(&mut self, host: impl Into<String>) {
        self.host = host.into();
    }

    /// Start a detection cycle for the current host.
    pub(crate) fn begin_detection(&mut self) -> DetectionTicket {
        self.cycle += 1;
        self.detecting = true;
        self.log.clear();
        self.log.info("Detecting OS...");
        tracing::debug!(host = %self.host, cycle = self.cycle, "dispatching OS detection");
        DetectionTicket {
            host: self.host.clone(),
            cycle: self.cycle,
        }
    }

    pub(crate) fn apply_detection(
        &mut self,
        ticket: &DetectionTicket,
        result: Result<String, DetectionError>,
    ) -> DetectionOutcome {
        if !ticket.is_current(&self.host, self.cycle) {
            tracing::debug!(
                host = %ticket.host,
                cycle = ticket.cycle,
                current_cycle = self.cycle,
                "discarding stale detection response"
            );
            return DetectionOutcome::Stale;
        }
        self.detecting = false;
        // A new OS (or none) invalidates everything built on the old one.
        self.invalidate_catalog();
        match result {
            Ok(os) => {
                tracing::info!(host = %self.host, %os, "OS detected");
                self.log.info(format!("Detected OS: {os}"));
                self.detected_os = Some(os.clone());
                self.catalog_state = CatalogState::Loading;
                self.log.emit(OrchestratorEvent::OsDetected {
                    host: self.host.clone(),
                    os: os.clone(),
                });
                DetectionOutcome::Detected(CatalogTicket {
                    host: self.host.clone(),
                    os,
                    cycle: self.cycle,
                })
            }
            Err(error) => {
                self.detected_os = None;
                match &error {
                    DetectionError::Rejected(msg) => {
                        self.log.error(format!("OS Detection Failed: {msg}"))
                    }
                    other => self.log.error(format!("Error detecting OS: {other}")),
                }
                self.log.emit(OrchestratorEvent::DetectionFailed {
                    host: self.host.clone(),
                    error,
                });
                DetectionOutcome::Failed
            }
        }
    }

    pub(crate) fn apply_catalog(
        &mut self,
        ticket: &CatalogTicket,
        result: Result<Catalog, CatalogError>,
    ) -> CatalogOutcome {
        if !ticket.is_current(&self.host, self.cycle, self.detected_os.as_deref()) {
            tracing::debug!(
                host = %ticket.host,
                os = %ticket.os,
                cycle = ticket.cycle,
                "discarding stale catalog response"
            );
            return CatalogOutcome::Stale;
        }
        self.invalidate_catalog();
        match result {
            Ok(catalog) if catalog.is_empty() => {
                self.catalog_state = CatalogState::Empty;
                self.log.info(format!("No scripts found for {}.", ticket.os));
                self.log.emit(OrchestratorEvent::CatalogEmpty {
                    os: ticket.os.clone(),
                });
                CatalogOutcome::Empty
            }
            Ok(catalog) => {
                let count = catalog.len();
                tracing::info!(os = %ticket.os, count, "script catalog loaded");
                self.log
                    .info(format!("Loaded {count} audit script(s) for {}", ticket.os));
                self.catalog = catalog;
                self.catalog_state = CatalogState::Ready;
                self.log.emit(OrchestratorEvent::CatalogLoaded {
                    os: ticket.os.clone(),
                    catalog: self.catalog.clone(),
                });
                CatalogOutcome::Ready(count)
            }
            Err(error) => {
                self.catalog_state = CatalogState::Failed;
                match &error {
                    CatalogError::Rejected(msg) => {
                        self.log.error(format!("Error fetching scripts: {msg}"))
                    }
                    other => self.log.error(format!("Failed to load scripts: {other}")),
                }
                self.log.emit(OrchestratorEvent::CatalogFailed {
                    os: ticket.os.clone(),
                    error,
                });
                CatalogOutcome::Failed
            }
        }
    }

    fn invalidate_catalog(&mut self) {
        self.catalog.clear();
        self.catalog_state = CatalogState::Unloaded;
        self.selection.clear();
    }

    pub(crate) fn select(&mut self, name: &str) -> Result<(), SelectionError> {
        self.selection.select(&self.catalog, name)
    }

    pub(crate) fn deselect(&mut self, name: &str) -> bool {
        self.selection.deselect(name)
    }

    pub(crate) fn select_all(&mut self) -> Result<usize, SelectionError> {
        self.selection.select_all(&self.catalog)
    }

    /// Single-flight gate. On success the run is `Running` and the caller must
    /// open the stream described by the returned request.
    pub(crate) fn start_run(&mut self) -> Result<RunRequest, RunRejected> {
        if self.status() == RunStatus::Running {
            return Err(RunRejected::AlreadyRunning);
        }
        let os = self.detected_os.clone().ok_or(RunRejected::NoOsDetected)?;
        if self.detecting {
            return Err(RunRejected::DetectionInProgress);
        }
        if self.selection.is_empty() {
            return Err(RunRejected::EmptySelection);
        }

        let scripts = self.selection.ordered(&self.catalog);
        self.run_seq += 1;
        self.log.clear();
        self.log.info("Initiating audit...");
        self.run = Some(RunSession {
            seq: self.run_seq,
            host: self.host.clone(),
            os: os.clone(),
            scripts: scripts.clone(),
            status: RunStatus::Running,
            report: None,
        });
        tracing::info!(seq = self.run_seq, %os, ?scripts, "audit run started");
        self.log.emit(OrchestratorEvent::RunStarted {
            seq: self.run_seq,
            os: os.clone(),
            scripts: scripts.clone(),
        });
        Ok(RunRequest {
            seq: self.run_seq,
            os,
            scripts,
        })
    }

    /// Surface a rejected run request; no state changes.
    pub(crate) fn reject_run(&mut self, reason: RunRejected) {
        self.log.error(reason.to_string());
        self.log.emit(OrchestratorEvent::RunRejected { reason });
    }

    /// Feed one stream payload, in delivery order.
    pub(crate) fn on_stream_line(&mut self, payload: &str) -> LineOutcome {
        if self.status() != RunStatus::Running {
            tracing::debug!(payload, "dropping stream payload outside a running audit");
            return LineOutcome::Ignored;
        }
        match classify(payload) {
            StreamLine::Log(text) => {
                self.log.info(text);
                LineOutcome::Appended
            }
            StreamLine::Report(path) => {
                let path = path.to_string();
                self.log.info(format!("Report generated: {path}"));
                let Some(run) = self.run.as_mut() else {
                    return LineOutcome::Ignored;
                };
                run.status = RunStatus::Completed;
                run.report = Some(path.clone());
                let seq = run.seq;
                tracing::info!(seq, report = %path, "audit run completed");
                self.log.emit(OrchestratorEvent::RunCompleted { seq, report: path });
                LineOutcome::Completed
            }
        }
    }

    /// Move a running audit to `Failed`. Returns false if nothing was running.
    pub(crate) fn fail_run(&mut self, error: StreamError) -> bool {
        let Some(run) = self.run.as_mut().filter(|r| r.status == RunStatus::Running) else {
            return false;
        };
        run.status = RunStatus::Failed;
        run.report = None;
        let seq = run.seq;
        tracing::warn!(seq, %error, "audit run failed");
        let message = match &error {
            StreamError::Aborted => "Audit aborted before a report was produced.".to_string(),
            _ => format!(
                "Connection to audit stream failed or was interrupted ({error}). Please check server logs and try again."
            ),
        };
        self.log.error(message);
        self.log.emit(OrchestratorEvent::RunFailed { seq, error });
        true
    }

    /// Download request for the current report. Read-only: may be called repeatedly.
    pub(crate) fn download_request(&self) -> Result<DownloadRequest, DownloadError> {
        handoff::build_download_request(self.report_reference())
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            host: self.host.clone(),
            os: self.detected_os.clone(),
            catalog_state: self.catalog_state,
            catalog: self.catalog.clone(),
            selection: self.selection.names().clone(),
            run: self.run.clone(),
            run_enabled: self.run_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptDescriptor;
    use pretty_assertions::assert_eq;

    fn catalog(names: &[&str]) -> Catalog {
        names
            .iter()
            .map(|n| (n.to_string(), ScriptDescriptor::default()))
            .collect()
    }

    /// Orchestrator with OS detected and the given catalog loaded.
    fn ready(names: &[&str]) -> Orchestrator {
        let mut orch = Orchestrator::new("10.0.0.5", None);
        let ticket = orch.begin_detection();
        let DetectionOutcome::Detected(cat) = orch.apply_detection(&ticket, Ok("Linux".into())) else {
            panic!("detection should succeed");
        };
        orch.apply_catalog(&cat, Ok(catalog(names)));
        orch
    }

    fn texts(orch: &Orchestrator) -> Vec<String> {
        orch.log_lines().iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn run_without_os_is_rejected() {
        let mut orch = Orchestrator::new("10.0.0.5", None);
        assert_eq!(orch.start_run(), Err(RunRejected::NoOsDetected));
        assert_eq!(orch.status(), RunStatus::Idle);
        assert!(orch.run().is_none());
    }

    #[test]
    fn run_without_selection_is_rejected() {
        let mut orch = ready(&["users.sh"]);
        assert!(orch.run_enabled());
        assert_eq!(orch.start_run(), Err(RunRejected::EmptySelection));
    }

    #[test]
    fn second_run_while_running_is_rejected() {
        let mut orch = ready(&["users.sh"]);
        orch.select("users.sh").unwrap();
        let req = orch.start_run().unwrap();
        assert_eq!(req.scripts, vec!["users.sh"]);
        assert_eq!(orch.start_run(), Err(RunRejected::AlreadyRunning));
        assert_eq!(orch.run().unwrap().seq, 1);
    }

    #[test]
    fn run_rejected_while_detection_in_flight() {
        let mut orch = ready(&["users.sh"]);
        orch.select("users.sh").unwrap();
        orch.edit_host("10.0.0.6");
        orch.begin_detection();
        assert!(!orch.run_enabled());
        assert_eq!(orch.start_run(), Err(RunRejected::DetectionInProgress));
    }

    #[test]
    fn sentinel_completes_the_run() {
        let mut orch = ready(&["users.sh"]);
        orch.select("users.sh").unwrap();
        orch.start_run().unwrap();

        assert_eq!(orch.on_stream_line("Step 1"), LineOutcome::Appended);
        assert_eq!(orch.on_stream_line("Step 2"), LineOutcome::Appended);
        assert_eq!(
            orch.on_stream_line("REPORT_PATH:: /tmp/report.pdf "),
            LineOutcome::Completed
        );

        assert_eq!(
            texts(&orch),
            vec![
                "Initiating audit...",
                "Step 1",
                "Step 2",
                "Report generated: /tmp/report.pdf"
            ]
        );
        assert_eq!(orch.status(), RunStatus::Completed);
        assert_eq!(orch.report_reference(), Some("/tmp/report.pdf"));
        assert_eq!(orch.download_request().unwrap().suggested_filename, "report.pdf");
        // Lock released.
        assert!(orch.run_enabled());
    }

    #[test]
    fn stream_error_before_sentinel_fails_the_run() {
        let mut orch = ready(&["users.sh"]);
        orch.select("users.sh").unwrap();
        orch.start_run().unwrap();
        orch.on_stream_line("Step 1");

        assert!(orch.fail_run(StreamError::Transport("connection reset".into())));
        assert_eq!(orch.status(), RunStatus::Failed);
        assert_eq!(orch.report_reference(), None);
        assert_eq!(orch.download_request(), Err(DownloadError::Unavailable));

        let lines = orch.log_lines();
        assert_eq!(lines[1], LogLine::info("Step 1"));
        assert!(lines.last().unwrap().is_error);
        // Terminal state permits a fresh run.
        assert_eq!(orch.start_run().unwrap().seq, 2);
    }

    #[test]
    fn fail_run_is_a_no_op_after_completion() {
        let mut orch = ready(&["users.sh"]);
        orch.select("users.sh").unwrap();
        orch.start_run().unwrap();
        orch.on_stream_line("REPORT_PATH::/tmp/r.pdf");
        assert!(!orch.fail_run(StreamError::ClosedWithoutReport));
        assert_eq!(orch.report_reference(), Some("/tmp/r.pdf"));
    }

    #[test]
    fn catalog_for_an_edited_host_is_discarded() {
        let mut orch = Orchestrator::new("10.0.0.5", None);
        let ticket = orch.begin_detection();
        let DetectionOutcome::Detected(cat) = orch.apply_detection(&ticket, Ok("Linux".into())) else {
            panic!("detection should succeed");
        };
        assert_eq!(cat.host, "10.0.0.5");

        // Host edited while the catalog request is in flight; no new cycle yet.
        orch.edit_host("10.0.0.6");
        assert_eq!(
            orch.apply_catalog(&cat, Ok(catalog(&["users.sh"]))),
            CatalogOutcome::Stale
        );
        assert_eq!(orch.catalog_state(), CatalogState::Loading);
        assert!(orch.catalog().is_empty());
        assert!(!orch.run_enabled());
    }

    #[test]
    fn payloads_outside_a_run_are_ignored() {
        let mut orch = ready(&["users.sh"]);
        assert_eq!(orch.on_stream_line("Step 1"), LineOutcome::Ignored);
    }

    #[test]
    fn empty_catalog_is_not_an_error() {
        let orch = ready(&[]);
        assert_eq!(orch.catalog_state(), CatalogState::Empty);
        assert!(!orch.run_enabled());
        let last = orch.log_lines().last().unwrap();
        assert_eq!(last, &LogLine::info("No scripts found for Linux."));
    }

    #[test]
    fn catalog_error_disables_run() {
        let mut orch = Orchestrator::new("10.0.0.5", None);
        let ticket = orch.begin_detection();
        let DetectionOutcome::Detected(cat) = orch.apply_detection(&ticket, Ok("Linux".into())) else {
            panic!("detection should succeed");
        };
        let outcome = orch.apply_catalog(&cat, Err(CatalogError::Rejected("OS parameter is required".into())));
        assert_eq!(outcome, CatalogOutcome::Failed);
        assert_eq!(orch.catalog_state(), CatalogState::Failed);
        assert!(!orch.run_enabled());
        assert_eq!(
            orch.log_lines().last().unwrap(),
            &LogLine::error("Error fetching scripts: OS parameter is required")
        );
    }

    #[test]
    fn detection_failure_clears_os_and_catalog() {
        let mut orch = ready(&["users.sh"]);
        orch.select("users.sh").unwrap();
        let ticket = orch.begin_detection();
        let outcome = orch.apply_detection(
            &ticket,
            Err(DetectionError::Rejected("Unsupported OS: Darwin".into())),
        );
        assert_eq!(outcome, DetectionOutcome::Failed);
        assert_eq!(orch.detected_os(), None);
        assert!(orch.catalog().is_empty());
        assert_eq!(orch.start_run(), Err(RunRejected::NoOsDetected));
        assert_eq!(
            texts(&orch),
            vec!["Detecting OS...", "❌ OS Detection Failed: Unsupported OS: Darwin"]
        );
    }

    #[test]
    fn stale_detection_response_is_discarded() {
        let mut orch = Orchestrator::new("slow-host", None);
        let slow = orch.begin_detection();
        orch.edit_host("fast-host");
        let fast = orch.begin_detection();

        assert!(matches!(
            orch.apply_detection(&fast, Ok("Windows".into())),
            DetectionOutcome::Detected(_)
        ));
        assert_eq!(
            orch.apply_detection(&slow, Ok("Linux".into())),
            DetectionOutcome::Stale
        );
        assert_eq!(orch.detected_os(), Some("Windows"));
    }

    #[test]
    fn response_for_an_edited_host_is_stale_even_without_new_cycle() {
        let mut orch = Orchestrator::new("a", None);
        let ticket = orch.begin_detection();
        orch.edit_host("ab");
        assert_eq!(
            orch.apply_detection(&ticket, Ok("Linux".into())),
            DetectionOutcome::Stale
        );
        assert_eq!(orch.detected_os(), None);
    }

    #[test]
    fn catalog_from_superseded_cycle_is_discarded() {
        let mut orch = Orchestrator::new("a", None);
        let first = orch.begin_detection();
        let DetectionOutcome::Detected(old_cat) = orch.apply_detection(&first, Ok("Linux".into())) else {
            panic!("detection should succeed");
        };
        let second = orch.begin_detection();
        orch.apply_detection(&second, Ok("Linux".into()));

        assert_eq!(
            orch.apply_catalog(&old_cat, Ok(catalog(&["old.sh"]))),
            CatalogOutcome::Stale
        );
        assert!(orch.catalog().is_empty());
    }

    #[test]
    fn new_catalog_discards_selection() {
        let mut orch = ready(&["a.sh", "b.sh"]);
        orch.select("a.sh").unwrap();
        let ticket = orch.begin_detection();
        let DetectionOutcome::Detected(cat) = orch.apply_detection(&ticket, Ok("Linux".into())) else {
            panic!("detection should succeed");
        };
        orch.apply_catalog(&cat, Ok(catalog(&["a.sh", "c.sh"])));
        assert!(orch.snapshot().selection.is_empty());
        assert_eq!(orch.start_run(), Err(RunRejected::EmptySelection));
    }

    #[test]
    fn new_run_clears_previous_report_and_log() {
        let mut orch = ready(&["users.sh"]);
        orch.select("users.sh").unwrap();
        orch.start_run().unwrap();
        orch.on_stream_line("REPORT_PATH::/tmp/first.pdf");
        orch.start_run().unwrap();
        assert_eq!(orch.report_reference(), None);
        assert_eq!(texts(&orch), vec!["Initiating audit..."]);
    }
}
