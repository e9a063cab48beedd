//! Orchestration controller.
//!
//! Owns the [`Orchestrator`] and runs the whole workflow on one cooperative
//! task: UI commands, the debounce timer, completions of in-flight requests and
//! the active progress stream are all multiplexed through a single `select!`.

use super::catalog::CatalogTicket;
use super::handoff::{self, DownloadRequest};
use super::resolver::{DetectionTicket, Debouncer};
use super::session::{DetectionOutcome, LineOutcome, Orchestrator, RunRequest};
use crate::engine::{AuditService, EventStream};
use crate::error::{CatalogError, DetectionError, DownloadError, StreamError};
use crate::model::{Catalog, OrchestratorEvent, RunConfig, RunStatus, SessionSummary};
use anyhow::Result;
use bytes::Bytes;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    EditHost(String),
    Select(String),
    Deselect(String),
    SelectAll,
    Run,
    Download,
    Status,
    Quit,
}

/// Results of spawned network requests, tagged with their dispatch context.
enum Completion {
    Detection {
        ticket: DetectionTicket,
        result: Result<String, DetectionError>,
    },
    Catalog {
        ticket: CatalogTicket,
        result: Result<Catalog, CatalogError>,
    },
    StreamOpened {
        seq: u64,
        result: Result<EventStream, StreamError>,
    },
    Download {
        request: DownloadRequest,
        result: Result<Bytes, DownloadError>,
    },
}

struct Ctx {
    service: Arc<dyn AuditService>,
    done_tx: UnboundedSender<Completion>,
}

impl Ctx {
    fn dispatch_detection(&self, orch: &mut Orchestrator) {
        let ticket = orch.begin_detection();
        let service = self.service.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = service.detect_os(&ticket.host).await;
            let _ = done_tx.send(Completion::Detection { ticket, result });
        });
    }

    fn dispatch_catalog(&self, ticket: CatalogTicket) {
        let service = self.service.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = service.fetch_scripts(&ticket.os).await;
            let _ = done_tx.send(Completion::Catalog { ticket, result });
        });
    }

    fn dispatch_stream(&self, request: RunRequest) {
        let service = self.service.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = service.open_stream(&request.os, &request.scripts).await;
            let _ = done_tx.send(Completion::StreamOpened {
                seq: request.seq,
                result,
            });
        });
    }

    fn dispatch_download(&self, request: DownloadRequest) {
        let service = self.service.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = service.download_report(&request).await;
            let _ = done_tx.send(Completion::Download { request, result });
        });
    }
}

/// Next payload of the active stream; pending forever when no stream is open.
async fn next_stream_event(stream: &mut Option<EventStream>) -> Option<Result<String, StreamError>> {
    match stream.as_mut() {
        Some(s) => s.next().await,
        None => futures::future::pending().await,
    }
}

/// Run the workflow until `Quit` (or the command channel closes) and return
/// the final session summary.
pub(crate) async fn run_controller(
    cfg: &RunConfig,
    service: Arc<dyn AuditService>,
    event_tx: UnboundedSender<OrchestratorEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<SessionSummary> {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
    let ctx = Ctx { service, done_tx };
    let mut orch = Orchestrator::new(cfg.host.clone(), Some(event_tx));
    let mut debounce = Debouncer::new(cfg.debounce);
    // Bounded to the `Running` state: set when the stream opens, dropped on
    // completion or failure.
    let mut stream: Option<EventStream> = None;
    let mut saved_report: Option<PathBuf> = None;

    if cfg.detect_on_launch {
        ctx.dispatch_detection(&mut orch);
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::EditHost(host)) => {
                        if debounce.is_pending() {
                            tracing::debug!(host = %host, "host edited inside debounce window; restarting timer");
                        }
                        orch.edit_host(host);
                        debounce.touch();
                    }
                    Some(UiCommand::Select(name)) => match orch.select(&name) {
                        Ok(()) => tracing::debug!(script = %name, "script selected"),
                        Err(e) => orch.log_error(e.to_string()),
                    },
                    Some(UiCommand::Deselect(name)) => {
                        if !orch.deselect(&name) {
                            tracing::debug!(script = %name, "script was not selected");
                        }
                    }
                    Some(UiCommand::SelectAll) => match orch.select_all() {
                        Ok(n) => tracing::debug!(count = n, "all scripts selected"),
                        Err(e) => orch.log_error(e.to_string()),
                    },
                    Some(UiCommand::Run) => match orch.start_run() {
                        Ok(request) => ctx.dispatch_stream(request),
                        Err(reason) => orch.reject_run(reason),
                    },
                    Some(UiCommand::Download) => match orch.download_request() {
                        Ok(request) => {
                            orch.log_info("Preparing report for download...");
                            ctx.dispatch_download(request);
                        }
                        Err(error) => {
                            orch.log_error(error.to_string());
                            orch.emit(OrchestratorEvent::DownloadFailed { error });
                        }
                    },
                    Some(UiCommand::Status) => {
                        orch.emit(OrchestratorEvent::Snapshot(Box::new(orch.snapshot())));
                    }
                    Some(UiCommand::Quit) | None => {
                        // Closing the channel mid-run counts as an abort.
                        drop(stream.take());
                        orch.fail_run(StreamError::Aborted);
                        break;
                    }
                }
            }
            _ = debounce.elapsed() => {
                debounce.cancel();
                ctx.dispatch_detection(&mut orch);
            }
            Some(done) = done_rx.recv() => {
                match done {
                    Completion::Detection { ticket, result } => {
                        if let DetectionOutcome::Detected(catalog_ticket) = orch.apply_detection(&ticket, result) {
                            ctx.dispatch_catalog(catalog_ticket);
                        }
                    }
                    Completion::Catalog { ticket, result } => {
                        orch.apply_catalog(&ticket, result);
                    }
                    Completion::StreamOpened { seq, result } => {
                        let current = orch.run().map(|r| r.seq) == Some(seq)
                            && orch.status() == RunStatus::Running;
                        match result {
                            Ok(s) if current => stream = Some(s),
                            Ok(_) => tracing::debug!(seq, "dropping stream for a run that already ended"),
                            Err(e) => {
                                orch.fail_run(e);
                            }
                        }
                    }
                    Completion::Download { request, result } => {
                        match result.and_then(|bytes| {
                            handoff::save_report(&cfg.download_dir, &request, &bytes)
                                .map_err(|e| DownloadError::Io(format!("{e:#}")))
                        }) {
                            Ok(path) => {
                                tracing::info!(path = %path.display(), "report saved");
                                orch.log_info(format!("Report saved: {}", path.display()));
                                orch.emit(OrchestratorEvent::ReportSaved { path: path.clone() });
                                saved_report = Some(path);
                            }
                            Err(error) => {
                                orch.log_error(error.to_string());
                                orch.emit(OrchestratorEvent::DownloadFailed { error });
                            }
                        }
                    }
                }
            }
            maybe_event = next_stream_event(&mut stream) => {
                match maybe_event {
                    Some(Ok(payload)) => {
                        if orch.on_stream_line(&payload) != LineOutcome::Appended {
                            stream = None;
                        }
                    }
                    Some(Err(e)) => {
                        stream = None;
                        orch.fail_run(e);
                    }
                    None => {
                        stream = None;
                        orch.fail_run(StreamError::ClosedWithoutReport);
                    }
                }
            }
        }
    }

    Ok(SessionSummary {
        timestamp_utc: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into()),
        config: cfg.clone(),
        snapshot: orch.snapshot(),
        saved_report,
        log: orch.log_lines().to_vec(),
    })
}
