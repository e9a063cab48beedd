use crate::engine::AuditClient;
use crate::model::{OrchestratorEvent, RunConfig, SessionSummary};
use crate::orchestrator::{run_controller, UiCommand};
use anyhow::{Context, Result};
use clap::Parser;
use rand::RngCore;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Output line routing for stdout/stderr writer.
pub(crate) enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
pub(crate) fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "audit-cli",
    version,
    about = "Run remote audit scripts against a target and fetch the report"
)]
pub struct Cli {
    /// Base URL of the audit service
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    pub base_url: String,

    /// Target host whose operating system is detected
    #[arg(long)]
    pub host: Option<String>,

    /// Script to run (repeatable); must exist in the catalog for the detected OS
    #[arg(long = "script", short = 's')]
    pub scripts: Vec<String>,

    /// Run every script in the catalog
    #[arg(long, conflicts_with = "scripts")]
    pub all_scripts: bool,

    /// Print the script catalog for the detected OS and exit
    #[arg(long)]
    pub list: bool,

    /// Read commands from stdin instead of running a single audit
    #[arg(long, short = 'i', conflicts_with_all = ["json", "list"])]
    pub interactive: bool,

    /// Print the session summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Suppress progress output (only with --json)
    #[arg(long)]
    pub silent: bool,

    /// Quiet period after the last host edit before OS detection runs
    #[arg(long, default_value = "500ms")]
    pub debounce: humantime::Duration,

    /// Timeout for detection, catalog and download requests
    #[arg(long, default_value = "30s")]
    pub request_timeout: humantime::Duration,

    /// Use --download true or --download false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub download: bool,

    /// Directory the report is saved into (defaults to the user's download directory)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    if args.interactive {
        return crate::console::run(args).await;
    }

    run_batch(args).await
}

/// Generate a random identifier for this session's log span.
fn gen_session_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    RunConfig {
        base_url: args.base_url.clone(),
        session_id: gen_session_id(),
        host: args.host.clone().unwrap_or_default(),
        scripts: args.scripts.clone(),
        all_scripts: args.all_scripts,
        debounce: Duration::from(args.debounce),
        request_timeout: Duration::from(args.request_timeout),
        detect_on_launch: true,
        download: args.download && !args.list,
        download_dir: args
            .output_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from(".")),
        user_agent: format!("audit-cli/{}", env!("CARGO_PKG_VERSION")),
    }
}

/// Spawn the controller against the HTTP service inside a session span.
pub(crate) fn spawn_controller(
    cfg: &RunConfig,
    event_tx: mpsc::UnboundedSender<OrchestratorEvent>,
    cmd_rx: mpsc::UnboundedReceiver<UiCommand>,
) -> Result<tokio::task::JoinHandle<Result<SessionSummary>>> {
    let client = AuditClient::new(cfg)?;
    tracing::info!(base_url = %client.base_url(), "using audit service");
    let cfg = cfg.clone();
    let span = tracing::info_span!("session", id = %cfg.session_id);
    Ok(tokio::spawn(
        async move { run_controller(&cfg, Arc::new(client), event_tx, cmd_rx).await }.instrument(span),
    ))
}

/// Reacts to controller events on behalf of a non-interactive user:
/// select the requested scripts, run them, download the report, quit.
pub(crate) struct Autopilot {
    scripts: Vec<String>,
    all_scripts: bool,
    list_only: bool,
    download: bool,
    quitting: bool,
    failure: Option<String>,
}

impl Autopilot {
    pub(crate) fn new(cfg: &RunConfig, list_only: bool) -> Self {
        Self {
            scripts: cfg.scripts.clone(),
            all_scripts: cfg.all_scripts,
            list_only,
            download: cfg.download,
            quitting: false,
            failure: None,
        }
    }

    pub(crate) fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn quit(&mut self, failure: Option<String>) -> Vec<UiCommand> {
        if self.failure.is_none() {
            self.failure = failure;
        }
        if self.quitting {
            return Vec::new();
        }
        self.quitting = true;
        vec![UiCommand::Quit]
    }

    /// Ctrl-C: abort whatever is in flight.
    pub(crate) fn interrupt(&mut self) -> Vec<UiCommand> {
        if self.quitting {
            return Vec::new();
        }
        self.quit(Some("interrupted".into()))
    }

    pub(crate) fn on_event(&mut self, ev: &OrchestratorEvent) -> Vec<UiCommand> {
        if self.quitting {
            return Vec::new();
        }
        match ev {
            OrchestratorEvent::DetectionFailed { error, .. } => {
                self.quit(Some(format!("OS detection failed: {error}")))
            }
            OrchestratorEvent::CatalogFailed { error, .. } => {
                self.quit(Some(format!("failed to load scripts: {error}")))
            }
            OrchestratorEvent::CatalogEmpty { os } => {
                if self.list_only {
                    self.quit(None)
                } else {
                    self.quit(Some(format!("no scripts available for {os}")))
                }
            }
            OrchestratorEvent::CatalogLoaded { catalog, .. } => {
                if self.list_only {
                    return self.quit(None);
                }
                if self.all_scripts {
                    return vec![UiCommand::SelectAll, UiCommand::Run];
                }
                if self.scripts.is_empty() {
                    return self.quit(Some(
                        "no scripts requested; pass --script <name> or --all-scripts (see --list)".into(),
                    ));
                }
                let unknown: Vec<_> = self
                    .scripts
                    .iter()
                    .filter(|s| !catalog.contains_key(*s))
                    .cloned()
                    .collect();
                if !unknown.is_empty() {
                    return self.quit(Some(format!("unknown script(s): {}", unknown.join(", "))));
                }
                let mut cmds: Vec<_> = self.scripts.iter().cloned().map(UiCommand::Select).collect();
                cmds.push(UiCommand::Run);
                cmds
            }
            OrchestratorEvent::RunRejected { reason } => self.quit(Some(reason.to_string())),
            OrchestratorEvent::RunFailed { error, .. } => self.quit(Some(error.to_string())),
            OrchestratorEvent::RunCompleted { .. } => {
                if self.download {
                    vec![UiCommand::Download]
                } else {
                    self.quit(None)
                }
            }
            OrchestratorEvent::ReportSaved { .. } => self.quit(None),
            OrchestratorEvent::DownloadFailed { error } => self.quit(Some(error.to_string())),
            _ => Vec::new(),
        }
    }
}

/// Detect, select, run and download in one pass, then print the outcome.
async fn run_batch(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let (out_tx, out_handle) = if args.silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<OrchestratorEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let handle = spawn_controller(&cfg, evt_tx, cmd_rx)?;
    let mut autopilot = Autopilot::new(&cfg, args.list);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        let ev = tokio::select! {
            ev = evt_rx.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                for cmd in autopilot.interrupt() {
                    let _ = cmd_tx.send(cmd);
                }
                continue;
            }
        };
        if let (Some(tx), OrchestratorEvent::Log(line)) = (out_tx.as_ref(), &ev) {
            // Keep stdout clean for the JSON document.
            let _ = if args.json {
                tx.send(OutputLine::Stderr(line.to_string()))
            } else {
                tx.send(OutputLine::Stdout(line.to_string()))
            };
        }
        for cmd in autopilot.on_event(&ev) {
            // The controller may already be gone if it stopped on its own.
            let _ = cmd_tx.send(cmd);
        }
    }

    let summary = handle
        .await
        .context("controller task failed")?
        .context("audit session failed")?;

    if let Some(tx) = out_tx.as_ref() {
        let lines = if args.json {
            vec![serde_json::to_string_pretty(&summary)?]
        } else if args.list {
            crate::text_summary::catalog_lines(&summary.snapshot.catalog)
        } else {
            crate::text_summary::build_text_summary(&summary).lines
        };
        for line in lines {
            let _ = tx.send(OutputLine::Stdout(line));
        }
    }

    if let Some(tx) = out_tx {
        drop(tx);
    }
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    match autopilot.failure() {
        Some(reason) => Err(anyhow::anyhow!("{reason}")),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RunRejected, StreamError};
    use crate::model::{Catalog, ScriptDescriptor};

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("audit-cli").chain(args.iter().copied())).unwrap()
    }

    fn catalog(names: &[&str]) -> Catalog {
        names
            .iter()
            .map(|n| (n.to_string(), ScriptDescriptor::default()))
            .collect()
    }

    fn is_quit(cmds: &[UiCommand]) -> bool {
        matches!(cmds, [UiCommand::Quit])
    }

    #[test]
    fn defaults_match_the_service_contract() {
        let cfg = build_config(&cli(&[]));
        assert_eq!(cfg.base_url, "http://127.0.0.1:5000");
        assert_eq!(cfg.debounce, Duration::from_millis(500));
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert!(cfg.download);
        assert!(cfg.detect_on_launch);
        assert_eq!(cfg.session_id.len(), 16);
    }

    #[test]
    fn parses_repeated_scripts_and_durations() {
        let args = cli(&[
            "--host", "10.0.0.5", "-s", "users.sh", "-s", "firewall.sh", "--debounce", "250ms",
            "--download", "false", "--output-dir", "/tmp/reports",
        ]);
        let cfg = build_config(&args);
        assert_eq!(cfg.host, "10.0.0.5");
        assert_eq!(cfg.scripts, vec!["users.sh", "firewall.sh"]);
        assert_eq!(cfg.debounce, Duration::from_millis(250));
        assert!(!cfg.download);
        assert_eq!(cfg.download_dir, PathBuf::from("/tmp/reports"));
    }

    #[test]
    fn all_scripts_conflicts_with_explicit_scripts() {
        assert!(Cli::try_parse_from(["audit-cli", "--all-scripts", "-s", "a.sh"]).is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = build_config(&cli(&["--debounce", "1s"]));
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["debounce"], "1s");
        let back: RunConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.debounce, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn silent_requires_json() {
        let err = run(cli(&["--silent"])).await.unwrap_err();
        assert!(err.to_string().contains("--silent"));
    }

    #[test]
    fn autopilot_selects_requested_scripts_then_runs() {
        let cfg = build_config(&cli(&["-s", "users.sh"]));
        let mut pilot = Autopilot::new(&cfg, false);
        let cmds = pilot.on_event(&OrchestratorEvent::CatalogLoaded {
            os: "Linux".into(),
            catalog: catalog(&["users.sh", "firewall.sh"]),
        });
        assert!(matches!(
            cmds.as_slice(),
            [UiCommand::Select(name), UiCommand::Run] if name == "users.sh"
        ));

        let cmds = pilot.on_event(&OrchestratorEvent::RunCompleted {
            seq: 1,
            report: "/tmp/r.pdf".into(),
        });
        assert!(matches!(cmds.as_slice(), [UiCommand::Download]));
        let cmds = pilot.on_event(&OrchestratorEvent::ReportSaved {
            path: "/tmp/out/r.pdf".into(),
        });
        assert!(is_quit(&cmds));
        assert_eq!(pilot.failure(), None);
    }

    #[test]
    fn autopilot_fails_on_unknown_script() {
        let cfg = build_config(&cli(&["-s", "nope.sh"]));
        let mut pilot = Autopilot::new(&cfg, false);
        let cmds = pilot.on_event(&OrchestratorEvent::CatalogLoaded {
            os: "Linux".into(),
            catalog: catalog(&["users.sh"]),
        });
        assert!(is_quit(&cmds));
        assert_eq!(pilot.failure(), Some("unknown script(s): nope.sh"));
        // Only one quit, whatever follows.
        assert!(pilot
            .on_event(&OrchestratorEvent::RunRejected {
                reason: RunRejected::EmptySelection
            })
            .is_empty());
    }

    #[test]
    fn autopilot_list_mode_stops_after_catalog() {
        let cfg = build_config(&cli(&["--list"]));
        assert!(!cfg.download);
        let mut pilot = Autopilot::new(&cfg, true);
        let cmds = pilot.on_event(&OrchestratorEvent::CatalogEmpty { os: "Linux".into() });
        assert!(is_quit(&cmds));
        assert_eq!(pilot.failure(), None);
    }

    #[test]
    fn autopilot_reports_stream_failure() {
        let cfg = build_config(&cli(&["--all-scripts", "--download", "false"]));
        let mut pilot = Autopilot::new(&cfg, false);
        let cmds = pilot.on_event(&OrchestratorEvent::CatalogLoaded {
            os: "Linux".into(),
            catalog: catalog(&["users.sh"]),
        });
        assert!(matches!(cmds.as_slice(), [UiCommand::SelectAll, UiCommand::Run]));
        let cmds = pilot.on_event(&OrchestratorEvent::RunFailed {
            seq: 1,
            error: StreamError::ClosedWithoutReport,
        });
        assert!(is_quit(&cmds));
        assert_eq!(
            pilot.failure(),
            Some("audit stream closed before a report was produced")
        );
    }
}
