//! Line-oriented interactive console.
//!
//! Each stdin line is one command; controller events are printed as they
//! arrive. The controller keeps running until `quit` or end of input.

use crate::cli::{build_config, spawn_controller, spawn_output_writer, Cli, OutputLine};
use crate::model::OrchestratorEvent;
use crate::orchestrator::UiCommand;
use crate::text_summary::{catalog_lines, snapshot_lines};
use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const HELP: &[&str] = &[
    "Commands:",
    "  host <name>       Set the target host (OS detection follows after a short pause)",
    "  select <script>   Add a script to the selection",
    "  unselect <script> Remove a script from the selection",
    "  all               Select every script in the catalog",
    "  list | status     Show the catalog and session state",
    "  run               Start the audit",
    "  download          Save the last report",
    "  help              Show this help",
    "  quit              Exit",
];

/// What a console line asks for.
#[derive(Debug)]
enum Input {
    Command(UiCommand),
    Help,
}

fn parse_line(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    let cmd = match word.to_ascii_lowercase().as_str() {
        // An empty host is allowed; it clears the target like an emptied input.
        "host" => UiCommand::EditHost(rest.to_string()),
        "select" | "unselect" if rest.is_empty() => {
            return Err(format!("usage: {word} <script>"));
        }
        "select" => UiCommand::Select(rest.to_string()),
        "unselect" => UiCommand::Deselect(rest.to_string()),
        "all" => UiCommand::SelectAll,
        "list" | "status" => UiCommand::Status,
        "run" => UiCommand::Run,
        "download" => UiCommand::Download,
        "quit" | "exit" | "q" => UiCommand::Quit,
        "help" | "?" => return Ok(Some(Input::Help)),
        other => return Err(format!("unknown command: {other} (try `help`)")),
    };
    Ok(Some(Input::Command(cmd)))
}

/// Lines printed for an event, beyond the log lines themselves.
fn render(ev: &OrchestratorEvent) -> Vec<String> {
    match ev {
        OrchestratorEvent::Log(line) => vec![line.to_string()],
        OrchestratorEvent::LogCleared => vec![String::from("--")],
        OrchestratorEvent::CatalogLoaded { catalog, .. } => catalog_lines(catalog)
            .into_iter()
            .map(|l| format!("  {l}"))
            .collect(),
        OrchestratorEvent::RunCompleted { .. } => {
            vec!["Report ready; type `download` to save it.".to_string()]
        }
        OrchestratorEvent::Snapshot(snap) => {
            let mut lines = snapshot_lines(snap);
            let marks = snap
                .catalog
                .keys()
                .map(|file| if snap.selection.contains(file) { "[x]" } else { "[ ]" });
            lines.extend(
                marks
                    .zip(catalog_lines(&snap.catalog))
                    .map(|(mark, l)| format!("  {mark} {l}")),
            );
            lines.push(format!(
                "Run {}",
                if snap.run_enabled { "enabled" } else { "disabled" }
            ));
            lines
        }
        _ => Vec::new(),
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<OrchestratorEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let handle = spawn_controller(&cfg, evt_tx, cmd_rx)?;

    for line in HELP {
        let _ = out_tx.send(OutputLine::Stderr(line.to_string()));
    }

    let reader_out = out_tx.clone();
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("stdin read failed: {e}");
                    break;
                }
            };
            match parse_line(&line) {
                Ok(None) => {}
                Ok(Some(Input::Help)) => {
                    for l in HELP {
                        let _ = reader_out.send(OutputLine::Stderr(l.to_string()));
                    }
                }
                Ok(Some(Input::Command(cmd))) => {
                    let quit = matches!(cmd, UiCommand::Quit);
                    if cmd_tx.send(cmd).is_err() || quit {
                        return;
                    }
                }
                Err(msg) => {
                    let _ = reader_out.send(OutputLine::Stderr(msg));
                }
            }
        }
        let _ = cmd_tx.send(UiCommand::Quit);
    });

    while let Some(ev) = evt_rx.recv().await {
        for line in render(&ev) {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }

    reader.abort();
    let summary = handle
        .await
        .context("controller task failed")?
        .context("audit session failed")?;
    if let Some(path) = summary.saved_report.as_ref() {
        let _ = out_tx.send(OutputLine::Stdout(format!("Saved: {}", path.display())));
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}
