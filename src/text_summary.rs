//! Text summary builder for CLI output.
//!
//! This module formats human-readable lines for text mode.

use crate::model::{Catalog, CatalogState, RunStatus, SessionSnapshot, SessionSummary};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// One line per catalog entry: filename, display title and description.
pub(crate) fn catalog_lines(catalog: &Catalog) -> Vec<String> {
    catalog
        .iter()
        .map(|(file, desc)| {
            format!(
                "{file}: {} ({})",
                desc.display_title(file),
                desc.display_description()
            )
        })
        .collect()
}

/// Status lines shared by the final summary and the interactive `status` command.
pub(crate) fn snapshot_lines(snap: &SessionSnapshot) -> Vec<String> {
    let mut lines = Vec::new();
    let host = if snap.host.is_empty() { "-" } else { snap.host.as_str() };
    lines.push(format!("Host: {host}"));
    lines.push(format!("OS: {}", snap.os.as_deref().unwrap_or("-")));

    let catalog = match snap.catalog_state {
        CatalogState::Unloaded => "not loaded".to_string(),
        CatalogState::Loading => "loading".to_string(),
        CatalogState::Ready => format!("{} script(s)", snap.catalog.len()),
        CatalogState::Empty => "no scripts for this OS".to_string(),
        CatalogState::Failed => "failed to load".to_string(),
    };
    lines.push(format!("Catalog: {catalog}"));

    if !snap.selection.is_empty() {
        let names: Vec<&str> = snap.selection.iter().map(String::as_str).collect();
        lines.push(format!("Selected: {}", names.join(", ")));
    }

    match snap.run.as_ref() {
        None => lines.push("Run: idle".to_string()),
        Some(run) => {
            let status = match run.status {
                RunStatus::Idle => "idle",
                RunStatus::Running => "running",
                RunStatus::Completed => "completed",
                RunStatus::Failed => "failed",
            };
            lines.push(format!(
                "Run #{}: {status} on {} ({} script(s))",
                run.seq,
                run.os,
                run.scripts.len()
            ));
            if let Some(report) = run.report.as_deref() {
                lines.push(format!("Report: {report}"));
            }
        }
    }
    lines
}

/// Build the closing summary for a batch session.
pub(crate) fn build_text_summary(summary: &SessionSummary) -> TextSummary {
    let mut lines = vec![String::new()];
    lines.extend(snapshot_lines(&summary.snapshot));
    if let Some(path) = summary.saved_report.as_ref() {
        lines.push(format!("Saved: {}", path.display()));
    }
    let errors = summary.log.iter().filter(|l| l.is_error).count();
    if errors > 0 {
        lines.push(format!("Errors: {errors}"));
    }
    TextSummary { lines }
}
