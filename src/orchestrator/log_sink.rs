use crate::model::{LogLine, OrchestratorEvent};
use tokio::sync::mpsc::UnboundedSender;

/// Ordered, user-facing log of the current detection cycle or run.
///
/// Every append and clear is mirrored to the presentation layer, so a UI can
/// render the sink without polling it.
pub(crate) struct LogSink {
    lines: Vec<LogLine>,
    event_tx: Option<UnboundedSender<OrchestratorEvent>>,
}

impl LogSink {
    pub(crate) fn new(event_tx: Option<UnboundedSender<OrchestratorEvent>>) -> Self {
        Self {
            lines: Vec::new(),
            event_tx,
        }
    }

    pub(crate) fn info(&mut self, text: impl Into<String>) {
        self.push(LogLine::info(text));
    }

    pub(crate) fn error(&mut self, text: impl Into<String>) {
        let line = LogLine::error(text);
        tracing::warn!("{}", line.text);
        self.push(line);
    }

    fn push(&mut self, line: LogLine) {
        self.emit(OrchestratorEvent::Log(line.clone()));
        self.lines.push(line);
    }

    pub(crate) fn clear(&mut self) {
        self.lines.clear();
        self.emit(OrchestratorEvent::LogCleared);
    }

    pub(crate) fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    /// Forward a non-log event on the same channel, keeping it ordered with log lines.
    pub(crate) fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}
