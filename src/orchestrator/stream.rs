/// Prefix of the stream line that announces the generated report.
pub(crate) const REPORT_SENTINEL: &str = "REPORT_PATH::";

/// How a single stream payload is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamLine<'a> {
    Log(&'a str),
    Report(&'a str),
}

/// Fixed-prefix classification. A sentinel whose value is blank after
/// trimming is not well-formed and stays an ordinary log line.
pub(crate) fn classify(payload: &str) -> StreamLine<'_> {
    match payload.strip_prefix(REPORT_SENTINEL).map(str::trim) {
        Some(path) if !path.is_empty() => StreamLine::Report(path),
        _ => StreamLine::Log(payload),
    }
}
