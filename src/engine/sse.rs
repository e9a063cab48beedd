//! Server-Sent Events framing for the audit progress stream.
//!
//! Only `data:` fields matter to the orchestrator: each blank-line-terminated
//! event yields its data lines joined by `\n`. Comment lines and the `event`,
//! `id` and `retry` fields are ignored. An unterminated event at end of body
//! is dropped.

use crate::engine::EventStream;
use crate::error::StreamError;
use bytes::{Bytes, BytesMut};
use futures::{stream, Stream, StreamExt};
use std::fmt::Display;

/// Longest line accepted without a terminator.
pub(crate) const MAX_LINE_BYTES: usize = 1 << 20;

#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buf: BytesMut,
    /// Prefix of `buf` already known to hold no line terminator.
    scanned: usize,
    /// The last line ended in `\r`; a following `\n` belongs to it.
    skip_lf: bool,
    data: Option<String>,
}

impl SseDecoder {
    /// Feed a body chunk, returning every event payload it completes.
    /// Lines end at `\r\n`, `\n` or a lone `\r`.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, StreamError> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        loop {
            if self.skip_lf && !self.buf.is_empty() {
                if self.buf[0] == b'\n' {
                    let _ = self.buf.split_to(1);
                }
                self.skip_lf = false;
            }
            let Some(offset) = self.buf[self.scanned..]
                .iter()
                .position(|b| *b == b'\n' || *b == b'\r')
            else {
                self.scanned = self.buf.len();
                break;
            };
            let pos = self.scanned + offset;
            let raw = self.buf.split_to(pos + 1);
            self.scanned = 0;
            self.skip_lf = raw[pos] == b'\r';
            let line = String::from_utf8_lossy(&raw[..pos]);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        if self.buf.len() > MAX_LINE_BYTES {
            return Err(StreamError::LineTooLong(MAX_LINE_BYTES));
        }
        Ok(events)
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.data.take();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            }
        }
        None
    }

    /// Bytes still waiting for a line terminator.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Turn a streaming HTTP body into a stream of event payloads.
pub(crate) fn decode_events<S, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display,
{
    let mut decoder = SseDecoder::default();
    body.map(move |chunk| {
        let items: Vec<Result<String, StreamError>> = match chunk {
            Ok(bytes) => match decoder.push(&bytes) {
                Ok(events) => events.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            },
            Err(e) => vec![Err(StreamError::Transport(e.to_string()))],
        };
        stream::iter(items)
    })
    .flatten()
    .boxed()
}
