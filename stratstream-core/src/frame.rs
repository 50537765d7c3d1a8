//! Incremental decoder for the `data: <json>` line protocol.
//!
//! Bytes arrive in arbitrary chunks. `LineBuffer` accumulates them and yields
//! only complete lines; the trailing partial line stays buffered until the
//! next chunk. Splitting happens on raw bytes, so a multi-byte UTF-8
//! character cut by a chunk boundary is reassembled before decoding.
//!
//! `FrameDecoder` layers frame recognition on top: lines without the `data: `
//! prefix and payloads that fail to parse are logged and skipped. A bad
//! frame never aborts the stream.

use tracing::{debug, trace, warn};

use crate::event::{FrameError, StreamEvent};

/// Literal prefix of an event line.
pub const DATA_PREFIX: &str = "data: ";

/// Byte accumulator that hands out complete `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every line it completes.
    ///
    /// Returned lines have the `\n` (and a preceding `\r`, if any) removed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let scan_from = self.pending.len();
        self.pending.extend_from_slice(chunk);

        // Only the new bytes can contain a newline we have not seen yet.
        let Some(offset) = chunk.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let last_newline = scan_from + offset;

        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        complete[..complete.len() - 1]
            .split(|&b| b == b'\n')
            .map(|line| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                String::from_utf8_lossy(line).into_owned()
            })
            .collect()
    }

    /// Consume the buffer, returning the unfinished trailing line, if any.
    pub fn into_remainder(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }
}

/// Classification of one complete line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Empty line (event separator).
    Blank,
    /// Non-empty line without the `data: ` prefix (comments, `event:`, ...).
    Ignored,
    Event(StreamEvent),
}

/// Classify a single line and parse its payload if it is a data frame.
pub fn parse_line(line: &str) -> Result<Frame, FrameError> {
    if line.is_empty() {
        return Ok(Frame::Blank);
    }
    match line.strip_prefix(DATA_PREFIX) {
        Some(payload) => StreamEvent::from_json(payload).map(Frame::Event),
        None => Ok(Frame::Ignored),
    }
}

/// Running counters kept by a `FrameDecoder`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub bytes: u64,
    pub lines: u64,
    pub events: u64,
    pub ignored: u64,
    pub malformed: u64,
}

/// Bytes in, typed events out.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    lines: LineBuffer,
    stats: DecodeStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of the response body; returns the events it completed,
    /// in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.stats.bytes += chunk.len() as u64;
        let mut events = Vec::new();

        for line in self.lines.push(chunk) {
            self.stats.lines += 1;
            match parse_line(&line) {
                Ok(Frame::Event(event)) => {
                    trace!(kind = event.kind(), "decoded frame");
                    self.stats.events += 1;
                    events.push(event);
                }
                Ok(Frame::Blank) => {}
                Ok(Frame::Ignored) => {
                    debug!(line = %line, "skipping non-data line");
                    self.stats.ignored += 1;
                }
                Err(e) => {
                    warn!(error = %e, line = %line, "skipping malformed frame");
                    self.stats.malformed += 1;
                }
            }
        }

        events
    }

    /// End of stream. An unterminated trailing line is dropped, never parsed.
    pub fn finish(self) -> DecodeStats {
        let stats = self.stats;
        if let Some(rest) = self.lines.into_remainder() {
            debug!(bytes = rest.len(), "discarding unterminated trailing line");
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_line_is_retained() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"data: {\"ty").is_empty());
        let lines = buf.push(b"pe\":\"cancelled\"}\nda");
        assert_eq!(lines, vec!["data: {\"type\":\"cancelled\"}"]);
        assert_eq!(buf.into_remainder().as_deref(), Some("da"));
    }

    #[test]
    fn multiple_lines_and_blank_separators() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"a\n\nb\r\nc");
        assert_eq!(lines, vec!["a", "", "b"]);
        assert_eq!(buf.push(b"\n"), vec!["c"]);
        assert_eq!(buf.into_remainder(), None);
    }

    #[test]
    fn utf8_split_across_chunks() {
        let line = "data: {\"type\":\"error\",\"data\":{\"message\":\"数据不足\"}}\n";
        let bytes = line.as_bytes();
        // Cut inside the first multi-byte character.
        let cut = line.find('数').unwrap() + 1;

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&bytes[..cut]).is_empty());
        let events = decoder.push(&bytes[cut..]);
        assert_eq!(
            events,
            vec![StreamEvent::Error {
                message: "数据不足".into()
            }]
        );
    }

    #[test]
    fn parse_line_classification() {
        assert_eq!(parse_line("").unwrap(), Frame::Blank);
        assert_eq!(parse_line(": keep-alive").unwrap(), Frame::Ignored);
        assert_eq!(parse_line("event: trade").unwrap(), Frame::Ignored);
        // prefix must match exactly, including the space
        assert_eq!(parse_line("data:{\"type\":\"cancelled\"}").unwrap(), Frame::Ignored);
        assert_eq!(
            parse_line("data: {\"type\":\"cancelled\"}").unwrap(),
            Frame::Event(StreamEvent::Cancelled)
        );
        assert!(parse_line("data: not json").is_err());
    }

    #[test]
    fn malformed_frames_are_counted_and_skipped() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(
            b"data: {\"type\":\"progress\",\"data\":{\"current_date\":\"2024-01-02\"}}\n\
              data: {oops\n\
              : comment\n\
              data: {\"type\":\"cancelled\"}\n",
        );
        assert_eq!(events.len(), 2);
        let stats = decoder.finish();
        assert_eq!(stats.lines, 4);
        assert_eq!(stats.events, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.ignored, 1);
    }

    #[test]
    fn unterminated_tail_is_not_parsed() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(b"data: {\"type\":\"cancelled\"}");
        assert!(events.is_empty());
        assert_eq!(decoder.finish().events, 0);
    }
}
