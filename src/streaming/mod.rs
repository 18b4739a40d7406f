//! Streaming support
//!
//! Line framing for provider event streams and the relay task that turns a
//! provider byte stream into normalized [`StreamEvent`](crate::types::StreamEvent)s.

pub mod relay;

pub use relay::{ByteStream, RelayContext, RelayState, StreamHandle, StreamRelay};

/// Marker line that ends an event stream
pub const DONE_MARKER: &str = "data: [DONE]";

/// Prefix of event lines carrying a JSON payload
pub const DATA_PREFIX: &str = "data: ";

/// Buffer for accumulating incomplete lines across chunk boundaries.
///
/// Bytes are kept undecoded until a full line is available, so a multi-byte
/// UTF-8 character split between two network chunks decodes correctly.
///
/// # Example
/// ```
/// use conduit::streaming::SseLineBuffer;
///
/// let mut buffer = SseLineBuffer::new();
///
/// let lines = buffer.feed(b"data: {\"completion\":\"hel");
/// assert!(lines.is_empty());
///
/// let lines = buffer.feed(b"lo\"}\n");
/// assert_eq!(lines, vec!["data: {\"completion\":\"hello\"}"]);
/// ```
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    incomplete: Vec<u8>,
}

impl SseLineBuffer {
    /// Create a new empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the buffer and return any complete lines.
    ///
    /// Lines are trimmed of surrounding whitespace (including `\r`); blank
    /// lines are skipped. Incomplete trailing data is retained.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.incomplete.extend_from_slice(bytes);

        let mut complete_lines = Vec::new();
        while let Some(newline_pos) = self.incomplete.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.incomplete.drain(..=newline_pos).collect();
            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                complete_lines.push(trimmed.to_string());
            }
        }

        complete_lines
    }

    /// Take whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        if self.incomplete.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.incomplete);
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }

    /// Check if there's any incomplete data remaining in the buffer.
    pub fn has_incomplete(&self) -> bool {
        !self.incomplete.is_empty()
    }
}

/// Classification of one framed line
#[derive(Debug, PartialEq)]
pub enum SseLine<'a> {
    /// `data: [DONE]`
    Done,
    /// Payload of a `data: ` line
    Data(&'a str),
    /// Comments, event names and anything else
    Other,
}

/// Classify a trimmed line
pub fn classify_line(line: &str) -> SseLine<'_> {
    if line == DONE_MARKER {
        return SseLine::Done;
    }
    match line.strip_prefix(DATA_PREFIX) {
        Some(payload) => SseLine::Data(payload),
        None => SseLine::Other,
    }
}
