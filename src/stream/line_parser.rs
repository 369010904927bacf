//! Line framing for the chat event stream
//!
//! Network reads do not respect line boundaries. [`LineParser`] buffers raw
//! bytes, releases only complete lines, and keeps the partial tail for the
//! next read. Splitting happens on `\n` before UTF-8 decoding, so a multi-byte
//! character cut in half by the transport is reassembled intact.

/// Payload of the end-of-stream sentinel line (`data: [DONE]`)
pub const SENTINEL: &str = "[DONE]";

/// Incremental splitter from byte fragments to complete, non-blank lines
#[derive(Debug, Default)]
pub struct LineParser {
    remainder: Vec<u8>,
    saw_sentinel: bool,
}

impl LineParser {
    /// Creates an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment and collect every line it completes
    ///
    /// Blank lines and the sentinel line are dropped. Bytes after the last
    /// newline are retained until more data arrives or [`finish`] is called.
    ///
    /// [`finish`]: LineParser::finish
    ///
    /// # Examples
    ///
    /// ```
    /// use chatstream::stream::line_parser::LineParser;
    ///
    /// let mut parser = LineParser::new();
    /// assert!(parser.feed(b"data: {\"type\":").is_empty());
    /// let lines = parser.feed(b"\"chunk\",\"content\":\"hi\"}\n\n");
    /// assert_eq!(lines, vec![r#"data: {"type":"chunk","content":"hi"}"#]);
    /// ```
    pub fn feed(&mut self, fragment: &[u8]) -> Vec<String> {
        self.remainder.extend_from_slice(fragment);

        let mut lines = Vec::new();
        while let Some(pos) = self.remainder.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.remainder.drain(..=pos).collect();
            self.accept(&raw[..raw.len() - 1], &mut lines);
        }
        lines
    }

    /// Flush the unterminated tail at end of stream
    pub fn finish(&mut self) -> Vec<String> {
        let raw = std::mem::take(&mut self.remainder);
        let mut lines = Vec::new();
        self.accept(&raw, &mut lines);
        lines
    }

    /// Returns true once the sentinel line has been seen
    pub fn saw_sentinel(&self) -> bool {
        self.saw_sentinel
    }

    fn accept(&mut self, raw: &[u8], out: &mut Vec<String>) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim_end_matches('\r');
        if line.trim().is_empty() {
            return;
        }
        if is_sentinel(line) {
            tracing::trace!("End-of-stream sentinel received");
            self.saw_sentinel = true;
            return;
        }
        out.push(line.to_string());
    }
}

/// Returns true if `line` is the end-of-stream sentinel
///
/// # Examples
///
/// ```
/// use chatstream::stream::line_parser::is_sentinel;
///
/// assert!(is_sentinel("data: [DONE]"));
/// assert!(!is_sentinel(r#"data: {"type":"chunk","content":"[DONE]"}"#));
/// ```
pub fn is_sentinel(line: &str) -> bool {
    line.trim()
        .strip_prefix("data:")
        .map(|payload| payload.trim() == SENTINEL)
        .unwrap_or(false)
}
