//! Decoding of the chat service's line-delimited event stream
//!
//! - [`line_parser`] turns byte fragments into complete lines
//! - [`event`] turns each line into a [`StreamEvent`]
//!
//! [`EventDecoder`] chains the two for callers that read raw bytes off an
//! HTTP response body.

pub mod event;
pub mod line_parser;

pub use event::{interpret_line, LineOutcome, StreamEvent};
pub use line_parser::LineParser;

/// Byte-to-event decoder for one response body
#[derive(Debug, Default)]
pub struct EventDecoder {
    parser: LineParser,
}

impl EventDecoder {
    /// Creates a decoder with an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode every line completed by `fragment`
    ///
    /// # Examples
    ///
    /// ```
    /// use chatstream::stream::{EventDecoder, LineOutcome, StreamEvent};
    ///
    /// let mut decoder = EventDecoder::new();
    /// let outcomes = decoder.feed(b"data: {\"type\":\"chunk\",\"content\":\"a\"}\n");
    /// assert_eq!(outcomes, vec![LineOutcome::Event(StreamEvent::Chunk("a".into()))]);
    /// ```
    pub fn feed(&mut self, fragment: &[u8]) -> Vec<LineOutcome> {
        self.parser
            .feed(fragment)
            .iter()
            .map(|line| interpret_line(line))
            .collect()
    }

    /// Decode whatever remains buffered at end of stream
    pub fn finish(&mut self) -> Vec<LineOutcome> {
        self.parser
            .finish()
            .iter()
            .map(|line| interpret_line(line))
            .collect()
    }

    /// Returns true once the end-of-stream sentinel has been read
    pub fn saw_sentinel(&self) -> bool {
        self.parser.saw_sentinel()
    }
}
