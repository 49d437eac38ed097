//! Event Line Framing
//!
//! The stream transport receives its body as arbitrary byte chunks. Read
//! boundaries can fall anywhere: inside a line, inside the `data: ` prefix,
//! or in the middle of a multi-byte UTF-8 sequence. [`EventLineDecoder`]
//! buffers raw bytes and only releases complete `\n`-terminated lines, so a
//! partial trailing line is held over to the next read.
//!
//! # Limits
//!
//! A single line may not exceed [`MAX_LINE_SIZE`]; an oversized line is
//! discarded (with a warning) up to its terminating newline.

use crate::protocol::{decode_event_line, ProtocolMessage};

/// Maximum length of one event line (1 MB)
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Incremental decoder for `data: <json>` event lines
#[derive(Debug)]
pub struct EventLineDecoder {
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
    /// Skipping the rest of an oversized line
    discarding: bool,
}

impl Default for EventLineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLineDecoder {
    /// Create a new decoder with default buffer capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
            discarding: false,
        }
    }

    /// Append bytes read from the transport
    pub fn push(&mut self, data: &[u8]) {
        // Compact buffer if we've consumed a lot
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);

        if self.discarding {
            if self.find_newline().is_none() {
                self.clear_buffer();
            }
        } else if self.available() > MAX_LINE_SIZE && self.find_newline().is_none() {
            tracing::warn!(
                buffered = self.available(),
                max = MAX_LINE_SIZE,
                "Event line too long, discarding"
            );
            self.discarding = true;
            self.clear_buffer();
        }
    }

    /// Number of buffered, not yet consumed bytes
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Take the next complete line, without its terminator
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let newline = self.find_newline()?;
            let line = &self.buffer[self.read_pos..newline];
            let was_discarding = self.discarding;
            let text = (!was_discarding).then(|| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                String::from_utf8_lossy(line).into_owned()
            });
            self.read_pos = newline + 1;
            self.discarding = false;

            if let Some(text) = text {
                return Some(text);
            }
        }
    }

    /// Decode the next protocol message from complete buffered lines
    ///
    /// Lines that carry no payload, have an unknown type or fail to decode
    /// are skipped. Returns `None` once no complete line remains.
    pub fn next_message(&mut self) -> Option<ProtocolMessage> {
        while let Some(line) = self.next_line() {
            if let Some(message) = decode_event_line(&line) {
                return Some(message);
            }
        }
        None
    }

    /// Decode the unterminated remainder left when the stream ends
    pub fn finish(&mut self) -> Option<ProtocolMessage> {
        if self.available() == 0 || self.discarding {
            self.clear();
            return None;
        }
        let rest = String::from_utf8_lossy(&self.buffer[self.read_pos..]).into_owned();
        self.clear();
        decode_event_line(&rest)
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.clear_buffer();
        self.discarding = false;
    }

    fn clear_buffer(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }

    fn find_newline(&self) -> Option<usize> {
        self.buffer[self.read_pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|offset| self.read_pos + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunk(text: &str) -> ProtocolMessage {
        ProtocolMessage::Stream {
            chunk: text.to_string(),
        }
    }

    #[test]
    fn test_partial_line_is_held_over() {
        let mut decoder = EventLineDecoder::new();
        decoder.push(b"data: {\"type\":\"stream\",");
        assert_eq!(decoder.next_message(), None);

        decoder.push(b"\"chunk\":\"Hello \"}\nda");
        assert_eq!(decoder.next_message(), Some(chunk("Hello ")));
        assert_eq!(decoder.next_message(), None);

        decoder.push(b"ta: {\"type\":\"stream\",\"chunk\":\"world\"}\n");
        assert_eq!(decoder.next_message(), Some(chunk("world")));
    }

    #[test]
    fn test_split_multibyte_character() {
        let line = "data: {\"type\":\"stream\",\"chunk\":\"浪漫\"}\n".as_bytes();
        // Split inside the first CJK character
        let split = line.iter().position(|&b| b >= 0x80).unwrap() + 1;

        let mut decoder = EventLineDecoder::new();
        decoder.push(&line[..split]);
        assert_eq!(decoder.next_message(), None);
        decoder.push(&line[split..]);
        assert_eq!(decoder.next_message(), Some(chunk("浪漫")));
    }

    #[test]
    fn test_bad_line_skipped() {
        let mut decoder = EventLineDecoder::new();
        decoder.push(b"event: message\ndata: {oops}\n\ndata: {\"type\":\"stream\",\"chunk\":\"ok\"}\n");
        assert_eq!(decoder.next_message(), Some(chunk("ok")));
        assert_eq!(decoder.next_message(), None);
        assert_eq!(decoder.available(), 0);
    }

    #[test]
    fn test_crlf_lines() {
        let mut decoder = EventLineDecoder::new();
        decoder.push(b"data: {\"type\":\"status\",\"message\":\"hi\"}\r\n\r\n");
        assert_eq!(
            decoder.next_message(),
            Some(ProtocolMessage::Status {
                message: "hi".into()
            })
        );
    }

    #[test]
    fn test_finish_decodes_unterminated_tail() {
        let mut decoder = EventLineDecoder::new();
        decoder.push(b"data: {\"type\":\"stream\",\"chunk\":\"tail\"}");
        assert_eq!(decoder.next_message(), None);
        assert_eq!(decoder.finish(), Some(chunk("tail")));
        assert_eq!(decoder.available(), 0);
    }

    #[test]
    fn test_oversized_line_discarded() {
        let mut decoder = EventLineDecoder::new();
        decoder.push(b"data: ");
        decoder.push(&vec![b'x'; MAX_LINE_SIZE + 1]);
        assert_eq!(decoder.available(), 0);

        decoder.push(b"xxx\ndata: {\"type\":\"stream\",\"chunk\":\"after\"}\n");
        assert_eq!(decoder.next_message(), Some(chunk("after")));
    }
}
