//! Event-stream framing.
//!
//! A frame on the wire is an event-name line, a data line and a blank line:
//!
//! ```text
//! event: tldraw-operation
//! data: {"type":"createShape","payload":{...}}
//!
//! ```
//!
//! [`FrameDecoder`] reassembles frames from arbitrarily chunked bytes.

use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::error::Result;
use crate::operation::Operation;

pub const EVENT_CONNECTED: &str = "connected";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_OPERATION: &str = "tldraw-operation";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_DEBUG: &str = "debug";

/// Event name used when a frame carries no `event:` line.
pub const DEFAULT_EVENT: &str = "message";

/// Payload of every heartbeat frame. Plain text, not JSON.
pub const HEARTBEAT_DATA: &str = "ping";

/// One self-delimited unit of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// A frame whose data line is `value` serialized as JSON.
    pub fn json<T: Serialize + ?Sized>(event: &str, value: &T) -> Result<Self> {
        Ok(Self::new(event, serde_json::to_string(value)?))
    }

    pub fn connected(message: &str) -> Self {
        Self::new(EVENT_CONNECTED, json!({ "message": message }).to_string())
    }

    pub fn heartbeat() -> Self {
        Self::new(EVENT_HEARTBEAT, HEARTBEAT_DATA)
    }

    pub fn error(message: &str) -> Self {
        Self::new(EVENT_ERROR, json!({ "message": message }).to_string())
    }

    pub fn debug(message: &str, timestamp: &str) -> Self {
        Self::new(
            EVENT_DEBUG,
            json!({ "message": message, "timestamp": timestamp }).to_string(),
        )
    }

    pub fn operation(op: &Operation) -> Result<Self> {
        Self::json(EVENT_OPERATION, op)
    }

    /// Wire encoding. Embedded newlines in `data` are split across several
    /// `data:` lines so the frame still parses back to the same value.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.event.len() + self.data.len() + 16);
        out.push_str("event: ");
        out.push_str(&self.event);
        out.push('\n');
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }

    /// Parse one frame block (the text between two blank-line boundaries).
    /// Returns `None` for blocks that contain only whitespace or comments.
    pub fn parse_block(block: &str) -> Option<Self> {
        let mut event: Option<String> = None;
        let mut data: Vec<String> = Vec::new();
        let mut saw_field = false;

        for raw in block.split('\n') {
            let line = raw.trim_end_matches('\r');
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(value) = line.strip_prefix("event:") {
                event = Some(field_value(value).trim().to_string());
                saw_field = true;
            } else if let Some(value) = line.strip_prefix("data:") {
                data.push(field_value(value).to_string());
                saw_field = true;
            }
            // Unknown fields (id:, retry:) are ignored.
        }

        if !saw_field {
            return None;
        }
        Some(Self {
            event: event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data: data.join("\n"),
        })
    }
}

/// A field value minus the single optional space after the colon.
fn field_value(value: &str) -> &str {
    value.strip_prefix(' ').unwrap_or(value)
}

/// Largest unterminated frame the decoder holds before giving up on it.
pub const MAX_PENDING_BYTES: usize = 1024 * 1024;

/// Incremental frame reassembly with a carry-over buffer.
///
/// Boundaries are searched in raw bytes, so a UTF-8 sequence split across
/// two reads is decoded only once the whole frame has arrived.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    limit: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_PENDING_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A decoder that discards any pending frame once it exceeds `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
        }
    }

    /// Feed one chunk and return every frame it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        // A boundary may straddle the previous chunk, so rescan its tail.
        let mut search_from = self.buffer.len().saturating_sub(3);
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some((pos, len)) = find_boundary(&self.buffer[search_from..]) {
            let end = search_from + pos;
            let block = String::from_utf8_lossy(&self.buffer[consumed..end]);
            if let Some(frame) = Frame::parse_block(&block) {
                frames.push(frame);
            }
            consumed = end + len;
            search_from = consumed;
        }
        if consumed > 0 {
            self.buffer.drain(..consumed);
        }
        if self.buffer.len() > self.limit {
            warn!(
                bytes = self.buffer.len(),
                limit = self.limit,
                "Discarding oversized unterminated frame"
            );
            self.buffer.clear();
        }
        frames
    }

    /// Bytes held back waiting for a frame terminator.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any unterminated trailing frame; returns how many bytes were discarded.
    pub fn finish(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        discarded
    }
}

/// Position and length of the first blank-line boundary: `\n\n` or `\r\n\r\n`.
fn find_boundary(bytes: &[u8]) -> Option<(usize, usize)> {
    (0..bytes.len()).find_map(|i| {
        let rest = &bytes[i..];
        if rest.starts_with(b"\n\n") {
            Some((i, 2))
        } else if rest.starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn sample_stream() -> String {
        let op = Operation::new(
            "createShape",
            json!({"shapeType": "rectangle", "x": 10, "y": 20, "width": 100, "height": 50, "text": "héllo ✓"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let mut s = String::new();
        s.push_str(&Frame::connected("Connected to TldrawServer").encode());
        s.push_str(&Frame::operation(&op).unwrap().encode());
        s.push_str(&Frame::heartbeat().encode());
        s.push_str(&Frame::operation(&Operation::new("mystery", Map::new())).unwrap().encode());
        s
    }

    fn decode_in_chunks(bytes: &[u8], size: usize) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        for chunk in bytes.chunks(size) {
            out.extend(decoder.push(chunk));
        }
        assert_eq!(decoder.pending_len(), 0);
        out
    }

    #[test]
    fn test_encode_shape() {
        assert_eq!(Frame::heartbeat().encode(), "event: heartbeat\ndata: ping\n\n");
        assert_eq!(
            Frame::connected("hi").encode(),
            "event: connected\ndata: {\"message\":\"hi\"}\n\n"
        );
    }

    #[test]
    fn test_single_chunk_decode() {
        let frames = decode_in_chunks(sample_stream().as_bytes(), usize::MAX);
        let events: Vec<&str> = frames.iter().map(|f| f.event.as_str()).collect();
        assert_eq!(
            events,
            vec!["connected", "tldraw-operation", "heartbeat", "tldraw-operation"]
        );
        assert_eq!(frames[2].data, "ping");
        let op: Operation = serde_json::from_str(&frames[1].data).unwrap();
        assert_eq!(op.payload["text"], "héllo ✓");
    }

    #[test]
    fn test_chunking_does_not_change_result() {
        let stream = sample_stream();
        let bytes = stream.as_bytes();
        let whole = decode_in_chunks(bytes, usize::MAX);
        for size in 1..=bytes.len() {
            assert_eq!(decode_in_chunks(bytes, size), whole, "chunk size {size}");
        }
    }

    #[test]
    fn test_split_exactly_at_boundary() {
        let first = Frame::heartbeat().encode();
        let second = Frame::connected("again").encode();
        let mut decoder = FrameDecoder::new();

        // First frame minus its terminating blank line.
        let (head, tail) = first.split_at(first.len() - 1);
        assert!(decoder.push(head.as_bytes()).is_empty());
        let frames = decoder.push(tail.as_bytes());
        assert_eq!(frames, vec![Frame::heartbeat()]);
        assert_eq!(decoder.pending_len(), 0);

        let frames = decoder.push(second.as_bytes());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "connected");
    }

    #[test]
    fn test_incomplete_frame_is_carried_over() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"event: tldraw-operation\ndata: {\"ty").is_empty());
        assert!(decoder.pending_len() > 0);
        let frames = decoder.push(b"pe\":\"addText\",\"payload\":{}}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, r#"{"type":"addText","payload":{}}"#);
    }

    #[test]
    fn test_finish_discards_trailing_partial() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"event: heartbeat\ndata: pi");
        assert_eq!(decoder.finish(), "event: heartbeat\ndata: pi".len());
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_parse_block_defaults_and_comments() {
        let frame = Frame::parse_block(": keep-alive\ndata: hello").unwrap();
        assert_eq!(frame.event, DEFAULT_EVENT);
        assert_eq!(frame.data, "hello");

        assert!(Frame::parse_block(": just a comment").is_none());
        assert!(Frame::parse_block("  ").is_none());

        let frame = Frame::parse_block("event: heartbeat").unwrap();
        assert_eq!(frame.data, "");
    }

    #[test]
    fn test_multiline_data_round_trips() {
        for data in ["line one\nline two", "  indented\nline ", " ", "a\n\n  b"] {
            let frame = Frame::new("note", data);
            let mut decoder = FrameDecoder::new();
            assert_eq!(decoder.push(frame.encode().as_bytes()), vec![frame]);
        }
    }

    #[test]
    fn test_only_one_space_after_colon_is_stripped() {
        let frame = Frame::parse_block("event:note\ndata:   x ").unwrap();
        assert_eq!(frame.event, "note");
        assert_eq!(frame.data, "  x ");
    }

    #[test]
    fn test_crlf_lines() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"event: heartbeat\r\ndata: ping\r\n\n");
        assert_eq!(frames, vec![Frame::heartbeat()]);
    }

    #[test]
    fn test_crlf_blank_line_is_a_boundary() {
        let stream = b"event: heartbeat\r\ndata: ping\r\n\r\nevent: connected\r\ndata: {}\r\n\r\n";
        let whole = {
            let mut decoder = FrameDecoder::new();
            let frames = decoder.push(stream);
            assert_eq!(decoder.pending_len(), 0);
            frames
        };
        assert_eq!(whole, vec![Frame::heartbeat(), Frame::new("connected", "{}")]);

        for size in 1..=stream.len() {
            assert_eq!(decode_in_chunks(stream, size), whole, "chunk size {size}");
        }
    }

    #[test]
    fn test_oversized_pending_frame_is_discarded() {
        let mut decoder = FrameDecoder::with_limit(16);
        assert!(decoder.push(b"data: 0123456789abcdef").is_empty());
        assert_eq!(decoder.pending_len(), 0);

        // The decoder keeps working after a discard.
        let frames = decoder.push(b"\n\nevent: heartbeat\ndata: ping\n\n");
        assert_eq!(frames, vec![Frame::heartbeat()]);
    }
}
