//! Frame parsing for the AMI wire protocol.
//!
//! An AMI frame is a sequence of `Key: Value` lines terminated by a blank
//! line (`\r\n\r\n`). A single TCP read may contain a fragment of a frame,
//! multiple complete frames, or both; [`FrameBuffer`] accumulates bytes
//! and yields complete raw frames as they become available.

use bytes::BytesMut;
use std::collections::HashMap;

/// A parsed AMI frame: an ordered, case-sensitive key → trimmed-value map.
/// Asterisk frames rarely repeat a key; when they do, the last value wins,
/// matching the source parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame(HashMap<String, String>);

impl Frame {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn event_name(&self) -> Option<&str> {
        self.get("Event")
    }

    pub fn is_response(&self) -> bool {
        self.0.contains_key("Response")
    }

    pub fn is_success(&self) -> bool {
        self.get("Response") == Some("Success")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Parses one raw frame's text (no trailing blank line) into a [`Frame`].
/// Lines without a `:` are ignored rather than treated as errors — AMI
/// occasionally emits banner or continuation lines that do not fit the
/// key-value shape, and a single malformed line should not discard the
/// rest of an otherwise usable frame.
pub fn parse_frame(raw: &str) -> Frame {
    let mut map = HashMap::new();
    for line in raw.split("\r\n") {
        let line = line.trim_end_matches('\r');
        if let Some((k, v)) = line.split_once(':') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    Frame(map)
}

/// Accumulates bytes from the socket and splits them into raw frame
/// strings on the `\r\n\r\n` terminator.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete frame out of the buffer, if one has fully
    /// arrived. Returns the frame's raw text, without the terminating
    /// blank line.
    pub fn next_frame(&mut self) -> Option<String> {
        let haystack = &self.buf[..];
        let pos = find_subslice(haystack, b"\r\n\r\n")?;
        let frame_bytes = self.buf.split_to(pos);
        // drop the terminator itself
        let _ = self.buf.split_to(4);
        Some(String::from_utf8_lossy(&frame_bytes).into_owned())
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_frame() {
        let f = parse_frame("Response: Success\r\nMessage: Authentication accepted");
        assert_eq!(f.get("Response"), Some("Success"));
        assert_eq!(f.get("Message"), Some("Authentication accepted"));
        assert!(f.is_success());
    }

    #[test]
    fn event_name_reads_event_key() {
        let f = parse_frame("Event: Newchannel\r\nChannel: PJSIP/110-0000001a");
        assert_eq!(f.event_name(), Some("Newchannel"));
    }

    #[test]
    fn buffer_yields_frames_as_they_complete() {
        let mut buf = FrameBuffer::new();
        buf.feed(b"Event: Newchannel\r\nChannel: PJSIP/110-000");
        assert!(buf.next_frame().is_none());
        buf.feed(b"0001a\r\n\r\nEvent: Hangup\r\nChannel: PJSIP/110-0000001a\r\n\r\n");
        let first = buf.next_frame().expect("first frame ready");
        assert!(first.contains("Newchannel"));
        let second = buf.next_frame().expect("second frame ready");
        assert!(second.contains("Hangup"));
        assert!(buf.next_frame().is_none());
    }

    #[test]
    fn buffer_handles_split_terminator() {
        let mut buf = FrameBuffer::new();
        buf.feed(b"Response: Success\r\n\r");
        assert!(buf.next_frame().is_none());
        buf.feed(b"\n");
        assert!(buf.next_frame().is_some());
    }
}
