//! Server-Sent Events line framing.
//!
//! Provider streams look like:
//! ```text
//! data: {"sentence_id": 0, "result": "Hel"}
//!
//! data: {"sentence_id": 1, "result": "lo", "is_end": true}
//! ```
//! Only `data:` lines produce events; comments, `event:`/`id:` fields and
//! blank separators are dropped.

use serde_json::Value;

/// Extract the payload of a `data:` line.
///
/// A trailing `\r` and one optional space after the colon are removed.
pub(crate) fn parse_event_line(line: &str) -> Option<&str> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let data = line.strip_prefix("data:")?;
    Some(data.strip_prefix(' ').unwrap_or(data))
}

/// Decode an event payload as JSON, falling back to a JSON string.
pub(crate) fn decode_event(data: &str) -> Value {
    serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.to_string()))
}

/// Accumulates raw body chunks and hands out complete lines.
///
/// Works on bytes so multi-byte characters split across chunks survive.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete line, without its `\n` terminator.
    pub(crate) fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=pos).take(pos).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Whatever is left once the body has ended.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}
