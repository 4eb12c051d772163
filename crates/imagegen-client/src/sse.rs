//! Incremental Server-Sent-Events framing.
//!
//! Bytes are buffered raw and only decoded once a whole frame is available.
//! Frame delimiters are ASCII, so a UTF-8 sequence split across chunks is
//! always reassembled before decoding.
use crate::stream::StreamEvent;

const DONE_SENTINEL: &str = "[DONE]";

/// One delimited SSE frame. Only the `data:` field is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub data: Option<String>,
}

#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
    // bytes already searched without finding a delimiter
    scanned: usize,
}

impl SseDecoder {
    /// Appends a chunk and drains every complete frame it closes, in order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf, self.scanned) {
            let frame = parse_sse_frame(&self.buf[..idx]);
            self.buf.drain(..idx + delim_len);
            self.scanned = 0;
            if let Some(frame) = frame {
                frames.push(frame);
            }
        }
        // a delimiter may straddle the next chunk boundary
        self.scanned = self.buf.len().saturating_sub(3);
        frames
    }

    /// Whether undelimited bytes are still buffered.
    pub fn has_pending(&self) -> bool {
        self.buf.iter().any(|b| !b.is_ascii_whitespace())
    }
}

/// Finds the first blank line at or after `from`: two consecutive line
/// terminators, each either `\n` or `\r\n`. Returns the frame end and the
/// delimiter length.
fn find_frame_delimiter(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    (from..buf.len()).find_map(|i| {
        let first = line_terminator_at(buf, i)?;
        let second = line_terminator_at(buf, i + first)?;
        Some((i, first + second))
    })
}

fn line_terminator_at(buf: &[u8], i: usize) -> Option<usize> {
    match buf.get(i..)? {
        [b'\n', ..] => Some(1),
        [b'\r', b'\n', ..] => Some(2),
        _ => None,
    }
}

fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        // `event:`, `id:`, `retry:` and `:` comments are not consumed
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data_lines.is_empty() {
        return Some(SseFrame { data: None });
    }
    Some(SseFrame {
        data: Some(data_lines.join("\n")),
    })
}

/// Why a frame's data did not become an event.
#[derive(Debug, thiserror::Error)]
pub(crate) enum FrameError {
    /// Valid JSON whose `type` this client does not decode.
    #[error("unknown event type '{0}'")]
    UnknownType(String),
    #[error(transparent)]
    Malformed(#[from] serde_json::Error),
}

/// Decodes a frame's data into an event.
///
/// `Ok(None)` for frames without data and for the `[DONE]` sentinel.
pub(crate) fn decode_frame(frame: &SseFrame) -> Result<Option<StreamEvent>, FrameError> {
    let Some(data) = frame.data.as_deref().map(str::trim) else {
        return Ok(None);
    };
    if data.is_empty() || data == DONE_SENTINEL {
        return Ok(None);
    }
    let value: serde_json::Value = serde_json::from_str(data)?;
    if let Some(kind) = value.get("type").and_then(|t| t.as_str())
        && !StreamEvent::KINDS.contains(&kind)
    {
        return Err(FrameError::UnknownType(kind.to_string()));
    }
    Ok(Some(serde_json::from_value(value)?))
}
