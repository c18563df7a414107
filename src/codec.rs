//! Wire codec for the recognition protocol.
//!
//! Messages in both directions are header-framed. Text messages carry an
//! ASCII header block (`key:value` lines) terminated by a blank line,
//! followed by a JSON object body. Outbound audio is binary-framed: a
//! big-endian `u16` header-section length, the header section, then the raw
//! audio payload.
//!
//! [`MessageDecoder`] consumes raw transport bytes incrementally: the
//! transport may hand it any prefix of the stream, and it buffers until
//! complete messages are available. The JSON body boundary is found by
//! balanced-brace scanning (string- and escape-aware), so no outer length
//! prefix is needed. Input that cannot be resynchronized (an oversized
//! header block, a body that is not a JSON object, a frame with no `Path`
//! header) is a fatal protocol error.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::UspError;
use crate::messages::ServiceMessage;

/// Header block terminator.
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Upper bound on one message's header block. Past this with no terminator
/// in sight the stream cannot be resynchronized.
const MAX_HEADER_BYTES: usize = 4 * 1024;

/// Upper bound on one message body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

// =============================================================================
// Outbound Framing
// =============================================================================

/// Frame an audio payload for transmission.
///
/// Layout: big-endian `u16` header-section length, the header section
/// (`Path: audio`, the session's request id, the audio content type), then
/// the payload bytes. The caller's buffer is only read, never mutated; a
/// zero-length payload produces the end-of-audio marker frame.
pub fn encode_audio_frame(request_id: &str, content_type: &str, payload: &[u8]) -> Bytes {
    let headers = format!(
        "Path: audio\r\nX-RequestId: {request_id}\r\nContent-Type: {content_type}\r\n"
    );
    let mut frame = BytesMut::with_capacity(2 + headers.len() + payload.len());
    frame.put_u16(headers.len() as u16);
    frame.extend_from_slice(headers.as_bytes());
    frame.extend_from_slice(payload);
    frame.freeze()
}

/// Frame an outbound text message (e.g. `speech.config`) as headers plus a
/// JSON body.
pub fn encode_text_message(path: &str, request_id: &str, body: &str) -> String {
    format!(
        "Path: {path}\r\nX-RequestId: {request_id}\r\nContent-Type: application/json; charset=utf-8\r\n\r\n{body}"
    )
}

// =============================================================================
// Incremental Decoder
// =============================================================================

/// Incremental decoder turning raw transport bytes into typed messages.
///
/// Feed arbitrary chunks with [`push`](Self::push); each call returns every
/// message completed by the new bytes (possibly none, possibly several).
/// Partial input stays buffered for the next call.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buf: BytesMut,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes buffered awaiting completion.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Consume a chunk of transport bytes, returning the messages it
    /// completed.
    ///
    /// A [`UspError::ProtocolError`] means the stream is unsynchronizable;
    /// the decoder must not be fed further.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<ServiceMessage>, UspError> {
        self.buf.extend_from_slice(chunk);
        let mut messages = Vec::new();

        loop {
            // Inter-message CR/LF padding carries no information.
            while self.buf.first().is_some_and(|b| *b == b'\r' || *b == b'\n') {
                let _ = self.buf.split_to(1);
            }
            if self.buf.is_empty() {
                break;
            }

            let Some(header_end) = find(&self.buf, HEADER_TERMINATOR) else {
                if self.buf.len() > MAX_HEADER_BYTES {
                    return Err(UspError::ProtocolError(format!(
                        "no header terminator within {MAX_HEADER_BYTES} bytes"
                    )));
                }
                break;
            };
            if header_end > MAX_HEADER_BYTES {
                return Err(UspError::ProtocolError(format!(
                    "header block of {header_end} bytes exceeds the {MAX_HEADER_BYTES} byte limit"
                )));
            }

            let headers = std::str::from_utf8(&self.buf[..header_end])
                .map_err(|_| UspError::ProtocolError("header block is not UTF-8".to_string()))?;
            let path = header_value(headers, "path").ok_or_else(|| {
                UspError::ProtocolError("message is missing the Path header".to_string())
            })?;

            let body_start = header_end + HEADER_TERMINATOR.len();
            let Some(body_len) = json_object_len(&self.buf[body_start..])? else {
                if self.buf.len() - body_start > MAX_BODY_BYTES {
                    return Err(UspError::ProtocolError(format!(
                        "message body exceeds the {MAX_BODY_BYTES} byte limit"
                    )));
                }
                break;
            };

            let frame = self.buf.split_to(body_start + body_len);
            let body = std::str::from_utf8(&frame[body_start..])
                .map_err(|_| UspError::ProtocolError("message body is not UTF-8".to_string()))?;
            messages.push(ServiceMessage::from_path(&path, body)?);
        }

        Ok(messages)
    }
}

/// First occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Value of a header line by case-insensitive key.
fn header_value(headers: &str, key: &str) -> Option<String> {
    headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case(key) {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}

/// Length of the complete JSON object at the start of `data`, including any
/// leading whitespace.
///
/// Returns `Ok(None)` when the object is not yet complete. The scan tracks
/// string literals and escapes so braces inside strings do not count; only
/// ASCII bytes are inspected, which is sound because every JSON structural
/// character is ASCII and UTF-8 continuation bytes never collide with them.
fn json_object_len(data: &[u8]) -> Result<Option<usize>, UspError> {
    let mut pos = 0;
    while pos < data.len() && (data[pos] as char).is_ascii_whitespace() {
        pos += 1;
    }
    if pos == data.len() {
        return Ok(None);
    }
    if data[pos] != b'{' {
        return Err(UspError::ProtocolError(
            "message body does not start with a JSON object".to_string(),
        ));
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &byte) in data.iter().enumerate().skip(pos) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(Some(i + 1));
                }
            }
            _ => {}
        }
    }
    Ok(None)
}
