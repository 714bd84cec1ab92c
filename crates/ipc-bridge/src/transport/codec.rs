//! Frame codec.
//!
//! A frame is one JSON envelope followed by a form feed:
//!
//! ```text
//! {"type":"bits-ipc","data":{"type":"event","event":"a#b","params":[]}}\f
//! ```
//!
//! Inbound streams are split by [`FrameCodec`], which never buffers more than
//! `max_size` bytes of one frame.

use crate::domain::message::WireMessage;
use bytes::{Buf, BytesMut};
use serde::Serialize;
use serde_json::Value;
use std::io;
use thiserror::Error;
use tokio_util::codec::Decoder;

/// Envelope `type` carried by every frame.
pub const ENVELOPE_TYPE: &str = "bits-ipc";

/// Byte terminating each frame.
pub const FRAME_DELIMITER: u8 = 0x0c;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected envelope type {0}")]
    EnvelopeType(String),

    #[error("empty message")]
    Empty,

    #[error("frame of {size} bytes exceeds limit of {max}")]
    TooLarge { size: usize, max: usize },
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: &'a WireMessage,
}

/// Serialize a message into a delimited frame.
pub fn encode_frame(message: &WireMessage) -> Result<Vec<u8>, FrameError> {
    let mut frame = serde_json::to_vec(&Envelope {
        kind: ENVELOPE_TYPE,
        data: message,
    })?;
    frame.push(FRAME_DELIMITER);
    Ok(frame)
}

/// Unwrap one frame (with or without its delimiter) to the inner `data` value.
pub fn decode_frame(frame: &[u8], max_size: usize) -> Result<Value, FrameError> {
    let body = frame.strip_suffix(&[FRAME_DELIMITER]).unwrap_or(frame);
    if body.len() > max_size {
        return Err(FrameError::TooLarge {
            size: body.len(),
            max: max_size,
        });
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(FrameError::Empty);
    }

    let mut envelope: Value = serde_json::from_slice(body)?;
    match envelope.get("type") {
        Some(Value::String(kind)) if kind == ENVELOPE_TYPE => {}
        other => {
            return Err(FrameError::EnvelopeType(
                other.map_or_else(|| "<missing>".to_string(), Value::to_string),
            ))
        }
    }

    match envelope.get_mut("data").map(Value::take) {
        None | Some(Value::Null) => Err(FrameError::Empty),
        Some(data) => Ok(data),
    }
}

/// Splits a byte stream into decoded frames.
///
/// A frame growing past `max_size` without a delimiter is reported once as
/// [`FrameError::TooLarge`] and its remaining bytes are discarded up to the
/// next delimiter. Frame errors are yielded as items so the stream survives
/// them; only I/O errors end it.
#[derive(Debug)]
pub struct FrameCodec {
    max_size: usize,
    // Where to resume the delimiter scan.
    next_index: usize,
    discarding: bool,
}

impl FrameCodec {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Result<Value, FrameError>;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        loop {
            let delimiter = buf[self.next_index..]
                .iter()
                .position(|b| *b == FRAME_DELIMITER)
                .map(|offset| self.next_index + offset);

            match (self.discarding, delimiter) {
                (true, Some(end)) => {
                    buf.advance(end + 1);
                    self.next_index = 0;
                    self.discarding = false;
                }
                (true, None) => {
                    buf.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(end)) => {
                    let frame = buf.split_to(end + 1);
                    self.next_index = 0;
                    return Ok(Some(decode_frame(&frame, self.max_size)));
                }
                (false, None) if buf.len() > self.max_size => {
                    let size = buf.len();
                    buf.clear();
                    self.next_index = 0;
                    self.discarding = true;
                    return Ok(Some(Err(FrameError::TooLarge {
                        size,
                        max: self.max_size,
                    })));
                }
                (false, None) => {
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        // Trailing bytes without a delimiter are not a frame.
        buf.clear();
        self.next_index = 0;
        Ok(None)
    }
}
